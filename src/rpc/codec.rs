//! Newline-delimited JSON codec for RPC frames.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so a
//! misbehaving peer cannot make us buffer an unbounded message. Each
//! `\n`-terminated UTF-8 line carries exactly one JSON frame.

use std::marker::PhantomData;

use bytes::BytesMut;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use super::{Request, Response};
use crate::{PluginError, Result};

/// Default maximum line length accepted by [`JsonLinesCodec`]: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Wire encoding used by [`RpcServer`](super::RpcServer): decodes requests,
/// encodes responses.
pub trait ServerCodec:
    Decoder<Item = Request, Error = PluginError>
    + Encoder<Response, Error = PluginError>
    + Send
    + Unpin
    + 'static
{
}

impl<C> ServerCodec for C where
    C: Decoder<Item = Request, Error = PluginError>
        + Encoder<Response, Error = PluginError>
        + Send
        + Unpin
        + 'static
{
}

/// Wire encoding used by [`RpcClient`](super::RpcClient): decodes responses,
/// encodes requests.
pub trait ClientCodec:
    Decoder<Item = Response, Error = PluginError>
    + Encoder<Request, Error = PluginError>
    + Send
    + Unpin
    + 'static
{
}

impl<C> ClientCodec for C where
    C: Decoder<Item = Response, Error = PluginError>
        + Encoder<Request, Error = PluginError>
        + Send
        + Unpin
        + 'static
{
}

/// JSON-lines codec decoding frames of type `D` and encoding any
/// [`Serialize`] value.
///
/// # Decoder
///
/// Blank lines are skipped. Lines longer than the configured limit return
/// [`PluginError::Codec`]`("line too long: …")` without buffering further.
///
/// # Examples
///
/// ```rust,ignore
/// use tokio_util::codec::Framed;
/// use stdio_plugin::rpc::{JsonLinesCodec, Request};
///
/// let framed = Framed::new(transport, JsonLinesCodec::<Request>::new());
/// ```
#[derive(Debug)]
pub struct JsonLinesCodec<D> {
    lines: LinesCodec,
    max_length: usize,
    frame: PhantomData<fn() -> D>,
}

impl<D> JsonLinesCodec<D> {
    /// Codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Codec rejecting lines longer than `max_length` bytes.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_length),
            max_length,
            frame: PhantomData,
        }
    }

    /// Maximum accepted line length in bytes.
    #[must_use]
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    fn map_codec_error(&self, err: LinesCodecError) -> PluginError {
        match err {
            LinesCodecError::MaxLineLengthExceeded => PluginError::Codec(format!(
                "line too long: exceeded {} bytes",
                self.max_length
            )),
            LinesCodecError::Io(io_err) => PluginError::Io(io_err.to_string()),
        }
    }
}

impl<D> Default for JsonLinesCodec<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: DeserializeOwned> JsonLinesCodec<D> {
    fn parse(line: Option<String>) -> Result<Option<D>> {
        match line {
            Some(line) => serde_json::from_str(&line)
                .map(Some)
                .map_err(|err| PluginError::Codec(format!("invalid frame: {err}"))),
            None => Ok(None),
        }
    }
}

impl<D: DeserializeOwned> Decoder for JsonLinesCodec<D> {
    type Item = D;
    type Error = PluginError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<D>> {
        loop {
            match self.lines.decode(src) {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(line) => return Self::parse(line),
                Err(err) => return Err(self.map_codec_error(err)),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<D>> {
        loop {
            match self.lines.decode_eof(src) {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(line) => return Self::parse(line),
                Err(err) => return Err(self.map_codec_error(err)),
            }
        }
    }
}

impl<D, E: Serialize> Encoder<E> for JsonLinesCodec<D> {
    type Error = PluginError;

    fn encode(&mut self, item: E, dst: &mut BytesMut) -> Result<()> {
        let line = serde_json::to_string(&item)
            .map_err(|err| PluginError::Codec(format!("failed to serialise frame: {err}")))?;
        self.lines
            .encode(line, dst)
            .map_err(|err| self.map_codec_error(err))
    }
}
