//! This process's own stdin/stdout as one closeable stream.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf, Stdin, Stdout};

use super::Transport;
use crate::{PluginError, Result};

fn already_closed() -> io::Error {
    io::Error::other("stream already closed")
}

/// A read half and a write half with no process attached.
///
/// Used on the plugin side, where the host owns the process lifecycle.
pub struct StdioStream<R = Stdin, W = Stdout> {
    reader: Option<R>,
    writer: Option<W>,
}

impl StdioStream {
    /// Bind the current process's stdin and stdout.
    #[must_use]
    pub fn current() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl<R, W> StdioStream<R, W> {
    /// Combine `reader` and `writer` into one stream.
    #[must_use]
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: Some(reader),
            writer: Some(writer),
        }
    }
}

impl<R, W> Transport for StdioStream<R, W>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    /// Drop the read half, then flush and drop the write half.
    ///
    /// Stops at the first failure.
    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.reader.take().is_none() {
                return Err(PluginError::Io(format!("close stdin: {}", already_closed())));
            }
            let Some(mut writer) = self.writer.take() else {
                return Err(PluginError::Io(format!("close stdout: {}", already_closed())));
            };
            writer
                .shutdown()
                .await
                .map_err(|err| PluginError::Io(format!("close stdout: {err}")))
        })
    }
}

impl<R, W> AsyncRead for StdioStream<R, W>
where
    R: AsyncRead + Unpin,
    W: Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.reader.as_mut() {
            Some(reader) => Pin::new(reader).poll_read(cx, buf),
            None => Poll::Ready(Err(already_closed())),
        }
    }
}

impl<R, W> AsyncWrite for StdioStream<R, W>
where
    R: Unpin,
    W: AsyncWrite + Unpin,
{
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.writer.as_mut() {
            Some(writer) => Pin::new(writer).poll_write(cx, buf),
            None => Poll::Ready(Err(already_closed())),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.writer.as_mut() {
            Some(writer) => Pin::new(writer).poll_flush(cx),
            None => Poll::Ready(Err(already_closed())),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.writer.as_mut() {
            Some(writer) => Pin::new(writer).poll_shutdown(cx),
            None => Poll::Ready(Err(already_closed())),
        }
    }
}
