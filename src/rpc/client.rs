//! RPC client over a single [`Transport`].
//!
//! Requests are written under a lock on the sink half; a reader task owns
//! the stream half and completes pending calls by sequence number. When the
//! stream ends every pending and later call fails with
//! [`PluginError::Shutdown`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::codec::{ClientCodec, JsonLinesCodec};
use super::{Request, Response};
use crate::transport::Transport;
use crate::{PluginError, Result};

type CallOutcome = std::result::Result<Value, PluginError>;

#[derive(Default)]
struct PendingCalls {
    calls: HashMap<u64, oneshot::Sender<CallOutcome>>,
    shutdown: bool,
}

impl PendingCalls {
    /// Refuse new calls and fail every outstanding one with `reason`.
    fn shut_down(&mut self, reason: &PluginError) {
        self.shutdown = true;
        for (_, call) in self.calls.drain() {
            let _ = call.send(Err(reason.clone()));
        }
    }
}

/// Client half of an RPC connection.
///
/// Dropping the client without [`close`](Self::close) stops its reader; the
/// transport is then dropped, which for a [`PipeTransport`](crate::transport::PipeTransport)
/// kills the child.
pub struct RpcClient<T, C = JsonLinesCodec<Response>> {
    sink: Mutex<Option<SplitSink<Framed<T, C>, Request>>>,
    reader: Mutex<Option<JoinHandle<SplitStream<Framed<T, C>>>>>,
    pending: Arc<Mutex<PendingCalls>>,
    seq: AtomicU64,
    cancel: CancellationToken,
}

impl<T: Transport> RpcClient<T> {
    /// Client using the default JSON-lines encoding.
    ///
    /// Must be called inside a tokio runtime: the response reader is spawned
    /// immediately.
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self::with_codec(transport, JsonLinesCodec::new())
    }
}

impl<T: Transport, C: ClientCodec> RpcClient<T, C> {
    /// Client using `codec` as the wire encoding.
    #[must_use]
    pub fn with_codec(transport: T, codec: C) -> Self {
        let (sink, stream) = Framed::new(transport, codec).split();
        let pending = Arc::new(Mutex::new(PendingCalls::default()));
        let cancel = CancellationToken::new();
        let reader = tokio::spawn(read_responses(
            stream,
            Arc::clone(&pending),
            cancel.clone(),
        ));

        Self {
            sink: Mutex::new(Some(sink)),
            reader: Mutex::new(Some(reader)),
            pending,
            seq: AtomicU64::new(0),
            cancel,
        }
    }

    /// Call `method` (`Service.Method`) with `params` and wait for the result.
    ///
    /// Safe to call concurrently from several tasks.
    ///
    /// # Errors
    ///
    /// - `PluginError::Remote` if the method returned an error.
    /// - `PluginError::Shutdown` if the connection is closed or ends first.
    /// - `PluginError::Codec` if params or result do not (de)serialise.
    /// - Any transport error raised while sending the request.
    pub async fn call<P, R>(&self, method: &str, params: P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let (result_tx, result_rx) = oneshot::channel();

        {
            let mut pending = self.pending.lock().await;
            if pending.shutdown {
                return Err(PluginError::Shutdown);
            }
            pending.calls.insert(seq, result_tx);
        }

        let request = Request {
            seq,
            method: method.to_owned(),
            params,
        };
        let sent = match self.sink.lock().await.as_mut() {
            Some(sink) => sink.send(request).await,
            None => Err(PluginError::Shutdown),
        };
        if let Err(err) = sent {
            self.pending.lock().await.calls.remove(&seq);
            return Err(err);
        }

        let value = result_rx.await.map_err(|_| PluginError::Shutdown)??;
        serde_json::from_value(value)
            .map_err(|err| PluginError::Codec(format!("invalid result for {method}: {err}")))
    }

    /// Whether the connection has shut down.
    pub async fn is_shutdown(&self) -> bool {
        self.pending.lock().await.shutdown
    }

    /// Stop reading responses and close the transport.
    ///
    /// # Errors
    ///
    /// Returns `PluginError::Shutdown` if the client was already closed,
    /// otherwise whatever the transport's close reports.
    pub async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        let reader = self.reader.lock().await.take();
        let sink = self.sink.lock().await.take();
        let (Some(reader), Some(sink)) = (reader, sink) else {
            return Err(PluginError::Shutdown);
        };

        let stream = reader
            .await
            .map_err(|err| PluginError::Io(format!("response reader failed: {err}")))?;
        let mut transport = stream
            .reunite(sink)
            .map_err(|_| PluginError::Io("transport halves do not match".into()))?
            .into_inner();
        transport.close().await
    }
}

impl<T, C> Drop for RpcClient<T, C> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Deliver responses to pending calls until cancelled or the stream ends.
///
/// Returns the stream so the transport can be reassembled and closed.
async fn read_responses<S>(
    mut stream: S,
    pending: Arc<Mutex<PendingCalls>>,
    cancel: CancellationToken,
) -> S
where
    S: Stream<Item = Result<Response>> + Unpin,
{
    let reason = loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break PluginError::Shutdown,

            frame = stream.next() => match frame {
                Some(Ok(response)) => deliver(&pending, response).await,
                Some(Err(err)) => {
                    warn!(%err, "rpc response stream failed");
                    break err;
                }
                None => {
                    debug!("rpc server closed the connection");
                    break PluginError::Shutdown;
                }
            },
        }
    };

    pending.lock().await.shut_down(&reason);
    stream
}

async fn deliver(pending: &Mutex<PendingCalls>, response: Response) {
    let Response {
        seq,
        method,
        result,
        error,
    } = response;

    let Some(call) = pending.lock().await.calls.remove(&seq) else {
        debug!(seq, method = %method, "response for unknown call");
        return;
    };

    let outcome = match error {
        Some(message) => Err(PluginError::Remote(message)),
        None => Ok(result.unwrap_or(Value::Null)),
    };
    // The caller may have given up on the call.
    let _ = call.send(outcome);
}
