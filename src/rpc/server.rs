//! RPC server: a registry of named services and the per-connection loop.
//!
//! One connection is served at a time per call to [`RpcServer::serve_conn`].
//! Each request runs in its own task; responses funnel through a single
//! writer task so frames never interleave on the wire.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures_util::stream::SplitSink;
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, info_span, warn, Instrument};

use super::codec::{JsonLinesCodec, ServerCodec};
use super::service::Service;
use super::{Request, Response};
use crate::transport::Transport;
use crate::{PluginError, Result};

/// Responses buffered between request handlers and the writer task.
const RESPONSE_QUEUE: usize = 64;

#[derive(Clone)]
struct Registered {
    service: Arc<dyn Service>,
    methods: HashSet<String>,
}

/// Registry of named services that can serve connections.
///
/// Register everything first; serving takes `&self`.
#[derive(Clone, Default)]
pub struct RpcServer {
    services: Arc<HashMap<String, Registered>>,
}

impl RpcServer {
    /// Server with no services.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `service` under `name`.
    ///
    /// # Errors
    ///
    /// Returns `PluginError::Registration` if the name is empty, contains
    /// anything but ASCII letters, digits, or `_`, is already registered,
    /// or if the service exposes no methods or an invalid method name.
    pub fn register(&mut self, name: &str, service: impl Service) -> Result<()> {
        validate_name("service", name)?;
        if self.services.contains_key(name) {
            return Err(PluginError::Registration(format!(
                "service already defined: {name}"
            )));
        }

        let methods: HashSet<String> = service.methods().into_iter().collect();
        if methods.is_empty() {
            return Err(PluginError::Registration(format!(
                "type {name} has no methods"
            )));
        }
        for method in &methods {
            validate_name("method", method).map_err(|err| match err {
                PluginError::Registration(msg) => {
                    PluginError::Registration(format!("{name}: {msg}"))
                }
                other => other,
            })?;
        }

        debug!(service = name, methods = methods.len(), "service registered");
        Arc::make_mut(&mut self.services).insert(
            name.to_owned(),
            Registered {
                service: Arc::new(service),
                methods,
            },
        );
        Ok(())
    }

    /// Registered service names, sorted.
    #[must_use]
    pub fn services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.keys().cloned().collect();
        names.sort();
        names
    }

    /// Serve one connection with the default JSON-lines encoding.
    ///
    /// # Errors
    ///
    /// See [`serve_codec`](Self::serve_codec).
    pub async fn serve_conn<T: Transport>(&self, transport: T) -> Result<()> {
        self.serve_codec(transport, JsonLinesCodec::<Request>::new())
            .await
    }

    /// Serve one connection with `codec` until the peer disconnects.
    ///
    /// Waits for in-flight calls to finish, then closes the transport.
    ///
    /// # Errors
    ///
    /// Returns the transport or framing error that ended the connection.
    /// A clean end of stream returns `Ok(())`.
    pub async fn serve_codec<T, C>(&self, transport: T, codec: C) -> Result<()>
    where
        T: Transport,
        C: ServerCodec,
    {
        let span = info_span!("rpc_serve", services = ?self.services());
        async move {
            let (sink, mut requests): (SplitSink<Framed<T, C>, Response>, _) =
                Framed::new(transport, codec).split();
            let (response_tx, response_rx) = mpsc::channel(RESPONSE_QUEUE);
            let writer = tokio::spawn(write_responses(sink, response_rx).in_current_span());

            let outcome = loop {
                match requests.next().await {
                    Some(Ok(request)) => {
                        let services = Arc::clone(&self.services);
                        let response_tx = response_tx.clone();
                        tokio::spawn(
                            async move {
                                let response = dispatch(&services, request).await;
                                if response_tx.send(response).await.is_err() {
                                    debug!("response writer gone, dropping response");
                                }
                            }
                            .in_current_span(),
                        );
                    }
                    Some(Err(err)) => {
                        warn!(%err, "rpc connection failed");
                        break Err(err);
                    }
                    None => {
                        debug!("rpc peer disconnected");
                        break Ok(());
                    }
                }
            };

            drop(response_tx);
            let sink = writer
                .await
                .map_err(|err| PluginError::Io(format!("response writer failed: {err}")))?;
            let mut transport = requests
                .reunite(sink)
                .map_err(|_| PluginError::Io("transport halves do not match".into()))?
                .into_inner();
            if let Err(err) = transport.close().await {
                debug!(%err, "failed to close served transport");
            }

            outcome
        }
        .instrument(span)
        .await
    }
}

fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(PluginError::Registration(format!("no {kind} name")));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(PluginError::Registration(format!(
            "{kind} name {name:?} may only contain ASCII letters, digits, or '_'"
        )));
    }
    Ok(())
}

/// Write queued responses until every sender is gone or a write fails.
async fn write_responses<S>(mut sink: S, mut responses: mpsc::Receiver<Response>) -> S
where
    S: Sink<Response, Error = PluginError> + Unpin,
{
    while let Some(response) = responses.recv().await {
        let seq = response.seq;
        if let Err(err) = sink.send(response).await {
            warn!(seq, %err, "failed to write rpc response");
            break;
        }
    }
    sink
}

async fn dispatch(services: &HashMap<String, Registered>, request: Request) -> Response {
    let Request {
        seq,
        method,
        params,
    } = request;

    let outcome = match resolve(services, &method) {
        Ok((service, name)) => {
            debug!(seq, method = %method, "dispatching call");
            service.call(name, params).await
        }
        Err(message) => {
            debug!(seq, %message, "rejecting call");
            Err(message)
        }
    };

    Response::from_outcome(seq, method, outcome)
}

fn resolve<'a>(
    services: &'a HashMap<String, Registered>,
    target: &'a str,
) -> std::result::Result<(&'a Arc<dyn Service>, &'a str), String> {
    let Some((service, method)) = target.rsplit_once('.') else {
        return Err(format!("rpc: service/method request ill-formed: {target}"));
    };
    let registered = services
        .get(service)
        .ok_or_else(|| format!("rpc: can't find service {target}"))?;
    if !registered.methods.contains(method) {
        return Err(format!("rpc: can't find method {target}"));
    }
    Ok((&registered.service, method))
}
