//! Plugin side: serve an API to the host over this process's stdio.
//!
//! Stdout belongs to the transport once a [`Plugin`] exists. Anything meant
//! for humans, including tracing output, must go to stderr, which the host
//! forwards to its diagnostics sink.

use std::path::{Path, PathBuf};

use tracing::{error, info, info_span, Instrument};

use crate::rpc::{ClientCodec, RpcClient, RpcServer, ServerCodec, Service};
use crate::transport::{StdioStream, Transport};
use crate::Result;

/// A registered API bound to this process's stdin/stdout.
pub struct Plugin {
    name: String,
    path: PathBuf,
    server: RpcServer,
    stream: StdioStream,
}

impl Plugin {
    /// Register `api` under `name` on a fresh server bound to stdio.
    ///
    /// `path` is recorded for diagnostics only.
    ///
    /// # Errors
    ///
    /// Returns `PluginError::Registration` if `api` cannot be registered.
    pub fn try_new(name: &str, path: impl Into<PathBuf>, api: impl Service) -> Result<Self> {
        let mut server = RpcServer::new();
        server.register(name, api)?;
        Ok(Self {
            name: name.to_owned(),
            path: path.into(),
            server,
            stream: StdioStream::current(),
        })
    }

    /// Like [`try_new`](Self::try_new), but a registration failure is fatal:
    /// it is logged and the process exits with status 1.
    #[must_use]
    pub fn new(name: &str, path: impl Into<PathBuf>, api: impl Service) -> Self {
        match Self::try_new(name, path, api) {
            Ok(plugin) => plugin,
            Err(err) => {
                error!(plugin = name, %err, "failed to register plugin");
                std::process::exit(1);
            }
        }
    }

    /// Registered service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Descriptive path given at construction.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serve the host with the default encoding until it disconnects.
    ///
    /// # Errors
    ///
    /// Returns the transport or framing error that ended the connection.
    pub async fn serve(self) -> Result<()> {
        let span = info_span!("plugin", name = %self.name, path = %self.path.display());
        async move {
            info!("serving host over stdio");
            let outcome = self.server.serve_conn(self.stream).await;
            info!("host disconnected");
            outcome
        }
        .instrument(span)
        .await
    }

    /// Serve the host with `codec` until it disconnects.
    ///
    /// # Errors
    ///
    /// Returns the transport or framing error that ended the connection.
    pub async fn serve_codec<C: ServerCodec>(self, codec: C) -> Result<()> {
        let span = info_span!("plugin", name = %self.name, path = %self.path.display());
        async move {
            info!("serving host over stdio");
            let outcome = self.server.serve_codec(self.stream, codec).await;
            info!("host disconnected");
            outcome
        }
        .instrument(span)
        .await
    }

    /// Release stdio without serving.
    ///
    /// # Errors
    ///
    /// Returns the failure reported while closing stdin or stdout.
    pub async fn close(mut self) -> Result<()> {
        self.stream.close().await
    }
}

/// Client for calling back into a host that serves an API over our stdio.
///
/// The counterpart of [`Launcher::serve_child`](crate::launcher::Launcher::serve_child).
#[must_use]
pub fn connect_host() -> RpcClient<StdioStream> {
    RpcClient::new(StdioStream::current())
}

/// [`connect_host`] with a caller-supplied encoding.
#[must_use]
pub fn connect_host_codec<C: ClientCodec>(codec: C) -> RpcClient<StdioStream, C> {
    RpcClient::with_codec(StdioStream::current(), codec)
}
