//! Host side: launch a plugin and talk to it over its stdio.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, info_span, Instrument};

use crate::config::{PluginConfig, DEFAULT_STOP_TIMEOUT};
use crate::process::{CommandFactory, OsCommandFactory, StderrSink};
use crate::rpc::{ClientCodec, JsonLinesCodec, Response, RpcClient, RpcServer};
use crate::transport::PipeTransport;
use crate::Result;

/// Client connected to a launched plugin with the default encoding.
pub type PluginClient = RpcClient<PipeTransport, JsonLinesCodec<Response>>;

/// Spawns plugins through an injected [`CommandFactory`].
#[derive(Clone)]
pub struct Launcher {
    factory: Arc<dyn CommandFactory>,
    stop_timeout: Duration,
}

impl Default for Launcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Launcher {
    /// Launcher spawning real OS processes with the default stop timeout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            factory: Arc::new(OsCommandFactory::new()),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    /// Launcher applying `config`'s environment, working directory, and
    /// stop timeout. The path and arguments are passed per launch.
    #[must_use]
    pub fn from_config(config: &PluginConfig) -> Self {
        let mut factory = OsCommandFactory::new().with_env(config.env.clone());
        if let Some(ref dir) = config.working_dir {
            factory = factory.with_working_dir(dir.clone());
        }
        Self {
            factory: Arc::new(factory),
            stop_timeout: config.stop_timeout(),
        }
    }

    /// Replace the command factory.
    #[must_use]
    pub fn with_factory(mut self, factory: Arc<dyn CommandFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Replace the grace period between the stop signal and the kill.
    #[must_use]
    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    /// Grace period between the stop signal and the kill.
    #[must_use]
    pub fn stop_timeout(&self) -> Duration {
        self.stop_timeout
    }

    /// Spawn `path args...` and wrap its stdio in a [`PipeTransport`].
    ///
    /// # Errors
    ///
    /// Returns `PluginError::Launch` if a pipe cannot be opened or the
    /// process cannot be started. Nothing is left open on failure.
    pub async fn spawn_pipe(
        &self,
        stderr: StderrSink,
        path: impl AsRef<Path>,
        args: &[String],
    ) -> Result<PipeTransport> {
        let path = path.as_ref();
        let span = info_span!("launch", program = %path.display());
        async move {
            let mut command = self.factory.make_command(stderr, path, args);
            let pipe = PipeTransport::start(command.as_mut(), self.stop_timeout).await?;
            info!(pid = pipe.id(), "plugin pipe ready");
            Ok(pipe)
        }
        .instrument(span)
        .await
    }

    /// Spawn a plugin and return a client speaking the default encoding.
    ///
    /// # Errors
    ///
    /// See [`spawn_pipe`](Self::spawn_pipe).
    pub async fn start(
        &self,
        stderr: StderrSink,
        path: impl AsRef<Path>,
        args: &[String],
    ) -> Result<PluginClient> {
        let pipe = self.spawn_pipe(stderr, path, args).await?;
        Ok(RpcClient::new(pipe))
    }

    /// Spawn a plugin and return a client speaking `codec`.
    ///
    /// # Errors
    ///
    /// See [`spawn_pipe`](Self::spawn_pipe).
    pub async fn start_codec<C: ClientCodec>(
        &self,
        codec: C,
        stderr: StderrSink,
        path: impl AsRef<Path>,
        args: &[String],
    ) -> Result<RpcClient<PipeTransport, C>> {
        let pipe = self.spawn_pipe(stderr, path, args).await?;
        Ok(RpcClient::with_codec(pipe, codec))
    }

    /// Spawn a child that calls *us*, and serve `server`'s API to it until
    /// it disconnects. The pipe is closed when serving ends.
    ///
    /// # Errors
    ///
    /// Returns launch failures, or the error that ended the connection.
    pub async fn serve_child(
        &self,
        server: &RpcServer,
        stderr: StderrSink,
        path: impl AsRef<Path>,
        args: &[String],
    ) -> Result<()> {
        let pipe = self.spawn_pipe(stderr, path, args).await?;
        server.serve_conn(pipe).await
    }
}
