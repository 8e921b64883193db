//! Pipe transport over a child process's stdin/stdout.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{debug, info, warn};

use super::Transport;
use crate::process::{terminate, Commander, PipeReader, PipeWriter, ProcessHandle};
use crate::{PluginError, Result};

/// A child's stdout (read side), stdin (write side), and process handle.
///
/// All three are released together by [`Transport::close`].
pub struct PipeTransport {
    reader: Box<dyn PipeReader>,
    writer: Box<dyn PipeWriter>,
    process: Arc<dyn ProcessHandle>,
    stop_timeout: Duration,
    terminated: bool,
}

impl PipeTransport {
    /// Assemble a transport from already-open parts.
    #[must_use]
    pub fn new(
        reader: Box<dyn PipeReader>,
        writer: Box<dyn PipeWriter>,
        process: Arc<dyn ProcessHandle>,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            reader,
            writer,
            process,
            stop_timeout,
            terminated: false,
        }
    }

    /// Open the child's stdin and stdout pipes, then start it.
    ///
    /// Pipes opened before a failing step are closed before returning.
    ///
    /// # Errors
    ///
    /// Returns `PluginError::Launch` if a pipe cannot be created or the
    /// process cannot be started.
    pub async fn start(command: &mut dyn Commander, stop_timeout: Duration) -> Result<Self> {
        let mut writer = command
            .stdin_pipe()
            .map_err(|err| PluginError::Launch(format!("failed to open stdin pipe: {err}")))?;

        let mut reader = match command.stdout_pipe() {
            Ok(reader) => reader,
            Err(err) => {
                release_writer(writer.as_mut()).await;
                return Err(PluginError::Launch(format!(
                    "failed to open stdout pipe: {err}"
                )));
            }
        };

        match command.start() {
            Ok(process) => Ok(Self::new(reader, writer, process, stop_timeout)),
            Err(err) => {
                if let Err(close_err) = reader.close() {
                    debug!(%close_err, "failed to release stdout pipe after launch failure");
                }
                release_writer(writer.as_mut()).await;
                Err(PluginError::Launch(format!("failed to start process: {err}")))
            }
        }
    }

    /// OS process identifier of the child, if known.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.process.id()
    }

    /// Grace period the child gets after the stop signal.
    #[must_use]
    pub fn stop_timeout(&self) -> Duration {
        self.stop_timeout
    }
}

async fn release_writer(writer: &mut dyn PipeWriter) {
    if let Err(err) = writer.close().await {
        debug!(%err, "failed to release stdin pipe after launch failure");
    }
}

impl Transport for PipeTransport {
    /// Close the read end, the write end, then stop the process.
    ///
    /// Every step runs even if an earlier one failed; the error of the last
    /// failing step is returned and every failure is logged. The process is
    /// only stopped by the first close; later closes report it as finished.
    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let pid = self.process.id();
            let mut outcome = Ok(());

            if let Err(err) = self.reader.close() {
                warn!(pid, %err, "failed to close plugin stdout");
                outcome = Err(PluginError::Io(format!("close stdout: {err}")));
            }

            if let Err(err) = self.writer.close().await {
                warn!(pid, %err, "failed to close plugin stdin");
                outcome = Err(PluginError::Io(format!("close stdin: {err}")));
            }

            let stopped = if self.terminated {
                Err(PluginError::Signal("process already finished".into()))
            } else {
                self.terminated = true;
                terminate(&self.process, self.stop_timeout).await
            };

            match stopped {
                Ok(()) => debug!(pid, "plugin process stopped"),
                Err(err) => {
                    if err.is_stop_timeout() {
                        info!(pid, %err, "plugin process stop timed out");
                    } else {
                        warn!(pid, %err, "failed to stop plugin process");
                    }
                    outcome = Err(err);
                }
            }

            outcome
        })
    }
}

impl AsyncRead for PipeTransport {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.reader).poll_read(cx, buf)
    }
}

impl AsyncWrite for PipeTransport {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut *self.writer).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.writer).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.writer).poll_shutdown(cx)
    }
}
