//! Bounded graceful-then-forced process shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, info};

use super::ProcessHandle;
use crate::{PluginError, Result};

/// Stop `process`, escalating from an interrupt to a kill after `timeout`.
///
/// A background task waits for the exit while the interrupt is delivered.
/// Its result travels through a single-slot channel; once the timeout branch
/// is taken nobody reads it and the send is simply discarded when the wait
/// eventually completes.
///
/// # Errors
///
/// - `PluginError::Signal` if the interrupt could not be delivered (no wait).
/// - `PluginError::Exit` if the process exited with a non-success status,
///   including one that had already exited before the interrupt.
/// - `PluginError::Io` if collecting the exit status failed.
/// - `PluginError::StopTimeout` if the process had to be killed.
/// - `PluginError::Kill` if the kill after the timeout failed.
pub async fn terminate(process: &Arc<dyn ProcessHandle>, timeout: Duration) -> Result<()> {
    let pid = process.id();
    let (done_tx, done_rx) = oneshot::channel();

    let waiter = Arc::clone(process);
    tokio::spawn(async move {
        let outcome = waiter.wait().await;
        // The receiver is gone once the timeout branch has been taken.
        let _ = done_tx.send(outcome);
    });

    process
        .interrupt()
        .await
        .map_err(|err| PluginError::Signal(err.to_string()))?;
    debug!(pid, ?timeout, "interrupt sent, waiting for plugin to exit");

    match tokio::time::timeout(timeout, done_rx).await {
        Ok(Ok(Ok(status))) if status.success() => {
            debug!(pid, %status, "plugin stopped gracefully");
            Ok(())
        }
        Ok(Ok(Ok(status))) => {
            debug!(pid, %status, "plugin stopped with a failure status");
            Err(PluginError::Exit(status.to_string()))
        }
        Ok(Ok(Err(err))) => Err(PluginError::Io(format!("wait for plugin exit: {err}"))),
        Ok(Err(_)) => Err(PluginError::Io(
            "wait task ended without reporting an exit".into(),
        )),
        Err(_elapsed) => {
            process
                .kill()
                .await
                .map_err(|err| PluginError::Kill(err.to_string()))?;
            info!(pid, ?timeout, "plugin ignored interrupt and was killed");
            Err(PluginError::StopTimeout)
        }
    }
}
