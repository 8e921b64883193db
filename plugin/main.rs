#![forbid(unsafe_code)]

//! `echo-plugin`: a minimal plugin serving `Echo.Echo` and `Echo.Fail`.
//!
//! Launched by a host over stdio. Logs go to stderr, which the host forwards
//! to its own diagnostics.
//!
//! `SIGINT` ends serving with a clean exit. With `--ignore-interrupt` the
//! plugin ignores it instead and keeps running after the host disconnects,
//! so the host has to kill it.

use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use stdio_plugin::rpc::MethodTable;
use stdio_plugin::{Plugin, PluginError, Result};

const SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

#[derive(Debug, Parser)]
#[command(name = "echo-plugin", about = "Echo plugin for stdio-plugin hosts", version, long_about = None)]
struct Cli {
    /// Service name to register the API under.
    #[arg(long, default_value = "Echo")]
    name: String,

    /// Ignore the graceful-stop signal and linger after the host disconnects.
    #[arg(long)]
    ignore_interrupt: bool,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| PluginError::Config(format!("failed to build tokio runtime: {err}")))?;
    let outcome = runtime.block_on(run(args));
    // Stdin is read on a blocking thread that cannot be cancelled.
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    outcome
}

async fn run(args: Cli) -> Result<()> {
    let mut interrupts = listen_for_interrupts()?;

    let api = MethodTable::new()
        .method("Echo", |text: String| async move { Ok::<_, String>(text) })
        .method("Fail", |reason: String| async move {
            Err::<(), _>(format!("failed on request: {reason}"))
        });

    let exe = std::env::current_exe().unwrap_or_else(|_| "echo-plugin".into());
    let plugin = Plugin::new(&args.name, exe, api);

    if args.ignore_interrupt {
        tokio::spawn(async move {
            while interrupted(&mut interrupts).await {
                info!("ignoring interrupt");
            }
        });
        let outcome = plugin.serve().await;
        if let Err(ref err) = outcome {
            warn!(%err, "serving ended with an error");
        }
        info!("host disconnected, lingering until killed");
        std::future::pending::<()>().await;
        return outcome;
    }

    let outcome = tokio::select! {
        outcome = plugin.serve() => outcome,
        true = interrupted(&mut interrupts) => {
            info!("interrupted, shutting down");
            Ok(())
        }
    };
    if let Err(ref err) = outcome {
        warn!(%err, "serving ended with an error");
    }
    outcome
}

#[cfg(unix)]
type Interrupts = tokio::signal::unix::Signal;

#[cfg(not(unix))]
struct Interrupts;

/// Start listening before serving so an early `SIGINT` is not fatal.
#[cfg(unix)]
fn listen_for_interrupts() -> Result<Interrupts> {
    use tokio::signal::unix::{signal, SignalKind};

    signal(SignalKind::interrupt())
        .map_err(|err| PluginError::Config(format!("failed to install SIGINT handler: {err}")))
}

#[cfg(not(unix))]
fn listen_for_interrupts() -> Result<Interrupts> {
    Ok(Interrupts)
}

#[cfg(unix)]
async fn interrupted(interrupts: &mut Interrupts) -> bool {
    interrupts.recv().await.is_some()
}

#[cfg(not(unix))]
async fn interrupted(_interrupts: &mut Interrupts) -> bool {
    tokio::signal::ctrl_c().await.is_ok()
}

fn init_tracing() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init()
        .map_err(|err| PluginError::Config(format!("failed to init tracing: {err}")))
}
