#![forbid(unsafe_code)]

//! `stdio-plugin`: launch a plugin, make one call, and shut it down.
//!
//! ```text
//! stdio-plugin --method Echo.Echo --params '"ping"' -- ./echo-plugin
//! stdio-plugin --config plugin.toml --method Echo.Echo --params '"ping"'
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use stdio_plugin::{Launcher, PluginConfig, PluginError, Result, StderrSink};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "stdio-plugin", about = "Call a method on a stdio plugin", version, long_about = None)]
struct Cli {
    /// TOML file describing the plugin to launch.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Method to call, as `Service.Method`.
    #[arg(long)]
    method: String,

    /// JSON-encoded call argument.
    #[arg(long, default_value = "null")]
    params: String,

    /// Override the grace period between interrupt and kill.
    #[arg(long)]
    stop_timeout_ms: Option<u64>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Plugin executable and arguments; overrides `path`/`args` from the config.
    #[arg(last = true)]
    command: Vec<String>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| PluginError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = resolve_config(&args)?;
    let params: Value = serde_json::from_str(&args.params)
        .map_err(|err| PluginError::Config(format!("--params is not valid JSON: {err}")))?;

    let launcher = Launcher::from_config(&config);
    let client = launcher
        .start(StderrSink::Log, &config.path, &config.args)
        .await?;
    info!(path = %config.path.display(), "plugin launched");

    let outcome = client.call::<_, Value>(&args.method, params).await;

    match client.close().await {
        Ok(()) => info!("plugin stopped"),
        Err(err) if err.is_stop_timeout() => warn!(%err, "plugin had to be killed"),
        Err(err) => warn!(%err, "plugin did not shut down cleanly"),
    }

    let result = outcome?;
    let rendered = serde_json::to_string_pretty(&result)?;
    println!("{rendered}");
    Ok(())
}

/// Merge the config file (if any) with command-line overrides.
fn resolve_config(args: &Cli) -> Result<PluginConfig> {
    let mut config = match (&args.config, args.command.split_first()) {
        (Some(path), _) => PluginConfig::load_from_path(path)?,
        (None, Some((program, _))) => PluginConfig::new(program),
        (None, None) => {
            return Err(PluginError::Config(
                "either --config or a plugin command after `--` is required".into(),
            ))
        }
    };

    if let Some((program, rest)) = args.command.split_first() {
        config.path = PathBuf::from(program);
        config.args = rest.to_vec();
    }
    if let Some(ms) = args.stop_timeout_ms {
        config.stop_timeout_ms = ms;
    }
    config.validate()?;

    if config.stop_timeout() > Duration::from_secs(60) {
        warn!(timeout = ?config.stop_timeout(), "unusually long stop timeout");
    }
    Ok(config)
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| PluginError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| PluginError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
