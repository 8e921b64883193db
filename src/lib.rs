#![forbid(unsafe_code)]

//! Launch plugin processes and exchange request/response calls with them
//! over the child's stdin/stdout.
//!
//! - Host side: [`Launcher`] spawns the child, wraps its pipes in a
//!   [`PipeTransport`](transport::PipeTransport), and returns an
//!   [`RpcClient`](rpc::RpcClient). Closing the client closes both pipes and
//!   stops the child: interrupt first, kill after the stop timeout.
//! - Plugin side: [`Plugin`] registers an API and serves it over the
//!   process's own stdio.

pub mod config;
pub mod errors;
pub mod launcher;
pub mod plugin;
pub mod process;
pub mod rpc;
pub mod transport;

pub use config::{PluginConfig, DEFAULT_STOP_TIMEOUT};
pub use errors::{PluginError, Result};
pub use launcher::{Launcher, PluginClient};
pub use plugin::Plugin;
pub use process::StderrSink;
