//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, PluginError>;

/// Error enumeration covering every failure mode of a plugin's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    /// Spawning the child or creating one of its pipes failed.
    Launch(String),
    /// The API object offered to the RPC server has an invalid shape.
    Registration(String),
    /// The graceful-stop signal could not be delivered.
    Signal(String),
    /// The forced kill issued after the stop timeout failed.
    Kill(String),
    /// The process exited with a non-success status, carried as text.
    Exit(String),
    /// The process ignored the graceful stop and was killed after the timeout.
    ///
    /// Cleanup completed; callers usually log this and carry on.
    StopTimeout,
    /// Pipe, wait, or task-join failure.
    Io(String),
    /// Framing or (de)serialisation failure on the wire.
    Codec(String),
    /// Error reported by the remote method.
    Remote(String),
    /// The RPC connection has shut down.
    Shutdown,
    /// Configuration parsing or validation failure.
    Config(String),
}

impl PluginError {
    /// Whether this is the designed "killed after timeout" outcome.
    #[must_use]
    pub fn is_stop_timeout(&self) -> bool {
        matches!(self, Self::StopTimeout)
    }
}

impl Display for PluginError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Launch(msg) => write!(f, "launch: {msg}"),
            Self::Registration(msg) => write!(f, "registration: {msg}"),
            Self::Signal(msg) => write!(f, "signal: {msg}"),
            Self::Kill(msg) => write!(f, "error killing process after timeout: {msg}"),
            Self::Exit(status) => write!(f, "plugin exited unsuccessfully: {status}"),
            Self::StopTimeout => {
                write!(f, "process killed after timeout waiting for process to stop")
            }
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Codec(msg) => write!(f, "codec: {msg}"),
            Self::Remote(msg) => write!(f, "remote: {msg}"),
            Self::Shutdown => write!(f, "connection is shut down"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl std::error::Error for PluginError {}

impl From<std::io::Error> for PluginError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for PluginError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

impl From<toml::de::Error> for PluginError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}
