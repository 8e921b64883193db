//! Child process capabilities.
//!
//! The launcher never touches `tokio::process` directly. It works through
//! three small capability traits so the launch mechanism can be swapped for a
//! test double:
//!
//! - [`Commander`]: hands out the child's stdin/stdout pipes, then starts it.
//! - [`ProcessHandle`]: waits for, interrupts, or kills the running child.
//! - [`PipeReader`] / [`PipeWriter`]: parent-side pipe ends with an explicit close.
//!
//! A [`CommandFactory`] builds one [`Commander`] per launch and is injected
//! into the [`Launcher`](crate::launcher::Launcher).

pub mod os;
pub mod terminator;

use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::process::ExitStatus;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

pub use os::{OsCommand, OsCommandFactory, OsProcess};
pub use terminator::terminate;

/// Readable end of a pipe connected to the child's stdout.
pub trait PipeReader: AsyncRead + Send + Unpin {
    /// Release the read end. Closing twice reports an error.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the end was already closed.
    fn close(&mut self) -> io::Result<()>;
}

/// Writable end of a pipe connected to the child's stdin.
pub trait PipeWriter: AsyncWrite + Send + Unpin {
    /// Flush and release the write end, signalling EOF to the child.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the flush fails or the end was already closed.
    fn close(&mut self) -> Pin<Box<dyn Future<Output = io::Result<()>> + Send + '_>>;
}

/// A running child process.
///
/// `wait` may be awaited from one task while another calls `interrupt` or
/// `kill`, so every method takes `&self`.
pub trait ProcessHandle: Send + Sync {
    /// OS process identifier, if still known.
    fn id(&self) -> Option<u32>;

    /// Resolve once the process has exited.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the exit status could not be collected.
    fn wait(&self) -> Pin<Box<dyn Future<Output = io::Result<ExitStatus>> + Send + '_>>;

    /// Ask the process to stop (`SIGINT` on Unix).
    ///
    /// A process that has already exited but whose status has not been
    /// collected by [`wait`](ProcessHandle::wait) needs no signal; this
    /// succeeds and `wait` reports how it ended.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the signal cannot be delivered.
    fn interrupt(&self) -> Pin<Box<dyn Future<Output = io::Result<()>> + Send + '_>>;

    /// Terminate the process forcefully (`SIGKILL` on Unix).
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the kill cannot be delivered, for example
    /// because the process already finished.
    fn kill(&self) -> Pin<Box<dyn Future<Output = io::Result<()>> + Send + '_>>;
}

/// A launchable child process.
///
/// Pipes must be requested before [`start`](Commander::start); the
/// command cannot be started twice.
pub trait Commander: Send {
    /// Writable stream connected to the child's stdin.
    ///
    /// # Errors
    ///
    /// Fails if the pipe cannot be created or the process already started.
    fn stdin_pipe(&mut self) -> io::Result<Box<dyn PipeWriter>>;

    /// Readable stream connected to the child's stdout.
    ///
    /// # Errors
    ///
    /// Fails if the pipe cannot be created or the process already started.
    fn stdout_pipe(&mut self) -> io::Result<Box<dyn PipeReader>>;

    /// Launch the child.
    ///
    /// # Errors
    ///
    /// Fails if the executable cannot be found or executed, or if the
    /// command was already started.
    fn start(&mut self) -> io::Result<Arc<dyn ProcessHandle>>;
}

/// Builds a [`Commander`] for each launch.
pub trait CommandFactory: Send + Sync {
    /// Prepare (but do not start) `path args...` with stderr routed to `stderr`.
    fn make_command(&self, stderr: StderrSink, path: &Path, args: &[String])
        -> Box<dyn Commander>;
}

/// Destination for the child's stderr.
///
/// Stdin and stdout carry the transport, so stderr is the only diagnostics
/// channel a plugin has.
#[derive(Default)]
pub enum StderrSink {
    /// Re-emit each stderr line as an `INFO` tracing event.
    #[default]
    Log,
    /// Copy stderr bytes verbatim into the writer.
    Writer(Box<dyn AsyncWrite + Send + Unpin>),
}

impl Debug for StderrSink {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Log => f.write_str("StderrSink::Log"),
            Self::Writer(_) => f.write_str("StderrSink::Writer(..)"),
        }
    }
}
