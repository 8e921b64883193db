//! OS-backed process capabilities built on `tokio::process`.
//!
//! - Children are spawned with `kill_on_drop(true)` so a dropped command
//!   never leaves a stray process behind.
//! - Pipe ends handed out before `start` are unbound placeholders; `start`
//!   binds them to the spawned child's stdio.
//! - One watcher task per child reaps it and publishes the exit status, so
//!   `wait` can run concurrently with `interrupt`/`kill`. Signals go through
//!   the same task.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use super::{CommandFactory, Commander, PipeReader, PipeWriter, ProcessHandle, StderrSink};

fn already_closed() -> io::Error {
    io::Error::other("pipe already closed")
}

fn already_started() -> io::Error {
    io::Error::other("pipe requested after process started")
}

fn already_finished() -> io::Error {
    io::Error::other("process already finished")
}

// ── Pipe ends ────────────────────────────────────────────────────────────────

enum Slot<T> {
    Unbound,
    Open(T),
    Closed,
}

/// Parent-side end of one of the child's stdio pipes.
///
/// Unbound until the child starts; reading or writing before then fails
/// with `NotConnected`. Closing an unbound end detaches the stream from
/// the child entirely.
pub struct ChildPipe<T> {
    slot: Arc<Mutex<Slot<T>>>,
}

impl<T> ChildPipe<T> {
    fn unbound() -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot::Unbound)),
        }
    }

    fn share(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, Slot<T>>> {
        self.slot
            .lock()
            .map_err(|_| io::Error::other("pipe lock poisoned"))
    }

    fn bind(&self, stream: T) -> io::Result<()> {
        let mut slot = self.lock()?;
        if matches!(*slot, Slot::Unbound) {
            *slot = Slot::Open(stream);
        }
        Ok(())
    }

    fn take(&self) -> io::Result<Option<T>> {
        let mut slot = self.lock()?;
        match std::mem::replace(&mut *slot, Slot::Closed) {
            Slot::Open(stream) => Ok(Some(stream)),
            Slot::Unbound => Ok(None),
            Slot::Closed => Err(already_closed()),
        }
    }

    fn poll_open<R>(
        &self,
        op: impl FnOnce(Pin<&mut T>) -> Poll<io::Result<R>>,
    ) -> Poll<io::Result<R>>
    where
        T: Unpin,
    {
        let mut slot = match self.lock() {
            Ok(slot) => slot,
            Err(err) => return Poll::Ready(Err(err)),
        };
        match &mut *slot {
            Slot::Open(stream) => op(Pin::new(stream)),
            Slot::Unbound => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "process not started",
            ))),
            Slot::Closed => Poll::Ready(Err(already_closed())),
        }
    }
}

impl AsyncRead for ChildPipe<ChildStdout> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.poll_open(|stdout| stdout.poll_read(cx, buf))
    }
}

impl PipeReader for ChildPipe<ChildStdout> {
    fn close(&mut self) -> io::Result<()> {
        self.take().map(drop)
    }
}

impl AsyncWrite for ChildPipe<ChildStdin> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.poll_open(|stdin| stdin.poll_write(cx, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.poll_open(|stdin| stdin.poll_flush(cx))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.poll_open(|stdin| stdin.poll_shutdown(cx))
    }
}

impl PipeWriter for ChildPipe<ChildStdin> {
    fn close(&mut self) -> Pin<Box<dyn Future<Output = io::Result<()>> + Send + '_>> {
        Box::pin(async move {
            if let Some(mut stdin) = self.take()? {
                stdin.shutdown().await?;
            }
            Ok(())
        })
    }
}

// ── Command ──────────────────────────────────────────────────────────────────

/// A `tokio::process::Command` behind the [`Commander`] capability.
pub struct OsCommand {
    command: Command,
    program: String,
    stderr: Option<StderrSink>,
    stdin: Option<ChildPipe<ChildStdin>>,
    stdout: Option<ChildPipe<ChildStdout>>,
    started: bool,
}

impl OsCommand {
    /// Prepare `path args...`; stdin and stdout stay detached until requested.
    #[must_use]
    pub fn new(stderr: StderrSink, path: &Path, args: &[String]) -> Self {
        let mut command = Command::new(path);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        Self {
            command,
            program: path.display().to_string(),
            stderr: Some(stderr),
            stdin: None,
            stdout: None,
            started: false,
        }
    }

    /// Underlying command, for environment and working-directory tweaks.
    pub fn command_mut(&mut self) -> &mut Command {
        &mut self.command
    }
}

impl Commander for OsCommand {
    fn stdin_pipe(&mut self) -> io::Result<Box<dyn PipeWriter>> {
        if self.started {
            return Err(already_started());
        }
        if self.stdin.is_some() {
            return Err(io::Error::other("stdin pipe already requested"));
        }

        let pipe = ChildPipe::unbound();
        let handle = pipe.share();
        self.command.stdin(Stdio::piped());
        self.stdin = Some(pipe);
        Ok(Box::new(handle))
    }

    fn stdout_pipe(&mut self) -> io::Result<Box<dyn PipeReader>> {
        if self.started {
            return Err(already_started());
        }
        if self.stdout.is_some() {
            return Err(io::Error::other("stdout pipe already requested"));
        }

        let pipe = ChildPipe::unbound();
        let handle = pipe.share();
        self.command.stdout(Stdio::piped());
        self.stdout = Some(pipe);
        Ok(Box::new(handle))
    }

    fn start(&mut self) -> io::Result<Arc<dyn ProcessHandle>> {
        if self.started {
            return Err(io::Error::other("process already started"));
        }
        self.started = true;

        let mut child = self.command.spawn()?;

        if let (Some(pipe), Some(stdin)) = (&self.stdin, child.stdin.take()) {
            pipe.bind(stdin)?;
        }
        if let (Some(pipe), Some(stdout)) = (&self.stdout, child.stdout.take()) {
            pipe.bind(stdout)?;
        }
        if let (Some(sink), Some(stderr)) = (self.stderr.take(), child.stderr.take()) {
            tokio::spawn(forward_stderr(stderr, sink, self.program.clone()));
        }

        info!(
            program = %self.program,
            pid = child.id().unwrap_or(0),
            "plugin process started"
        );

        Ok(Arc::new(OsProcess::watch(child)))
    }
}

/// Drain the child's stderr into `sink` until the child closes it.
async fn forward_stderr(stderr: ChildStderr, sink: StderrSink, program: String) {
    match sink {
        StderrSink::Log => {
            let mut lines = BufReader::new(stderr).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => info!(program = %program, "{line}"),
                    Ok(None) => break,
                    Err(err) => {
                        debug!(program = %program, %err, "stopped reading plugin stderr");
                        break;
                    }
                }
            }
        }
        StderrSink::Writer(mut writer) => {
            let mut stderr = stderr;
            if let Err(err) = tokio::io::copy(&mut stderr, &mut writer).await {
                debug!(program = %program, %err, "stopped copying plugin stderr");
            }
            if let Err(err) = writer.flush().await {
                debug!(program = %program, %err, "failed to flush stderr sink");
            }
        }
    }
}

/// Builds [`OsCommand`]s with shared environment and working directory.
#[derive(Debug, Clone, Default)]
pub struct OsCommandFactory {
    env: HashMap<String, String>,
    working_dir: Option<PathBuf>,
}

impl OsCommandFactory {
    /// Factory that inherits the parent's environment and working directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set extra environment variables on every child.
    #[must_use]
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Start every child in `dir`.
    #[must_use]
    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }
}

impl CommandFactory for OsCommandFactory {
    fn make_command(
        &self,
        stderr: StderrSink,
        path: &Path,
        args: &[String],
    ) -> Box<dyn Commander> {
        let mut command = OsCommand::new(stderr, path, args);
        command.command_mut().envs(&self.env);
        if let Some(ref dir) = self.working_dir {
            command.command_mut().current_dir(dir);
        }
        Box::new(command)
    }
}

// ── Process handle ───────────────────────────────────────────────────────────

type ExitOutcome = std::result::Result<ExitStatus, String>;

type Reply = oneshot::Sender<io::Result<()>>;

enum Control {
    Interrupt(Reply),
    Kill(Reply),
}

/// Handle to a spawned child owned by a watcher task.
///
/// The watcher reaps the child and publishes its exit status. Signals are
/// routed through it as well, so they only ever reach a child that has not
/// been reaped yet and whose pid therefore cannot have been reused.
///
/// Dropping the handle while the child is still running kills it.
pub struct OsProcess {
    pid: Option<u32>,
    exit: watch::Receiver<Option<ExitOutcome>>,
    control: mpsc::UnboundedSender<Control>,
}

impl OsProcess {
    /// Take ownership of `child` and start reaping it in the background.
    #[must_use]
    pub fn watch(child: Child) -> Self {
        let pid = child.id();
        let (exit_tx, exit) = watch::channel(None);
        let (control, control_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let outcome = supervise(child, control_rx)
                .await
                .map_err(|err| err.to_string());
            match &outcome {
                Ok(status) => debug!(pid, %status, "plugin process exited"),
                Err(err) => warn!(pid, %err, "failed to collect plugin exit status"),
            }
            exit_tx.send_replace(Some(outcome));
        });

        Self { pid, exit, control }
    }

    fn request(
        &self,
        control: fn(Reply) -> Control,
        on_exited: fn() -> io::Result<()>,
    ) -> Pin<Box<dyn Future<Output = io::Result<()>> + Send + '_>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let queued = self.control.send(control(reply_tx)).is_ok();
        Box::pin(async move {
            if !queued {
                return on_exited();
            }
            // A dropped reply means the watcher saw the exit first.
            reply_rx.await.unwrap_or_else(|_| on_exited())
        })
    }
}

/// Wait for `child` while serving signal requests against it.
///
/// Closing the control channel kills the child.
async fn supervise(
    mut child: Child,
    mut control: mpsc::UnboundedReceiver<Control>,
) -> io::Result<ExitStatus> {
    loop {
        tokio::select! {
            status = child.wait() => return status,
            request = control.recv() => match request {
                Some(Control::Interrupt(reply)) => {
                    let _ = reply.send(interrupt_child(&mut child));
                }
                Some(Control::Kill(reply)) => {
                    let _ = reply.send(kill_child(&mut child));
                }
                None => {
                    match kill_child(&mut child) {
                        Ok(()) => debug!(pid = child.id(), "killed plugin process on drop"),
                        Err(err) => debug!(%err, "plugin process already gone on drop"),
                    }
                    return child.wait().await;
                }
            },
        }
    }
}

/// An exited child needs no interrupt; its status is collected by the wait.
fn interrupt_child(child: &mut Child) -> io::Result<()> {
    if child.try_wait()?.is_some() {
        return Ok(());
    }

    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let pid = child.id().ok_or_else(already_finished)?;
        let pid = i32::try_from(pid)
            .map_err(|_| io::Error::other(format!("pid {pid} out of range")))?;
        kill(Pid::from_raw(pid), Signal::SIGINT).map_err(io::Error::from)
    }

    #[cfg(not(unix))]
    {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "graceful stop is not supported on this platform",
        ))
    }
}

fn kill_child(child: &mut Child) -> io::Result<()> {
    if child.try_wait()?.is_some() {
        return Err(already_finished());
    }
    child.start_kill()
}

impl ProcessHandle for OsProcess {
    fn id(&self) -> Option<u32> {
        self.pid
    }

    fn wait(&self) -> Pin<Box<dyn Future<Output = io::Result<ExitStatus>> + Send + '_>> {
        let mut exit = self.exit.clone();
        Box::pin(async move {
            let observed = exit.wait_for(Option::is_some).await;
            let outcome = match observed {
                Ok(outcome) => outcome.clone(),
                Err(_) => None,
            };
            match outcome {
                Some(Ok(status)) => Ok(status),
                Some(Err(msg)) => Err(io::Error::other(msg)),
                None => Err(io::Error::other("process watcher stopped before exit")),
            }
        })
    }

    fn interrupt(&self) -> Pin<Box<dyn Future<Output = io::Result<()>> + Send + '_>> {
        self.request(Control::Interrupt, || Ok(()))
    }

    fn kill(&self) -> Pin<Box<dyn Future<Output = io::Result<()>> + Send + '_>> {
        self.request(Control::Kill, || Err(already_finished()))
    }
}
