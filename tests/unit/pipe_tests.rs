//! Unit tests for `PipeTransport` launch and close sequencing.
//!
//! Covers:
//! - close runs read, write, then terminate for every combination of step
//!   failures and returns the last failure
//! - partial launch failures release the pipes already opened
//! - a second close neither panics nor hangs

use std::time::Duration;

use stdio_plugin::transport::{PipeTransport, Transport};
use stdio_plugin::PluginError;

use super::test_doubles::{
    entries, new_log, CallLog, LaunchFailures, MockCommander, MockProcess, MockReader, MockWriter,
    MOCK_PID,
};

const STOP_TIMEOUT: Duration = Duration::from_millis(50);

fn transport(
    log: &CallLog,
    read_fails: bool,
    write_fails: bool,
    stop_fails: bool,
) -> PipeTransport {
    let reader = MockReader::new(log.clone(), read_fails.then_some("read end broken"));
    let writer = MockWriter::new(log.clone(), write_fails.then_some("write end broken"));
    let mut process = MockProcess::new(log.clone());
    if stop_fails {
        process = process.failing_interrupt("signal refused");
    }
    PipeTransport::new(
        Box::new(reader),
        Box::new(writer),
        process.into_handle(),
        STOP_TIMEOUT,
    )
}

// ── Close ───────────────────────────────────────────────────────────────────

/// All eight success/failure combinations: every step runs in order and the
/// last failing step decides the result.
#[tokio::test]
async fn close_attempts_every_step_and_returns_last_error() {
    for read_fails in [false, true] {
        for write_fails in [false, true] {
            for stop_fails in [false, true] {
                let log = new_log();
                let mut pipe = transport(&log, read_fails, write_fails, stop_fails);

                let result = pipe.close().await;

                let expected = if stop_fails {
                    Err(PluginError::Signal("signal refused".into()))
                } else if write_fails {
                    Err(PluginError::Io("close stdin: write end broken".into()))
                } else if read_fails {
                    Err(PluginError::Io("close stdout: read end broken".into()))
                } else {
                    Ok(())
                };
                let case = format!("read={read_fails} write={write_fails} stop={stop_fails}");
                assert_eq!(result, expected, "{case}");
                assert_eq!(
                    entries(&log),
                    vec!["close stdout", "close stdin", "interrupt"],
                    "{case}: every step must run in order"
                );
            }
        }
    }
}

#[tokio::test]
async fn close_returns_stop_timeout_when_process_ignores_interrupt() {
    let log = new_log();
    let process = MockProcess::new(log.clone()).ignoring_interrupt();
    let mut pipe = PipeTransport::new(
        Box::new(MockReader::new(log.clone(), None)),
        Box::new(MockWriter::new(log.clone(), None)),
        process.into_handle(),
        STOP_TIMEOUT,
    );

    let err = pipe.close().await.expect_err("process had to be killed");

    assert!(err.is_stop_timeout());
    assert_eq!(
        entries(&log),
        vec!["close stdout", "close stdin", "interrupt", "kill"]
    );
}

/// Closing twice completes; the doubles simply see the steps again.
#[tokio::test]
async fn second_close_does_not_hang() {
    let log = new_log();
    let mut pipe = transport(&log, false, false, false);

    pipe.close().await.expect("first close");
    let second = tokio::time::timeout(Duration::from_secs(2), pipe.close())
        .await
        .expect("second close must not hang");

    assert_eq!(
        second,
        Err(PluginError::Signal("process already finished".into()))
    );
    assert_eq!(
        entries(&log),
        vec!["close stdout", "close stdin", "interrupt", "close stdout", "close stdin"],
        "the process is only stopped once"
    );
}

/// A child that quit on its own before close is not an error when it exited
/// successfully.
#[tokio::test]
async fn close_after_clean_exit_is_ok() {
    let log = new_log();
    let process = MockProcess::new(log.clone()).already_exited();
    let mut pipe = PipeTransport::new(
        Box::new(MockReader::new(log.clone(), None)),
        Box::new(MockWriter::new(log.clone(), None)),
        process.into_handle(),
        STOP_TIMEOUT,
    );

    assert_eq!(pipe.close().await, Ok(()));
}

// ── Launch ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn start_opens_pipes_before_starting() {
    let log = new_log();
    let mut command = MockCommander::new(log.clone(), LaunchFailures::default());

    let pipe = PipeTransport::start(&mut command, STOP_TIMEOUT)
        .await
        .expect("launch must succeed");

    assert_eq!(entries(&log), vec!["stdin_pipe", "stdout_pipe", "start"]);
    assert_eq!(pipe.id(), Some(MOCK_PID));
    assert_eq!(pipe.stop_timeout(), STOP_TIMEOUT);
}

#[tokio::test]
async fn stdin_failure_opens_nothing_else() {
    let log = new_log();
    let failures = LaunchFailures {
        stdin: Some("no fds"),
        ..LaunchFailures::default()
    };
    let mut command = MockCommander::new(log.clone(), failures);

    let err = PipeTransport::start(&mut command, STOP_TIMEOUT)
        .await
        .err()
        .expect("launch must fail");

    assert_eq!(
        err,
        PluginError::Launch("failed to open stdin pipe: no fds".into())
    );
    assert_eq!(entries(&log), vec!["stdin_pipe"]);
}

/// A stdout pipe failure closes the stdin pipe already opened.
#[tokio::test]
async fn stdout_failure_closes_stdin() {
    let log = new_log();
    let failures = LaunchFailures {
        stdout: Some("no fds"),
        ..LaunchFailures::default()
    };
    let mut command = MockCommander::new(log.clone(), failures);

    let err = PipeTransport::start(&mut command, STOP_TIMEOUT)
        .await
        .err()
        .expect("launch must fail");

    assert_eq!(
        err,
        PluginError::Launch("failed to open stdout pipe: no fds".into())
    );
    assert_eq!(
        entries(&log),
        vec!["stdin_pipe", "stdout_pipe", "close stdin"]
    );
}

/// A start failure closes stdout, then stdin.
#[tokio::test]
async fn start_failure_closes_both_pipes() {
    let log = new_log();
    let failures = LaunchFailures {
        start: Some("no such file"),
        ..LaunchFailures::default()
    };
    let mut command = MockCommander::new(log.clone(), failures);

    let err = PipeTransport::start(&mut command, STOP_TIMEOUT)
        .await
        .err()
        .expect("launch must fail");

    assert_eq!(
        err,
        PluginError::Launch("failed to start process: no such file".into())
    );
    assert_eq!(
        entries(&log),
        vec![
            "stdin_pipe",
            "stdout_pipe",
            "start",
            "close stdout",
            "close stdin"
        ]
    );
}
