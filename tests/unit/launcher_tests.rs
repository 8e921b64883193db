//! Unit tests for `Launcher` with injected command factories.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use stdio_plugin::rpc::{JsonLinesCodec, MethodTable, Response, RpcClient, RpcServer};
use stdio_plugin::{Launcher, PluginConfig, PluginError, Result, StderrSink, DEFAULT_STOP_TIMEOUT};

use super::test_doubles::{
    entries, new_log, DuplexFactory, LaunchFailures, MockFactory, MOCK_PID,
};

fn echo_server() -> RpcServer {
    let api = MethodTable::new()
        .method("Echo", |text: String| async move { Ok::<_, String>(text) });
    let mut server = RpcServer::new();
    server.register("Echo", api).expect("register");
    server
}

type Served = Arc<Mutex<Option<JoinHandle<Result<()>>>>>;

/// Factory whose child serves `server` in-process; the serve task is kept
/// in the returned slot.
fn serving_factory(server: RpcServer) -> (DuplexFactory, Served) {
    let served: Served = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&served);
    let factory = DuplexFactory::new(new_log(), move |plugin_end| {
        let server = server.clone();
        let task = tokio::spawn(async move { server.serve_conn(plugin_end).await });
        *slot.lock().expect("slot") = Some(task);
    });
    (factory, served)
}

// ── Construction ────────────────────────────────────────────────────────────

#[test]
fn new_launcher_uses_default_stop_timeout() {
    assert_eq!(Launcher::new().stop_timeout(), DEFAULT_STOP_TIMEOUT);
    assert_eq!(Launcher::default().stop_timeout(), DEFAULT_STOP_TIMEOUT);
}

#[test]
fn stop_timeout_comes_from_config_or_override() {
    let mut config = PluginConfig::new("echo-plugin");
    config.stop_timeout_ms = 250;

    let launcher = Launcher::from_config(&config);
    assert_eq!(launcher.stop_timeout(), Duration::from_millis(250));

    let launcher = launcher.with_stop_timeout(Duration::from_millis(10));
    assert_eq!(launcher.stop_timeout(), Duration::from_millis(10));
}

// ── Launch failures ─────────────────────────────────────────────────────────

/// A stdout failure is surfaced as a launch error after stdin is released.
#[tokio::test]
async fn spawn_pipe_releases_stdin_when_stdout_fails() {
    let log = new_log();
    let failures = LaunchFailures {
        stdout: Some("too many open files"),
        ..LaunchFailures::default()
    };
    let launcher = Launcher::new().with_factory(Arc::new(MockFactory::new(log.clone(), failures)));

    let err = launcher
        .spawn_pipe(StderrSink::Log, "plugin", &[])
        .await
        .err()
        .expect("launch must fail");

    assert!(matches!(err, PluginError::Launch(_)), "got {err:?}");
    assert_eq!(
        entries(&log),
        vec!["make_command", "stdin_pipe", "stdout_pipe", "close stdin"]
    );
}

/// No client is returned when the process cannot start, and both pipes are
/// released.
#[tokio::test]
async fn start_returns_no_client_when_process_fails() {
    let log = new_log();
    let failures = LaunchFailures {
        start: Some("no such file or directory"),
        ..LaunchFailures::default()
    };
    let launcher = Launcher::new().with_factory(Arc::new(MockFactory::new(log.clone(), failures)));

    let err = launcher
        .start(StderrSink::Log, "missing-plugin", &[])
        .await
        .err()
        .expect("launch must fail");

    assert_eq!(
        err,
        PluginError::Launch("failed to start process: no such file or directory".into())
    );
    assert_eq!(
        entries(&log),
        vec![
            "make_command",
            "stdin_pipe",
            "stdout_pipe",
            "start",
            "close stdout",
            "close stdin"
        ]
    );
}

#[tokio::test]
async fn spawn_pipe_reports_child_pid() {
    let log = new_log();
    let launcher = Launcher::new().with_factory(Arc::new(MockFactory::new(
        log.clone(),
        LaunchFailures::default(),
    )));

    let pipe = launcher
        .spawn_pipe(StderrSink::Log, "plugin", &[])
        .await
        .expect("launch");

    assert_eq!(pipe.id(), Some(MOCK_PID));
    assert_eq!(pipe.stop_timeout(), DEFAULT_STOP_TIMEOUT);
}

// ── In-memory plugins ───────────────────────────────────────────────────────

/// Launch, call, and close against an in-process plugin.
#[tokio::test]
async fn start_connects_client_to_plugin() {
    let (factory, served) = serving_factory(echo_server());
    let launcher = Launcher::new()
        .with_factory(Arc::new(factory))
        .with_stop_timeout(Duration::from_millis(50));

    let client = launcher
        .start(StderrSink::Log, "echo-plugin", &[])
        .await
        .expect("launch");
    let reply: String = client.call("Echo.Echo", "ping").await.expect("call");
    assert_eq!(reply, "ping");

    client.close().await.expect("close");

    let task = served.lock().expect("slot").take().expect("plugin started");
    let outcome = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("plugin must see the disconnect")
        .expect("join");
    assert_eq!(outcome, Ok(()));
}

/// `start_codec` speaks through the codec it is given.
#[tokio::test]
async fn start_codec_uses_supplied_codec() {
    let (factory, _served) = serving_factory(echo_server());
    let launcher = Launcher::new().with_factory(Arc::new(factory));

    let client = launcher
        .start_codec(
            JsonLinesCodec::<Response>::with_max_length(4096),
            StderrSink::Log,
            "echo-plugin",
            &[],
        )
        .await
        .expect("launch");
    let reply: String = client.call("Echo.Echo", "codec").await.expect("call");

    assert_eq!(reply, "codec");
    client.close().await.expect("close");
}

/// A child that calls back into the host is served until it hangs up.
#[tokio::test]
async fn serve_child_answers_calls_from_the_child() {
    let host_api = MethodTable::new()
        .method("Greet", |name: String| async move { Ok::<_, String>(format!("hello {name}")) });
    let mut server = RpcServer::new();
    server.register("Host", host_api).expect("register");

    let (reply_tx, reply_rx) = oneshot::channel();
    let reply_tx = Arc::new(Mutex::new(Some(reply_tx)));
    let factory = DuplexFactory::new(new_log(), move |plugin_end| {
        let reply_tx = reply_tx.lock().expect("reply slot").take();
        tokio::spawn(async move {
            let client = RpcClient::new(plugin_end);
            let reply = client.call::<_, String>("Host.Greet", "plugin").await;
            let _ = client.close().await;
            if let Some(tx) = reply_tx {
                let _ = tx.send(reply);
            }
        });
    });
    let launcher = Launcher::new()
        .with_factory(Arc::new(factory))
        .with_stop_timeout(Duration::from_millis(50));

    let served = tokio::time::timeout(
        Duration::from_secs(2),
        launcher.serve_child(&server, StderrSink::Log, "caller", &[]),
    )
    .await
    .expect("serving must end when the child hangs up");

    assert_eq!(served, Ok(()));
    let reply = reply_rx.await.expect("child reported").expect("call");
    assert_eq!(reply, "hello plugin");
}
