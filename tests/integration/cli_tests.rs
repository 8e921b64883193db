//! Tests driving the `stdio-plugin` and `echo-plugin` binaries as processes.

use std::io::Write;
use std::process::{Command, Stdio};

const HOST_CLI: &str = env!("CARGO_BIN_EXE_stdio-plugin");
const ECHO_PLUGIN: &str = env!("CARGO_BIN_EXE_echo-plugin");

#[test]
fn cli_prints_call_result_as_json() {
    let output = Command::new(HOST_CLI)
        .args(["--method", "Echo.Echo", "--params", "\"ping\"", "--"])
        .arg(ECHO_PLUGIN)
        .output()
        .expect("run stdio-plugin");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "\"ping\"");
}

#[test]
fn cli_reads_plugin_from_config_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, "path = {ECHO_PLUGIN:?}\nargs = [\"--name\", \"Mirror\"]\nstop_timeout_ms = 500")
        .expect("write config");

    let output = Command::new(HOST_CLI)
        .arg("--config")
        .arg(file.path())
        .args(["--method", "Mirror.Echo", "--params", "\"from config\""])
        .output()
        .expect("run stdio-plugin");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let value: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout is JSON");
    assert_eq!(value, serde_json::json!("from config"));
}

#[test]
fn cli_fails_on_remote_error() {
    let output = Command::new(HOST_CLI)
        .args(["--method", "Echo.Fail", "--params", "\"nope\"", "--"])
        .arg(ECHO_PLUGIN)
        .output()
        .expect("run stdio-plugin");

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}

#[test]
fn cli_requires_a_plugin() {
    let output = Command::new(HOST_CLI)
        .args(["--method", "Echo.Echo"])
        .output()
        .expect("run stdio-plugin");

    assert!(!output.status.success());
}

/// An invalid service name is fatal for the plugin: it exits with status 1
/// before serving.
#[test]
fn plugin_with_invalid_name_exits_with_status_one() {
    let output = Command::new(ECHO_PLUGIN)
        .args(["--name", "not-valid"])
        .env("RUST_LOG", "info")
        .stdin(Stdio::null())
        .output()
        .expect("run echo-plugin");

    assert_eq!(output.status.code(), Some(1));
    assert!(
        String::from_utf8_lossy(&output.stderr).contains("failed to register plugin"),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}
