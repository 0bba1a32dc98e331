//! Integration tests for the `tubeseg` binary.

use std::io::Write;
use std::net::TcpListener as StdTcpListener;

use assert_cmd::Command;
use futures::{SinkExt, StreamExt};
use predicates::prelude::*;
use serde_json::{Value, json};
use tempfile::NamedTempFile;
use tokio_tungstenite::tungstenite::Message;

fn tubeseg() -> Command {
    let mut cmd = Command::cargo_bin("tubeseg").unwrap();
    cmd.env_remove("BACKEND_HOST")
        .env_remove("BACKEND_PORT")
        .env_remove("TUBESEG_APPLICATION")
        .env("NO_COLOR", "1");
    cmd
}

fn free_port() -> u16 {
    let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn fast_config() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[retry]\nmax_attempts = 2\ninterval_ms = 10").unwrap();
    file
}

/// Answers `app.load_file` with image 1 and every `app.segment` with a
/// three-point tube.
fn reply_for(method: &str) -> Value {
    match method {
        "wslink.hello" => json!({ "clientID": "cli" }),
        "app.load_file" => json!(1),
        "app.segment" => json!({
            "uid": 0,
            "points": [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [2.0, 0.0, 0.0]],
            "radii": [1.0, 1.0, 1.0]
        }),
        _ => Value::Null,
    }
}

/// Serve one wslink client on a background thread.
fn spawn_backend() -> u16 {
    let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(message)) = ws.next().await {
                let Message::Text(text) = message else {
                    continue;
                };
                let request: Value = serde_json::from_str(&text).unwrap();
                let method = request["method"].as_str().unwrap_or_default();
                let reply = json!({ "wslink": "1.0", "id": request["id"], "result": reply_for(method) });
                if ws.send(Message::Text(reply.to_string().into())).await.is_err() {
                    break;
                }
            }
        });
    });
    port
}

#[test]
fn test_help_lists_commands() {
    tubeseg()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("check").and(predicate::str::contains("session")));
}

#[test]
fn test_config_uses_flags() {
    tubeseg()
        .args(["config", "--host", "10.1.2.3", "--port", "9123"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ws://10.1.2.3:9123/ws"));
}

#[test]
fn test_config_uses_environment() {
    tubeseg()
        .arg("config")
        .env("BACKEND_PORT", "45555")
        .assert()
        .success()
        .stdout(predicate::str::contains(":45555/ws"));
}

#[test]
fn test_missing_config_file_fails() {
    tubeseg()
        .args(["config", "--config", "/nonexistent/tubeseg.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_check_unreachable_backend_fails() {
    let config = fast_config();
    let port = free_port();

    tubeseg()
        .arg("check")
        .arg("--config")
        .arg(config.path())
        .args(["--port", &port.to_string()])
        .assert()
        .failure()
        .stdout(predicate::str::contains("Failed to connect"))
        .stderr(predicate::str::contains("not reachable"));
}

#[test]
fn test_check_json_reports_state() {
    let config = fast_config();
    let port = free_port();

    tubeseg()
        .args(["check", "--json", "--port", &port.to_string()])
        .arg("--config")
        .arg(config.path())
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"state\": \"failed\""));
}

#[test]
fn test_check_reachable_backend() {
    let port = spawn_backend();

    tubeseg()
        .args(["check", "--port", &port.to_string()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Ready"));
}

#[test]
fn test_session_segments_and_lists_tubes() {
    let port = spawn_backend();
    let script = "\
open a /data/a.mha
select a
segment 1 2 3
toggle 0
tubes
quit
";

    tubeseg()
        .args(["session", "--port", &port.to_string()])
        .write_stdin(script)
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Selected a")
                .and(predicate::str::contains("Added tube 0"))
                .and(predicate::str::contains("Toggled tube 0"))
                .and(predicate::str::contains("Points")),
        );
}

#[test]
fn test_session_reports_unknown_commands() {
    let port = spawn_backend();

    tubeseg()
        .args(["session", "--port", &port.to_string()])
        .write_stdin("select ghost\nfrobnicate\nscale abc\nlog\nquit\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Invalid scale"))
        .stderr(predicate::str::contains("Unknown image: ghost").and(predicate::str::contains("Unrecognized command")));
}
