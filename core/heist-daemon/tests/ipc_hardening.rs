use heist_protocol::{Method, Request, Response, MAX_REQUEST_BYTES, PROTOCOL_VERSION};
use serde_json::{json, Value};
use std::fs;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

struct DaemonGuard {
    child: Child,
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn spawn_daemon(home: &Path) -> Child {
    Command::new(env!("CARGO_BIN_EXE_heist-daemon"))
        .env("HOME", home)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn heist-daemon")
}

fn socket_path(home: &Path) -> PathBuf {
    home.join(".heist").join("daemon.sock")
}

fn db_path(home: &Path) -> PathBuf {
    home.join(".heist").join("daemon").join("heist.db")
}

fn can_bind_socket(home: &Path) -> bool {
    let probe_path = home.join("probe.sock");
    match UnixListener::bind(&probe_path) {
        Ok(listener) => {
            drop(listener);
            let _ = fs::remove_file(&probe_path);
            true
        }
        Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => false,
        Err(_) => true,
    }
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if path.exists() && UnixStream::connect(path).is_ok() {
            return;
        }
        sleep(Duration::from_millis(25));
    }
    panic!("timed out waiting for daemon socket at {}", path.display());
}

fn send_request(socket: &Path, request: Request) -> Response {
    let mut stream = UnixStream::connect(socket).expect("failed to connect to daemon socket");
    serde_json::to_writer(&mut stream, &request).expect("failed to serialize request");
    stream.write_all(b"\n").expect("failed to write request");
    stream.flush().expect("failed to flush request");
    read_response(&mut stream)
}

fn send_raw_request(socket: &Path, payload: &[u8]) -> Response {
    let mut stream = UnixStream::connect(socket).expect("failed to connect to daemon socket");
    stream
        .write_all(payload)
        .expect("failed to write raw payload");
    stream.flush().expect("failed to flush raw payload");
    read_response(&mut stream)
}

fn read_response(stream: &mut UnixStream) -> Response {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk).expect("failed to read response");
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if chunk[..n].contains(&b'\n') {
            break;
        }
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let response_bytes = match newline_index {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    serde_json::from_slice(response_bytes).expect("failed to parse response JSON")
}

fn call(socket: &Path, method: Method, params: Option<Value>) -> Response {
    send_request(
        socket,
        Request {
            protocol_version: PROTOCOL_VERSION,
            method,
            id: None,
            params,
        },
    )
}

fn temp_home(prefix: &str) -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir_in("/tmp")
        .expect("failed to create temp HOME")
}

#[test]
fn daemon_handles_malformed_payload_flood_without_losing_health() {
    let home = temp_home("heist-daemon-hardening-malformed");
    if !can_bind_socket(home.path()) {
        eprintln!(
            "Skipping malformed flood hardening test: unix socket binding not permitted in this environment."
        );
        return;
    }

    let socket = socket_path(home.path());
    let child = spawn_daemon(home.path());
    let mut guard = Some(DaemonGuard { child });
    wait_for_socket(&socket, Duration::from_secs(5));

    for _ in 0..128 {
        let response = send_raw_request(&socket, b"{\"bad_json\": true\n");
        assert!(!response.ok, "malformed payload must be rejected");
        assert_eq!(
            response.error.as_ref().map(|err| err.code.as_str()),
            Some("invalid_json")
        );
    }

    let empty = send_raw_request(&socket, b"   \n");
    assert_eq!(
        empty.error.as_ref().map(|err| err.code.as_str()),
        Some("empty_request")
    );

    let health = call(&socket, Method::GetHealth, None);
    assert!(
        health.ok,
        "daemon should remain healthy after malformed flood"
    );

    drop(guard.take());
}

#[test]
fn daemon_rejects_oversized_request() {
    let home = temp_home("heist-daemon-hardening-oversized");
    if !can_bind_socket(home.path()) {
        eprintln!(
            "Skipping oversized request test: unix socket binding not permitted in this environment."
        );
        return;
    }

    let socket = socket_path(home.path());
    let child = spawn_daemon(home.path());
    let _guard = DaemonGuard { child };
    wait_for_socket(&socket, Duration::from_secs(5));

    let payload = vec![b'a'; MAX_REQUEST_BYTES + 1];
    let response = send_raw_request(&socket, &payload);
    assert!(!response.ok);
    assert_eq!(
        response.error.as_ref().map(|err| err.code.as_str()),
        Some("request_too_large")
    );
}

#[test]
fn daemon_idle_connection_returns_read_timeout_error() {
    let home = temp_home("heist-daemon-hardening-timeout");
    if !can_bind_socket(home.path()) {
        eprintln!(
            "Skipping timeout hardening test: unix socket binding not permitted in this environment."
        );
        return;
    }

    let socket = socket_path(home.path());
    let child = spawn_daemon(home.path());
    let mut guard = Some(DaemonGuard { child });
    wait_for_socket(&socket, Duration::from_secs(5));

    let mut idle = UnixStream::connect(&socket).expect("failed to connect idle stream");
    let response = read_response(&mut idle);
    assert!(!response.ok, "idle request should return an error");
    assert_eq!(
        response.error.as_ref().map(|err| err.code.as_str()),
        Some("read_timeout")
    );

    drop(guard.take());
}

#[test]
fn daemon_restart_keeps_targets_and_config() {
    let home = temp_home("heist-daemon-hardening-restart");
    if !can_bind_socket(home.path()) {
        eprintln!(
            "Skipping restart hardening test: unix socket binding not permitted in this environment."
        );
        return;
    }

    let socket = socket_path(home.path());
    let child = spawn_daemon(home.path());
    let mut guard = Some(DaemonGuard { child });
    wait_for_socket(&socket, Duration::from_secs(5));

    let upsert = call(
        &socket,
        Method::UpsertTarget,
        Some(json!({
            "community_id": "guild-1",
            "target_id": "casino",
            "crew_size": 6,
            "success": 0.3,
            "vault": 2000,
            "vault_max": 50000
        })),
    );
    assert!(upsert.ok, "upsert_target failed: {:?}", upsert.error);
    let update = call(
        &socket,
        Method::UpdateConfig,
        Some(json!({ "community_id": "guild-1", "bail": 900 })),
    );
    assert!(update.ok);

    drop(guard.take());
    assert!(db_path(home.path()).exists(), "database should survive shutdown");

    let child = spawn_daemon(home.path());
    guard = Some(DaemonGuard { child });
    wait_for_socket(&socket, Duration::from_secs(5));

    let targets = call(
        &socket,
        Method::ListTargets,
        Some(json!({ "community_id": "guild-1" })),
    );
    let targets = targets.data.expect("targets payload");
    assert_eq!(targets[0]["target_id"], "casino");
    assert_eq!(targets[0]["vault_max"], 50000);

    let config = call(
        &socket,
        Method::GetConfig,
        Some(json!({ "community_id": "guild-1" })),
    );
    assert_eq!(config.data.as_ref().map(|data| &data["bail"]), Some(&json!(900)));

    drop(guard.take());
}
