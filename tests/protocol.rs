//! Wire-protocol tests against a live daemon process.

mod common;

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use assert_cmd::cargo::cargo_bin;
use ird::client::Client;
use ird::codec::encode;
use ird::config;

struct Daemon {
    child: Child,
    socket: PathBuf,
    _dir: tempfile::TempDir,
}

impl Daemon {
    /// Start `ird serve` with the fixture config and wait for its socket.
    fn spawn(extra: &[&str]) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = common::write_config(&dir);
        let socket = dir.path().join("ird.sock");
        let child = Command::new(cargo_bin("ird"))
            .arg("serve")
            .arg("--config")
            .arg(&config)
            .arg("--socket")
            .arg(&socket)
            .args(extra)
            .env_remove("IRD_SOCKET")
            .env_remove("IRD_CONFIG")
            .env_remove("RUST_LOG")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("daemon spawns");

        let deadline = Instant::now() + Duration::from_secs(10);
        while !socket.exists() {
            assert!(Instant::now() < deadline, "daemon did not come up");
            std::thread::sleep(Duration::from_millis(20));
        }
        Self { child, socket, _dir: dir }
    }

    fn client(&self) -> Client {
        Client::connect(&self.socket).expect("client connects")
    }

    fn raw_stream(&self) -> UnixStream {
        let stream = UnixStream::connect(&self.socket).expect("raw connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("read timeout");
        stream
    }

    fn send_sighup(&self) {
        let status = Command::new("kill")
            .args(["-HUP", &self.child.id().to_string()])
            .status()
            .expect("kill runs");
        assert!(status.success());
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Write a request and read the raw reply up to its `END` line.
fn raw_roundtrip(stream: &mut UnixStream, request: &str) -> String {
    stream.write_all(request.as_bytes()).expect("request written");
    let mut reply = String::new();
    let mut reader = BufReader::new(stream.try_clone().expect("clone"));
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).expect("reply line");
        assert!(n > 0, "daemon closed the connection");
        reply.push_str(&line);
        if line == "END\n" {
            return reply;
        }
    }
}

#[test]
fn test_list_button_exact_envelope() {
    let daemon = Daemon::spawn(&["--driver", "mock"]);
    let mut stream = daemon.raw_stream();
    let reply = raw_roundtrip(&mut stream, "LIST tv POWER\n");
    assert_eq!(
        reply,
        "BEGIN\nLIST tv POWER\nSUCCESS\nDATA\n1\n0000000000000001 POWER\nEND\n"
    );
}

#[test]
fn test_version_and_error_keep_session_alive() {
    let daemon = Daemon::spawn(&["--driver", "mock"]);
    let mut client = daemon.client();

    let reply = client.request("VERSION", |_| {}).unwrap();
    assert!(reply.success);
    assert_eq!(reply.data, vec![env!("CARGO_PKG_VERSION").to_string()]);

    let reply = client.request("EXPLODE now", |_| {}).unwrap();
    assert!(!reply.success);

    // Same connection still answers.
    let reply = client.request("LIST", |_| {}).unwrap();
    assert!(reply.success);
    assert_eq!(reply.data, vec!["tv".to_string(), "amp".to_string()]);
}

#[test]
fn test_overlong_request_drops_only_that_client() {
    use std::io::Read;

    let daemon = Daemon::spawn(&["--driver", "mock"]);
    let mut stream = daemon.raw_stream();

    // 8 KiB with no newline: the daemon must hang up rather than buffer.
    stream.write_all(&[b'A'; 8192]).expect("flood written");
    let mut buf = [0u8; 16];
    let n = stream.read(&mut buf).expect("read after flood");
    assert_eq!(n, 0, "daemon should close the flooding connection");

    // Other clients are unaffected.
    let mut client = daemon.client();
    assert!(client.request("VERSION", |_| {}).unwrap().success);
}

#[test]
fn test_send_lifecycle_over_socket() {
    let daemon = Daemon::spawn(&["--driver", "mock"]);
    let mut client = daemon.client();

    assert!(client.request("SEND_ONCE amp VOLUME_UP", |_| {}).unwrap().success);
    assert!(client.request("SEND_START tv POWER", |_| {}).unwrap().success);

    // The repeating remote is busy.
    let reply = client.request("SEND_ONCE tv MUTE", |_| {}).unwrap();
    assert!(!reply.success);
    assert!(reply.data.join("\n").contains("busy repeating"));

    assert!(client.request("SEND_STOP tv POWER", |_| {}).unwrap().success);
    assert!(client.request("SEND_ONCE tv MUTE", |_| {}).unwrap().success);
}

#[test]
fn test_reload_notifies_connected_clients() {
    let daemon = Daemon::spawn(&["--driver", "mock"]);
    let mut client = daemon.client();
    assert!(client.request("VERSION", |_| {}).unwrap().success);

    daemon.send_sighup();
    std::thread::sleep(Duration::from_millis(400));

    let mut seen = Vec::new();
    let reply = client.request("LIST tv", |l| seen.push(l.to_string())).unwrap();
    assert!(seen.contains(&"SIGHUP".to_string()), "no reload notice in {seen:?}");
    // The connection survived the reload and the remote is still served.
    assert!(reply.success);
    assert_eq!(reply.data.len(), 2);
}

#[test]
fn test_decoded_press_is_broadcast() {
    let (daemon, input) = spawn_text_daemon();

    let mut stream = daemon.raw_stream();
    // Prove the connection is up before feeding samples.
    let reply = raw_roundtrip(&mut stream, "VERSION\n");
    assert!(reply.contains("SUCCESS"));

    append_power_frame(&input);

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).expect("broadcast line");
    assert_eq!(line, "0000000000000001 00 POWER tv\n");
}

#[test]
fn test_fatal_receive_error_unlinks_socket() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = common::write_config(&dir);
    let socket = dir.path().join("ird.sock");

    // A directory opens fine but fails on the first read, so every poll
    // reports a hardware failure.
    let mut child = Command::new(cargo_bin("ird"))
        .arg("serve")
        .arg("--config")
        .arg(&config)
        .arg("--socket")
        .arg(&socket)
        .arg("--driver")
        .arg("text")
        .arg("--input")
        .arg(dir.path())
        .env_remove("IRD_SOCKET")
        .env_remove("IRD_CONFIG")
        .env_remove("RUST_LOG")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("daemon spawns");

    let deadline = Instant::now() + Duration::from_secs(10);
    let status = loop {
        if let Some(status) = child.try_wait().expect("wait") {
            break status;
        }
        assert!(Instant::now() < deadline, "daemon did not exit");
        std::thread::sleep(Duration::from_millis(20));
    };
    assert!(!status.success());
    assert!(!socket.exists(), "socket file left behind after fatal error");
}

/// Spawn a text-driver daemon; returns it with the path of its (empty)
/// receive input file.
fn spawn_text_daemon() -> (Daemon, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = common::write_config(&dir);
    let socket = dir.path().join("ird.sock");
    let input = dir.path().join("input.txt");
    std::fs::write(&input, "").expect("input created");

    let child = Command::new(cargo_bin("ird"))
        .arg("serve")
        .arg("--config")
        .arg(&config)
        .arg("--socket")
        .arg(&socket)
        .arg("--driver")
        .arg("text")
        .arg("--input")
        .arg(&input)
        .env_remove("IRD_SOCKET")
        .env_remove("IRD_CONFIG")
        .env_remove("RUST_LOG")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("daemon spawns");

    let deadline = Instant::now() + Duration::from_secs(10);
    while !socket.exists() {
        assert!(Instant::now() < deadline, "daemon did not come up");
        std::thread::sleep(Duration::from_millis(20));
    }
    (Daemon { child, socket, _dir: dir }, input)
}

/// Append the tv POWER frame, in receive line format, to the input file.
fn append_power_frame(path: &Path) {
    let mut profiles = config::parse(common::TV_CONF.lines()).expect("fixture parses");
    let entry = profiles[0].entry_index("POWER").expect("POWER exists");
    let wf = encode(&mut profiles[0], entry, false).expect("encodes");

    let mut text = String::new();
    for s in &wf.samples {
        if s.is_pulse() {
            text.push_str(&format!("pulse {}\n", s.duration));
        } else {
            text.push_str(&format!("space {}\n", s.duration));
        }
    }
    text.push_str("space 1000000\n");

    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(path)
        .expect("input opens");
    file.write_all(text.as_bytes()).expect("frame appended");
    file.flush().expect("flush");
}
