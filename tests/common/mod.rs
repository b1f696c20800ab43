//! Common test utilities for agentmeshd integration tests.
//!
//! Provides `TestEnv` for isolated test environments that don't touch the
//! user's `~/.agentmesh/` directory.

#![allow(dead_code)]

use assert_cmd::Command;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;
pub use tempfile::TempDir;

/// A test environment with an isolated data directory.
///
/// The `agentmeshd()` method returns a `Command` that sets
/// `AGENTMESH_DATA_DIR` per invocation, making tests parallel-safe. Any
/// daemon started from the environment is stopped when it is dropped.
pub struct TestEnv {
    pub data_dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            data_dir: TempDir::new().unwrap(),
        }
    }

    /// Get a Command for the agentmeshd binary with isolated data directory.
    pub fn agentmeshd(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_agentmeshd"));
        cmd.env("AGENTMESH_DATA_DIR", self.data_dir.path());
        cmd.env_remove("AGENTMESH_DAEMON_URL");
        cmd.env("AGENTMESH_LOG", "warn");
        cmd
    }

    pub fn data_path(&self) -> &std::path::Path {
        self.data_dir.path()
    }

    pub fn pid_path(&self) -> std::path::PathBuf {
        self.data_dir.path().join("agentmeshd.pid")
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        if self.pid_path().exists() {
            let _ = std::process::Command::new(env!("CARGO_BIN_EXE_agentmeshd"))
                .env("AGENTMESH_DATA_DIR", self.data_dir.path())
                .arg("stop")
                .output();
        }
    }
}

/// A port nothing is listening on.
pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Send a raw HTTP/1.1 request and return the full response text.
pub fn http(port: u16, request: &str) -> String {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream.write_all(request.as_bytes()).unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();
    response
}

pub fn http_get(port: u16, path: &str) -> String {
    http(
        port,
        &format!(
            "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
            path
        ),
    )
}

pub fn http_post_json(port: u16, path: &str, body: &str) -> String {
    http(
        port,
        &format!(
            "POST {} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            path,
            body.len(),
            body
        ),
    )
}

/// Wait until the daemon on `port` answers its health check.
pub fn wait_until_healthy(port: u16) {
    for _ in 0..50 {
        if TcpStream::connect(("127.0.0.1", port)).is_ok()
            && http_get(port, "/healthz").starts_with("HTTP/1.1 200")
        {
            return;
        }
        thread::sleep(Duration::from_millis(100));
    }
    panic!("agentmeshd on port {} never became healthy", port);
}
