//! End-to-end integration test: runs the `send` and `recv` binaries
//! against each other over loopback TCP and checks the output is a
//! byte-for-byte copy of the input.
//!
//! Mirrors the process-spawning style of the crate this was grown from
//! (`Command::new(exe_path(...))`), with `serial_test` guarding against
//! port reuse across tests the way it guards against `/dev/nbd1` reuse
//! there.

use std::env;
use std::io::Write;
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread::sleep;
use std::time::Duration;

use serial_test::serial;

fn exe_path(name: &str) -> PathBuf {
    let bin_dir = env::current_exe()
        .unwrap()
        .parent()
        .expect("test executable's directory")
        .parent()
        .expect("output directory")
        .to_path_buf();
    bin_dir.join(name)
}

/// Ask the OS for a free port by binding then immediately releasing it.
/// There's an inherent TOCTOU race (another process could grab it
/// first), but it's good enough for a single-machine test suite.
fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn run_transfer(port: u16, input: &[u8]) -> Vec<u8> {
    let mut recv = Command::new(exe_path("recv"))
        .arg(port.to_string())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to start recv");

    // Give recv time to bind the negotiation port before send connects.
    sleep(Duration::from_millis(150));

    let mut send = Command::new(exe_path("send"))
        .arg("127.0.0.1")
        .arg(port.to_string())
        .stdin(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to start send");

    send.stdin
        .take()
        .unwrap()
        .write_all(input)
        .expect("writing to send's stdin");
    // stdin is dropped here (via take()'s returned handle going out of
    // scope above), closing it so send observes EOF and finishes
    // striping.

    let send_status = send.wait().expect("waiting for send");
    assert!(send_status.success(), "send exited with {send_status}");

    let recv_output = recv.wait_with_output().expect("waiting for recv");
    assert!(
        recv_output.status.success(),
        "recv exited with {}",
        recv_output.status
    );
    recv_output.stdout
}

#[test]
#[serial]
fn single_stream_passthrough() {
    let port = free_port();
    let out = run_transfer(port, b"hello");
    assert_eq!(out, b"hello");
}

#[test]
#[serial]
fn multi_block_input_round_trips_exactly() {
    let port = free_port();
    // Large enough to span many blocks at the default block size and
    // exercise striping across the default stream count.
    let input: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let out = run_transfer(port, &input);
    assert_eq!(out, input);
}

#[test]
#[serial]
fn empty_input_produces_empty_output() {
    let port = free_port();
    let out = run_transfer(port, b"");
    assert!(out.is_empty());
}
