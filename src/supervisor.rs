//! Orchestrates negotiation, spawns reader and reassembler tasks, waits
//! on the event bus, and decides success vs. abort.

use crate::event::{event_bus, EventKind};
use crate::negotiation::configure_recv;
use crate::queue::block_queue;
use crate::reader;
use crate::reassembler;
use color_eyre::Result;
use log::{error, info};
use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::thread;

/// Process exit code conventions (SPEC_FULL.md §6).
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const CONFIG_FAILURE: i32 = 1;
    pub const PIPELINE_FAILURE: i32 = 2;
    pub const SOCKET_FAILURE: i32 = 3;
}

/// Run the full receive side: accept the negotiation connection on
/// `neg_port`, negotiate, spawn workers, and drive them to completion,
/// writing reassembled output to `out`.
///
/// Returns the process exit code the caller's `main` should use.
pub fn run_recv<W: Write + Send + 'static>(neg_port: u16, out: W) -> i32 {
    let neg_listener = match TcpListener::bind(("0.0.0.0", neg_port)) {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind negotiation port {neg_port}: {err}");
            return exit_code::CONFIG_FAILURE;
        }
    };

    info!("waiting for sender on negotiation port {neg_port}");
    let (mut neg_sock, peer) = match neg_listener.accept() {
        Ok(accepted) => accepted,
        Err(err) => {
            error!("failed to accept negotiation connection: {err}");
            return exit_code::CONFIG_FAILURE;
        }
    };
    info!("negotiation connection from {peer}");

    let (agreement, sockets) = match configure_recv(&mut neg_sock) {
        Ok(result) => result,
        Err(err) => {
            error!("negotiation failed: {err:?}");
            return exit_code::CONFIG_FAILURE;
        }
    };
    info!(
        "negotiated blen={} streams={}",
        agreement.blen,
        sockets.len()
    );

    match drive(agreement.blen, sockets, out) {
        Ok(()) => exit_code::SUCCESS,
        Err(EventKind::Ok) => exit_code::SUCCESS,
        Err(EventKind::Epip) => {
            error!("receive failed: pipeline error");
            exit_code::PIPELINE_FAILURE
        }
        Err(EventKind::Esock) => {
            error!("receive failed: socket error");
            exit_code::SOCKET_FAILURE
        }
    }
}

/// Spawn the reassembler and one stream reader per socket, then wait on
/// the event bus for the outcome. Exposed separately from [`run_recv`]
/// so tests can drive the worker pipeline directly over pre-connected
/// sockets, skipping the negotiation phase.
pub fn drive<W: Write + Send + 'static>(
    blen: u32,
    sockets: Vec<TcpStream>,
    out: W,
) -> Result<(), EventKind> {
    let (block_tx, block_rx) = block_queue();
    let (event_tx, event_rx) = event_bus();

    let reassembler_events = event_tx.clone();
    let reassembler_handle =
        thread::spawn(move || reassembler::run(block_rx, reassembler_events, out));

    let mut reader_handles = Vec::with_capacity(sockets.len());
    for (id, sock) in sockets.into_iter().enumerate() {
        let tx_blocks = block_tx.clone();
        let tx_events = event_tx.clone();
        reader_handles.push(thread::spawn(move || {
            reader::run(id, sock, tx_blocks, tx_events, blen)
        }));
    }

    // Drop the supervisor's own originals so the only live senders are
    // the ones each spawned task owns; this is what lets the queue and
    // event bus close once every task has finished.
    drop(block_tx);
    drop(event_tx);

    let outcome = match event_rx.wait_notify() {
        Ok(event) => event.kind,
        Err(_) => EventKind::Epip,
    };

    // Not joining the remaining workers on abort mirrors the source's
    // reliance on OS cleanup (SPEC_FULL.md §4.8); on a clean `Ok` we do
    // join so the reassembler's output is fully flushed before we
    // return.
    if outcome == EventKind::Ok {
        let _ = reassembler_handle.join();
        for handle in reader_handles {
            let _ = handle.join();
        }
        Ok(())
    } else {
        Err(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::put_block;
    use crate::block::Block;
    use std::net::TcpListener;
    use std::thread;

    fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = thread::spawn(move || TcpStream::connect(addr).unwrap());
        let (server_side, _) = listener.accept().unwrap();
        (server_side, client.join().unwrap())
    }

    #[test]
    fn drive_reassembles_single_stream_passthrough() {
        let (server_side, mut client_side) = connected_pair();

        let writer = thread::spawn(move || {
            put_block(&mut client_side, &Block::from_filled(0, b"hello".to_vec())).unwrap();
            // dropping client_side closes cleanly
        });

        let out_holder = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let out_holder2 = out_holder.clone();
        let result = drive(4096, vec![server_side], VecSink(out_holder2));
        writer.join().unwrap();

        assert!(result.is_ok());
        let out = out_holder.lock().unwrap().clone();
        assert_eq!(out, b"hello");
    }

    // A Write sink that forwards into a shared buffer, so the test can
    // inspect output after `drive` (which takes ownership of `W`)
    // returns.
    struct VecSink(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);
    impl Write for VecSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn drive_reports_esock_on_socket_error() {
        let (server_side, mut client_side) = connected_pair();
        let writer = thread::spawn(move || {
            use byteorder::{WriteBytesExt, BE};
            client_side.write_u32::<BE>(9_999_999).unwrap();
        });

        let out_holder = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let result = drive(4096, vec![server_side], VecSink(out_holder));
        writer.join().unwrap();

        assert_eq!(result, Err(EventKind::Esock));
    }
}
