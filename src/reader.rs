//! Per-connection task: pulls framed blocks off one data socket and
//! forwards them to the block queue.

use crate::event::{EventKind, EventSender, TaskId};
use crate::proto::get_block;
use crate::queue::BlockSender;
use log::{info, warn};
use std::net::TcpStream;

/// Run one stream reader to completion. Consumes the socket and its own
/// queue/event-bus handles, so that dropping this function's frame at
/// exit drops exactly this task's `BlockSender` clone — the mechanism
/// behind per-task queue shutdown (SPEC_FULL.md §9, corrected
/// REDESIGN FLAG 5).
pub fn run(id: usize, mut sock: TcpStream, tx_blocks: BlockSender, tx_events: EventSender, blen: u32) {
    info!("stream reader {id}: waiting for data");
    loop {
        let block = match get_block(&mut sock, blen) {
            Ok(Some(block)) => block,
            Ok(None) => {
                info!("stream reader {id}: socket closed cleanly");
                return;
            }
            Err(err) => {
                warn!("stream reader {id}: socket error: {err}");
                tx_events.notify(TaskId::StreamReader(id), EventKind::Esock);
                return;
            }
        };

        if tx_blocks.put_blk(block).is_err() {
            warn!("stream reader {id}: block queue closed");
            tx_events.notify(TaskId::StreamReader(id), EventKind::Epip);
            return;
        }
    }
}
