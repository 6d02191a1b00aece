//! Bounded multi-producer / single-consumer handoff of owned [`Block`]s
//! between the stream-reader tasks and the reassembler.
//!
//! `std::sync::mpsc::sync_channel` already gives us exactly the closing
//! semantics the design calls for: when every [`BlockSender`] clone is
//! dropped, [`BlockReceiver::get_blk`] observes a clean end-of-input;
//! when the [`BlockReceiver`] is dropped, a producer's next `put_blk`
//! observes a broken pipe. No hand-rolled reference counting is needed.

use crate::block::Block;
use std::sync::mpsc::{self, RecvError, SendError, SyncSender};

/// Default queue capacity: a small multiple of a typical stream count,
/// enough to let readers run ahead of a momentarily slow reassembler
/// without unbounded memory growth.
pub const DEFAULT_CAPACITY: usize = 64;

/// The producer half of the block queue. Each stream-reader task owns
/// exactly one clone and lets it drop at task exit.
#[derive(Clone)]
pub struct BlockSender {
    tx: SyncSender<Block>,
}

impl BlockSender {
    /// Transfer ownership of `block` to the consumer.
    ///
    /// `Err` means the consumer side has been closed (the reassembler
    /// has exited); the caller should publish `Epip` and exit.
    pub fn put_blk(&self, block: Block) -> Result<(), SendError<Block>> {
        self.tx.send(block)
    }
}

/// The single consumer half of the block queue, owned by the
/// reassembler.
pub struct BlockReceiver {
    rx: mpsc::Receiver<Block>,
}

impl BlockReceiver {
    /// Receive ownership of the next block.
    ///
    /// `Err(RecvError)` means every producer has dropped its sender —
    /// clean end-of-input.
    pub fn get_blk(&self) -> Result<Block, RecvError> {
        self.rx.recv()
    }
}

/// Create a fresh block queue with [`DEFAULT_CAPACITY`] slots.
pub fn block_queue() -> (BlockSender, BlockReceiver) {
    block_queue_with_capacity(DEFAULT_CAPACITY)
}

/// Create a fresh block queue with an explicit bound, mainly for tests
/// that want to observe backpressure directly.
pub fn block_queue_with_capacity(capacity: usize) -> (BlockSender, BlockReceiver) {
    let (tx, rx) = mpsc::sync_channel(capacity);
    (BlockSender { tx }, BlockReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_blocks_in_send_order_per_producer() {
        let (tx, rx) = block_queue();
        tx.put_blk(Block::from_filled(0, vec![1])).unwrap();
        tx.put_blk(Block::from_filled(1, vec![2])).unwrap();
        assert_eq!(rx.get_blk().unwrap().ssn, 0);
        assert_eq!(rx.get_blk().unwrap().ssn, 1);
    }

    #[test]
    fn consumer_sees_eof_only_after_every_clone_drops() {
        let (tx, rx) = block_queue();
        let tx2 = tx.clone();
        drop(tx);
        // tx2 still alive: queue is not yet closed from the consumer's view.
        let handle = std::thread::spawn(move || rx.get_blk());
        std::thread::sleep(std::time::Duration::from_millis(20));
        drop(tx2);
        assert!(handle.join().unwrap().is_err());
    }

    #[test]
    fn producer_sees_broken_pipe_after_consumer_drops() {
        let (tx, rx) = block_queue_with_capacity(1);
        drop(rx);
        let err = tx.put_blk(Block::from_filled(0, vec![1]));
        assert!(err.is_err());
    }
}
