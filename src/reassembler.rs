//! The single consumer task ("join" in the source): serializes blocks
//! into the output byte stream by `ssn` order, buffering out-of-order
//! arrivals and discarding duplicates.

use crate::block::Block;
use crate::event::{EventKind, EventSender, TaskId};
use crate::queue::BlockReceiver;
use log::info;
use std::collections::BTreeMap;
use std::io::{self, Write};

/// Owned reassembler state.
///
/// `next_ssn` is an explicit field here, not a function-local `static`
/// as in the source (SPEC_FULL.md §9) — this is what lets a process run
/// more than one transfer and lets tests construct a `Reassembler`
/// directly instead of driving it only through the full pipeline.
pub struct Reassembler {
    next_ssn: u32,
    blk_cache: BTreeMap<u32, Block>,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reassembler {
    pub fn new() -> Self {
        Reassembler {
            next_ssn: 0,
            blk_cache: BTreeMap::new(),
        }
    }

    pub fn next_ssn(&self) -> u32 {
        self.next_ssn
    }

    /// Feed one received block into the reassembler, writing any now
    /// in-order blocks to `out`. Returns the number of blocks written.
    ///
    /// Realizes the sort-insertion + drain policy from SPEC_FULL.md
    /// §4.7: a `BTreeMap` keyed by `ssn` gives us sorted iteration and a
    /// deduplicating insert directly, in place of the source's
    /// intrusive singly-linked list walk.
    pub fn accept<W: Write>(&mut self, block: Block, out: &mut W) -> io::Result<usize> {
        if block.ssn < self.next_ssn {
            // Duplicate of something already emitted; drop it.
            return Ok(0);
        }

        // Deduplicating insert: first arrival for a given ssn wins.
        self.blk_cache.entry(block.ssn).or_insert(block);

        let mut written = 0;
        while let Some(entry) = self.blk_cache.first_entry() {
            if *entry.key() != self.next_ssn {
                break;
            }
            let (_, block) = entry.remove_entry();
            out.write_all(block.payload())?;
            self.next_ssn += 1;
            written += 1;
        }
        Ok(written)
    }
}

/// Run the reassembler task to completion against an output writer.
pub fn run<W: Write>(rx: BlockReceiver, tx_events: EventSender, mut out: W) {
    let mut reassembler = Reassembler::new();
    loop {
        match rx.get_blk() {
            Ok(block) => {
                if let Err(err) = reassembler.accept(block, &mut out) {
                    log::warn!("reassembler: write error: {err}");
                    tx_events.notify(TaskId::Reassembler, EventKind::Epip);
                    return;
                }
            }
            Err(_) => {
                if let Err(err) = out.flush() {
                    log::warn!("reassembler: final flush failed: {err}");
                    tx_events.notify(TaskId::Reassembler, EventKind::Epip);
                    return;
                }
                info!("reassembler: queue closed cleanly, transfer complete");
                tx_events.notify(TaskId::Reassembler, EventKind::Ok);
                return;
            }
        }
    }
}
