//! Task-to-supervisor notifications: the event bus.
//!
//! Single-reader (the supervisor), multi-writer (every spawned task
//! holds a clone). Built directly on `std::sync::mpsc`, the same way as
//! [`crate::queue`].

use std::sync::mpsc::{self, RecvError, Sender};

/// Identifies which task published an event, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskId {
    Reassembler,
    StreamReader(usize),
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            TaskId::Reassembler => write!(f, "reassembler"),
            TaskId::StreamReader(n) => write!(f, "stream reader {n}"),
        }
    }
}

/// The outcome a task reports to the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Clean completion: the reassembler observed queue EOF.
    Ok,
    /// Pipeline/queue failure.
    Epip,
    /// Unexpected socket failure.
    Esock,
}

#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub task: TaskId,
    pub kind: EventKind,
}

/// The multi-writer half of the event bus. Every task clones this and
/// calls [`EventSender::notify`] exactly once before exiting.
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<Event>,
}

impl EventSender {
    pub fn notify(&self, task: TaskId, kind: EventKind) {
        // A send can only fail if the supervisor has already dropped its
        // receiver, which only happens after it has made its exit
        // decision; there is nothing further to report at that point.
        let _ = self.tx.send(Event { task, kind });
    }
}

/// The single-reader half of the event bus, owned by the supervisor.
pub struct EventReceiver {
    rx: mpsc::Receiver<Event>,
}

impl EventReceiver {
    /// Block until the next event arrives.
    pub fn wait_notify(&self) -> Result<Event, RecvError> {
        self.rx.recv()
    }
}

pub fn event_bus() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel();
    (EventSender { tx }, EventReceiver { rx })
}
