//! Splits a byte stream across N parallel TCP connections ("streams")
//! and reassembles it in sequence-number order on the other end.
//!
//! See `SPEC_FULL.md` at the repository root for the full design. The
//! pieces that matter most are [`negotiation`] (agreeing on block size,
//! stream count, and ports before transfer starts), [`reader`] and
//! [`reassembler`] (the striping/reassembly pipeline), and
//! [`supervisor`] (the event-driven orchestration that ties them
//! together).

pub mod block;
pub mod event;
pub mod framing;
pub mod negotiation;
pub mod proto;
pub mod queue;
pub mod reader;
pub mod reassembler;
pub mod supervisor;
