//! Wire-level constants and struct definitions for both side-channels:
//! negotiation and the data streams.
#![allow(clippy::upper_case_acronyms)]

use crate::block::Block;
use crate::framing::{get_frame, put_frame};
use byteorder::{ReadBytesExt, WriteBytesExt, BE};
use std::fmt;
use std::io::{self, Read, Write};

/// Default block data capacity, in bytes, proposed by the sender.
pub const BLEN_DEFAULT: u32 = 4096;
/// Default number of parallel streams proposed by the sender.
pub const NUM_PORTS_DEFAULT: u16 = 4;
/// Upper bound on the number of ports a single negotiation message may
/// carry, used to reject absurd `streams` values before allocating.
pub const NUM_PORTS_MAX: u16 = 256;

/// Low end (inclusive) of the port range the receiver reserves from.
pub const PORT_RANGE_MIN: u16 = 40000;
/// High end (inclusive) of the port range the receiver reserves from.
pub const PORT_RANGE_MAX: u16 = 65000;

/// Port-reservation attempt ceiling before the receiver gives up and
/// reports however many ports it managed to reserve.
pub const PORT_RES_MAX_ATTEMPTS: u32 = 3;

/// Negotiation-message acknowledgement code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Ack = 0,
    Nack = 1,
    Rej = 2,
}

impl Ack {
    fn from_u32(v: u32) -> Result<Self, ProtocolError> {
        match v {
            0 => Ok(Ack::Ack),
            1 => Ok(Ack::Nack),
            2 => Ok(Ack::Rej),
            other => Err(ProtocolError::new(format!("unexpected ack code {other}"))),
        }
    }
}

/// A protocol-level error: malformed or unexpected data on the wire,
/// distinct from the underlying `io::Error`s that carry it.
#[derive(Debug, Clone)]
pub struct ProtocolError(String);

impl ProtocolError {
    pub fn new<S: AsRef<str>>(s: S) -> Self {
        ProtocolError(s.as_ref().to_string())
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "negotiation protocol error: {}", self.0)
    }
}

impl std::error::Error for ProtocolError {}

/// A negotiation request or response.
///
/// `streams` is the requested/agreed stream count; see
/// `SPEC_FULL.md` §9 Open Question 1 for why this is independent of how
/// many ports actually trail the header on the wire at a given moment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegMessage {
    pub ack: Ack,
    pub blen: u32,
    pub streams: u16,
    pub ports: Vec<u16>,
}

impl NegMessage {
    /// The sender's very first request: no ports reserved yet.
    pub fn initial_request() -> Self {
        NegMessage {
            ack: Ack::Nack,
            blen: BLEN_DEFAULT,
            streams: NUM_PORTS_DEFAULT,
            ports: Vec::new(),
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(10 + 2 * self.ports.len());
        buf.write_u32::<BE>(self.ack as u32).unwrap();
        buf.write_u32::<BE>(self.blen).unwrap();
        buf.write_u16::<BE>(self.streams).unwrap();
        for port in &self.ports {
            buf.write_u16::<BE>(*port).unwrap();
        }
        buf
    }

    fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < 10 {
            return Err(ProtocolError::new(format!(
                "negotiation message too short ({} bytes)",
                buf.len()
            )));
        }
        let mut cursor = buf;
        let ack = Ack::from_u32(cursor.read_u32::<BE>().unwrap())?;
        let blen = cursor.read_u32::<BE>().unwrap();
        let streams = cursor.read_u16::<BE>().unwrap();

        // The port array's actual length on the wire is whatever remains
        // in the frame, not necessarily `streams` (see the initial
        // request, which carries zero trailing ports).
        if cursor.len() % 2 != 0 {
            return Err(ProtocolError::new("port array is not an even number of bytes"));
        }
        let num_ports = cursor.len() / 2;
        if num_ports > NUM_PORTS_MAX as usize {
            return Err(ProtocolError::new(format!(
                "negotiation message claims {num_ports} ports, exceeding the maximum of {NUM_PORTS_MAX}"
            )));
        }
        let mut ports = Vec::with_capacity(num_ports);
        for _ in 0..num_ports {
            ports.push(cursor.read_u16::<BE>().unwrap());
        }

        Ok(NegMessage {
            ack,
            blen,
            streams,
            ports,
        })
    }

    /// Write this message as one negotiation frame.
    pub fn put<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        put_frame(writer, &self.encode())
    }

    /// Read one negotiation frame. `Ok(None)` means the peer closed the
    /// connection cleanly between messages.
    pub fn get<R: Read>(reader: &mut R) -> Result<Option<Self>, ProtocolError> {
        let max_len = 10 + 2 * NUM_PORTS_MAX as u32;
        match get_frame(reader, max_len) {
            Ok(Some(buf)) => Ok(Some(Self::decode(&buf)?)),
            Ok(None) => Ok(None),
            Err(err) => Err(ProtocolError::new(format!("reading negotiation frame: {err}"))),
        }
    }
}

/// Maximum frame size for a data-stream block: `ssn` + `len` + `blen`
/// bytes of payload.
fn data_frame_max(blen: u32) -> u32 {
    8 + blen
}

/// Write a [`Block`] as one data-stream frame: `{ssn: u32, len: u32,
/// data: len bytes}`.
pub fn put_block<W: Write>(writer: &mut W, block: &Block) -> io::Result<()> {
    let mut buf = Vec::with_capacity(8 + block.len as usize);
    buf.write_u32::<BE>(block.ssn)?;
    buf.write_u32::<BE>(block.len)?;
    buf.extend_from_slice(block.payload());
    put_frame(writer, &buf)
}

/// Read one data-stream frame into a [`Block`]. `Ok(None)` means the
/// peer closed the connection cleanly between blocks.
pub fn get_block<R: Read>(reader: &mut R, blen: u32) -> io::Result<Option<Block>> {
    let raw = match get_frame(reader, data_frame_max(blen))? {
        Some(raw) => raw,
        None => return Ok(None),
    };
    if raw.len() < 8 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("data frame too short ({} bytes)", raw.len()),
        ));
    }
    let mut cursor = &raw[..];
    let ssn = cursor.read_u32::<BE>()?;
    let len = cursor.read_u32::<BE>()?;
    if len as usize > cursor.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("data frame declares len {len} but only {} bytes follow", cursor.len()),
        ));
    }
    let data = cursor[..len as usize].to_vec();
    Ok(Some(Block::from_filled(ssn, data)))
}
