//! Length-prefixed message transport over a byte-oriented stream socket.
//!
//! Every frame on the wire is a big-endian `u32` length followed by that
//! many bytes of payload. A [`std::io::BufRead`] source is required so a
//! single frame is delivered atomically even when the kernel hands back
//! partial reads.

use std::io::{self, Read, Write};

#[cfg(test)]
use byteorder::{WriteBytesExt, BE};

/// Write `payload` as one length-prefixed frame.
pub fn put_frame<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    writer.write_all(&(payload.len() as u32).to_be_bytes())?;
    writer.write_all(payload)?;
    writer.flush()
}

/// Read the 4-byte length prefix a byte at a time, so that a connection
/// that dies after delivering some but not all of the prefix can be told
/// apart from one that delivers none of it.
///
/// Returns `Ok(None)` only when zero bytes were available before EOF —
/// a clean close at a frame boundary. Any EOF after at least one byte of
/// the prefix was read is a truncated read and is returned as `Err`,
/// since `Read::read_exact` on its own collapses both cases into the
/// same `UnexpectedEof` and would otherwise misreport data loss as a
/// clean close.
fn read_len_prefix<R: Read>(reader: &mut R) -> io::Result<Option<u32>> {
    let mut buf = [0u8; 4];
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    if filled == 0 {
        return Ok(None);
    }
    if filled < buf.len() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("truncated length prefix: got {filled} of {} bytes", buf.len()),
        ));
    }
    Ok(Some(u32::from_be_bytes(buf)))
}

/// Read one length-prefixed frame, rejecting anything longer than
/// `max_len`.
///
/// Returns `Ok(None)` on a clean EOF at a frame boundary (no bytes at all
/// were available for the length prefix), `Ok(Some(buf))` on a fully
/// delivered frame, and `Err` on a truncated read, I/O error, or an
/// oversize length prefix.
pub fn get_frame<R: Read>(reader: &mut R, max_len: u32) -> io::Result<Option<Vec<u8>>> {
    let len = match read_len_prefix(reader)? {
        Some(len) => len,
        None => return Ok(None),
    };
    if len > max_len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of length {len} exceeds max {max_len}"),
        ));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    Ok(Some(buf))
}
