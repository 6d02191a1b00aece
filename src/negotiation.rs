//! The pre-transfer handshake: agreeing on block size, stream count, and
//! the ports the receiver will listen on.

use crate::proto::{Ack, NegMessage, ProtocolError, PORT_RANGE_MAX, PORT_RANGE_MIN, PORT_RES_MAX_ATTEMPTS};
use color_eyre::eyre::{bail, WrapErr};
use color_eyre::Result;
use log::{info, warn};
use rand::RngCore;
use std::net::{TcpListener, TcpStream};

/// What both peers agree on before bulk transfer starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agreement {
    pub blen: u32,
    pub ports: Vec<u16>,
}

/// Draw a uniform random integer in `[min, max]` (inclusive), using
/// rejection sampling against `rng`'s 32-bit output range to eliminate
/// modulo bias.
///
/// This mirrors the source's `random_minmax`: `bin_size` pre-images map
/// to each output bucket, and draws landing in the partial top bucket
/// (`defect` of them) are rejected and redrawn.
pub fn random_minmax(rng: &mut impl RngCore, min: u16, max: u16) -> u16 {
    assert!(max >= min);
    let num_bins = (max - min) as u64 + 1;
    let num_rand = u32::MAX as u64 + 1;
    let bin_size = num_rand / num_bins;
    let defect = num_rand % num_bins;

    let draw = loop {
        let x = rng.next_u32() as u64;
        if x < num_rand - defect {
            break x;
        }
    };
    min + (draw / bin_size) as u16
}

/// Try to bind a listener on `port`. Returns `None` if the bind failed
/// (port in use, permission denied, etc.) rather than propagating the
/// error, since a failed bind attempt here is an expected, retryable
/// outcome, not a fatal one.
fn try_bind(port: u16) -> Option<TcpListener> {
    TcpListener::bind(("0.0.0.0", port)).ok()
}

/// Reserve up to `streams` listening sockets on distinct random ports in
/// `[PORT_RANGE_MIN, PORT_RANGE_MAX]`, retrying failed binds up to
/// `PORT_RES_MAX_ATTEMPTS` times in a row.
///
/// Returns as many `(port, listener)` pairs as it managed to reserve.
/// The caller compares the returned count against `streams` to decide
/// whether to ACK or NACK.
pub fn reserve_ports(rng: &mut impl RngCore, streams: u16) -> Vec<(u16, TcpListener)> {
    let mut reserved = Vec::new();
    let mut attempts = 0u32;

    while (reserved.len() as u16) < streams && attempts < PORT_RES_MAX_ATTEMPTS {
        let mut candidate;
        loop {
            candidate = random_minmax(rng, PORT_RANGE_MIN, PORT_RANGE_MAX);
            if !reserved.iter().any(|(p, _)| *p == candidate) {
                break;
            }
        }

        match try_bind(candidate) {
            Some(listener) => {
                attempts = 0;
                reserved.push((candidate, listener));
            }
            None => attempts += 1,
        }
    }

    reserved
}

/// Run the receiver's negotiation loop on an already-accepted
/// negotiation connection. Returns the agreed block length, the
/// connected data sockets (in the order the ports were transmitted),
/// and nothing else — the sockets are ready for the supervisor to spawn
/// readers over.
pub fn configure_recv(neg_sock: &mut TcpStream) -> Result<(Agreement, Vec<TcpStream>)> {
    let mut rng = rand::thread_rng();

    loop {
        let req = NegMessage::get(neg_sock)
            .wrap_err("reading negotiation request")?
            .ok_or_else(|| ProtocolError::new("client closed negotiation connection"))?;

        match req.ack {
            Ack::Nack => {
                info!("negotiation: client proposed blen={} streams={}", req.blen, req.streams);

                // blen is accepted unconditionally for now; reserved for
                // future validation, per the source's own "do nothing
                // yet" comment.
                let blen = req.blen.max(1);

                let reserved = reserve_ports(&mut rng, req.streams);
                let ports: Vec<u16> = reserved.iter().map(|(p, _)| *p).collect();

                if (reserved.len() as u16) < req.streams {
                    warn!(
                        "negotiation: reserved only {} of {} requested ports",
                        reserved.len(),
                        req.streams
                    );
                    let resp = NegMessage {
                        ack: Ack::Nack,
                        blen,
                        streams: reserved.len() as u16,
                        ports,
                    };
                    resp.put(neg_sock).wrap_err("sending NACK response")?;
                    // Give the client a chance to retry with a smaller
                    // request; loop back to read its next message.
                    continue;
                }

                info!("negotiation: reserved ports {:?}", ports);
                let resp = NegMessage {
                    ack: Ack::Ack,
                    blen,
                    streams: reserved.len() as u16,
                    ports: ports.clone(),
                };
                resp.put(neg_sock).wrap_err("sending ACK response")?;

                let mut sockets = Vec::with_capacity(reserved.len());
                for (port, listener) in reserved {
                    info!("negotiation: waiting for data connection on port {port}");
                    let (stream, _) = listener
                        .accept()
                        .wrap_err_with(|| format!("accepting data connection on port {port}"))?;
                    sockets.push(stream);
                }

                return Ok((Agreement { blen, ports }, sockets));
            }
            Ack::Ack => {
                bail!(ProtocolError::new(
                    "received unsolicited ACK while awaiting a configuration request"
                ));
            }
            Ack::Rej => {
                bail!(ProtocolError::new(
                    "client rejected configuration without amendment"
                ));
            }
        }
    }
}

/// Run the sender's negotiation loop against an already-connected
/// negotiation socket. Returns the agreed block length and the
/// connected data sockets, in the order the receiver's ports were
/// transmitted.
pub fn configure_send(neg_sock: &mut TcpStream, host: &str) -> Result<(Agreement, Vec<TcpStream>)> {
    let req = NegMessage::initial_request();
    let requested_streams = req.streams;
    req.put(neg_sock).wrap_err("sending initial negotiation request")?;

    loop {
        let resp = NegMessage::get(neg_sock)
            .wrap_err("reading negotiation response")?
            .ok_or_else(|| ProtocolError::new("server closed negotiation connection"))?;

        match resp.ack {
            Ack::Ack => {
                info!("negotiation: server accepted blen={} ports={:?}", resp.blen, resp.ports);
                let mut sockets = Vec::with_capacity(resp.ports.len());
                for port in &resp.ports {
                    let stream = TcpStream::connect((host, *port))
                        .wrap_err_with(|| format!("connecting data socket on port {port}"))?;
                    sockets.push(stream);
                }
                return Ok((
                    Agreement {
                        blen: resp.blen,
                        ports: resp.ports,
                    },
                    sockets,
                ));
            }
            Ack::Nack => {
                // Per SPEC_FULL.md §9 Open Question 2: single-round
                // policy, no interactive re-negotiation.
                bail!(ProtocolError::new(format!(
                    "server rejected configuration with amendment (offered {} of {} requested streams); aborting",
                    resp.streams, requested_streams
                )));
            }
            Ack::Rej => {
                bail!(ProtocolError::new("server rejected configuration without amendment"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn random_minmax_stays_in_range() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..10_000 {
            let v = random_minmax(&mut rng, PORT_RANGE_MIN, PORT_RANGE_MAX);
            assert!((PORT_RANGE_MIN..=PORT_RANGE_MAX).contains(&v));
        }
    }

    #[test]
    fn random_minmax_distribution_is_roughly_uniform() {
        let mut rng = StdRng::seed_from_u64(42);
        let min = 0u16;
        let max = 9u16;
        let mut buckets = [0u32; 10];
        const DRAWS: u32 = 100_000;
        for _ in 0..DRAWS {
            let v = random_minmax(&mut rng, min, max);
            buckets[v as usize] += 1;
        }
        let expected = DRAWS / 10;
        for count in buckets {
            let deviation = (count as i64 - expected as i64).unsigned_abs();
            assert!(
                deviation < (expected / 4) as u64,
                "bucket count {count} deviates too far from expected {expected}"
            );
        }
    }

    #[test]
    fn reserve_ports_returns_distinct_ports_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let reserved = reserve_ports(&mut rng, 4);
        assert_eq!(reserved.len(), 4);
        let mut ports: Vec<u16> = reserved.iter().map(|(p, _)| *p).collect();
        ports.sort_unstable();
        ports.dedup();
        assert_eq!(ports.len(), 4);
        for port in ports {
            assert!((PORT_RANGE_MIN..=PORT_RANGE_MAX).contains(&port));
        }
    }

    #[test]
    fn reserve_ports_requesting_zero_reserves_nothing() {
        let mut rng = StdRng::seed_from_u64(3);
        let reserved = reserve_ports(&mut rng, 0);
        assert!(reserved.is_empty());
    }

    #[test]
    fn try_bind_fails_against_an_already_bound_port() {
        let held = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = held.local_addr().unwrap().port();
        assert!(try_bind(port).is_none());
    }
}
