use clap::Parser;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::{error, info};
use ncp::block::Block;
use ncp::negotiation::configure_send;
use ncp::proto::put_block;
use std::io::{self, Read};
use std::net::TcpStream;

#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct Args {
    /// Host the receiver is listening on.
    host: String,
    /// Port the receiver is listening on for the negotiation connection.
    negotiation_port: u16,
}

/// Read stdin in `blen`-sized chunks (the final chunk may be shorter),
/// tag each with the next `ssn`, and round-robin them onto `sockets`.
///
/// This is the sender's contract-level counterpart to the receiver's
/// reassembler: it does not coordinate with the receiver beyond the
/// initial negotiation (SPEC_FULL.md §4.9).
fn stripe(mut input: impl Read, blen: u32, sockets: &mut [TcpStream]) -> Result<u32> {
    let blen = blen as usize;
    let mut ssn = 0u32;
    let mut buf = vec![0u8; blen];

    loop {
        let mut filled = 0;
        while filled < blen {
            let n = input.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            break;
        }

        let block = Block::from_filled(ssn, buf[..filled].to_vec());
        let socket = &mut sockets[ssn as usize % sockets.len()];
        put_block(socket, &block).wrap_err_with(|| format!("writing block {ssn}"))?;
        ssn += 1;

        if filled < blen {
            break;
        }
    }
    Ok(ssn)
}

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let args = Args::parse();

    info!("connecting to {}:{}", args.host, args.negotiation_port);
    let mut neg_sock = match TcpStream::connect((args.host.as_str(), args.negotiation_port)) {
        Ok(sock) => sock,
        Err(err) => {
            error!("failed to connect to {}: {err}", args.host);
            std::process::exit(ncp::supervisor::exit_code::CONFIG_FAILURE);
        }
    };

    let (agreement, mut sockets) = match configure_send(&mut neg_sock, &args.host) {
        Ok(result) => result,
        Err(err) => {
            error!("negotiation failed: {err:?}");
            std::process::exit(ncp::supervisor::exit_code::CONFIG_FAILURE);
        }
    };
    info!(
        "negotiated blen={} streams={}",
        agreement.blen,
        sockets.len()
    );

    let stdin = io::stdin();
    let sent = stripe(stdin.lock(), agreement.blen, &mut sockets)
        .wrap_err("striping stdin across data sockets")?;
    info!("sent {sent} blocks");

    Ok(())
}
