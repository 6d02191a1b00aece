use clap::Parser;
use color_eyre::Result;
use std::io::{self, BufWriter};

use ncp::supervisor::run_recv;

#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct Args {
    /// Port to listen on for the negotiation connection.
    negotiation_port: u16,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let args = Args::parse();
    let stdout = BufWriter::new(io::stdout());
    let code = run_recv(args.negotiation_port, stdout);
    std::process::exit(code);
}
