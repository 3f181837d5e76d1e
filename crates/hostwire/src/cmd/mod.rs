use clap::{Args, Subcommand};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod probe;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show version information.
    Version(VersionArgs),
    /// Handshake with a running test host and print the negotiated version.
    Probe(ProbeArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Version(args) => version::run(args),
        Command::Probe(args) => probe::run(args, format),
    }
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Test host endpoint: a socket path or host:port.
    pub address: String,
    /// Protocol version to offer.
    #[arg(long, default_value_t = hostwire_protocol::HIGHEST_SUPPORTED_VERSION)]
    pub version: u32,
    /// Connection and handshake timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s", env = "HOSTWIRE_PROBE_TIMEOUT")]
    pub timeout: String,
}
