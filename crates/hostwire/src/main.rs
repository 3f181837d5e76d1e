mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "hostwire", version, about = "Test host protocol diagnostics")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        default_value = "info",
        env = "HOSTWIRE_LOG_LEVEL",
        global = true
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    match cmd::run(cli.command, format) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_probe_with_defaults() {
        let cli = Cli::try_parse_from(["hostwire", "probe", "/tmp/host.sock"])
            .expect("probe args should parse");
        match cli.command {
            Command::Probe(args) => {
                assert_eq!(args.address, "/tmp/host.sock");
                assert_eq!(args.version, 7);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parses_probe_version_and_timeout() {
        let cli = Cli::try_parse_from([
            "hostwire",
            "--format",
            "json",
            "probe",
            "127.0.0.1:9000",
            "--version",
            "3",
            "--timeout",
            "250ms",
        ])
        .expect("probe args should parse");
        match cli.command {
            Command::Probe(args) => {
                assert_eq!(args.version, 3);
                assert_eq!(args.timeout, "250ms");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn rejects_non_numeric_version() {
        let err = Cli::try_parse_from(["hostwire", "probe", "/tmp/x", "--version", "seven"])
            .expect_err("version must be numeric");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }
}
