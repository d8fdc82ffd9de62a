use clap::{Args, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use lhylink_controller::TransportSpec;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

#[cfg(unix)]
pub mod emulate;
pub mod send;
pub mod status;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Stream commands to a board through the buffered controller.
    Send(SendArgs),
    /// Read the board status vector and chip version.
    Status(StatusArgs),
    /// Serve a simulated board on a Unix socket.
    #[cfg(unix)]
    Emulate(EmulateArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Send(args) => send::run(args, format),
        Command::Status(args) => status::run(args, format),
        #[cfg(unix)]
        Command::Emulate(args) => emulate::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Transport preference list: `socket:<path>` or `sim`. First usable wins.
    #[arg(
        long,
        short = 't',
        value_name = "SPEC",
        env = "LHYLINK_TRANSPORT",
        value_delimiter = ',',
        required = true
    )]
    pub transport: Vec<TransportSpec>,
    /// Command string; a trailing newline is added if missing.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read commands from a file (`-` for stdin).
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    /// Queue on the realtime queue instead of the normal one.
    #[arg(long)]
    pub priority: bool,
    /// Wait for the board to finish executing before exiting.
    #[arg(long)]
    pub wait: bool,
    /// Give up if the data is not sent within this time (e.g. 30s, 500ms).
    #[arg(long, default_value = "60s")]
    pub timeout: String,
    /// Consecutive refused opens before giving up.
    #[arg(long, default_value = "5")]
    pub max_open_attempts: u32,
    /// Print controller events as they happen.
    #[arg(long)]
    pub events: bool,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Transport preference list: `socket:<path>` or `sim`. First usable wins.
    #[arg(
        long,
        short = 't',
        value_name = "SPEC",
        env = "LHYLINK_TRANSPORT",
        value_delimiter = ',',
        required = true
    )]
    pub transport: Vec<TransportSpec>,
}

#[derive(Args, Debug)]
pub struct EmulateArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Chip version reported to clients.
    #[arg(long, default_value = "48")]
    pub chip_version: u32,
    /// BUSY replies before each frame is confirmed.
    #[arg(long, default_value = "1")]
    pub busy_polls: u32,
    /// Work units per accepted frame.
    #[arg(long, default_value = "4")]
    pub work_per_packet: u32,
    /// Work units retired per status poll.
    #[arg(long, default_value = "2")]
    pub work_per_poll: u32,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }
}
