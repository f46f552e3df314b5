use clap::{Args, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dsrpc_frame::MessageKind;

use crate::exit::{CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod call;
pub mod decode;
pub mod monitor;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Make one call and print its response.
    Call(CallArgs),
    /// Connect and print server-pushed notifications.
    Monitor(MonitorArgs),
    /// Decode a capture of frames.
    Decode(DecodeArgs),
    /// Run a stub server that answers every call with an empty response.
    Serve(ServeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Call(args) => call::run(args, format),
        Command::Monitor(args) => monitor::run(args, format),
        Command::Decode(args) => decode::run(args, format),
        Command::Serve(args) => serve::run(args),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Server socket path.
    #[arg(env = "DSRPC_SOCKET")]
    pub path: PathBuf,
    /// Method name.
    pub method: String,
    /// Parameters as a JSON message, e.g. {"kind":"connect_parameters","body":{"application_name":"demo"}}.
    #[arg(long)]
    pub params: Option<String>,
    /// How to parse the response.
    #[arg(long, default_value = "void")]
    pub response: MessageKind,
    /// Maximum time to wait for the response (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Server socket path.
    #[arg(env = "DSRPC_SOCKET")]
    pub path: PathBuf,
    /// Application name sent with `connect`.
    #[arg(long, default_value = "dsrpc-monitor")]
    pub app_name: String,
    /// Exit after N notifications.
    #[arg(long)]
    pub count: Option<usize>,
    /// Maximum time to wait for the `connect` response (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Capture file containing consecutive frames.
    pub file: PathBuf,
    /// Decode frames as client invocations instead of server results.
    #[arg(long)]
    pub invocations: bool,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Socket path to bind.
    #[arg(env = "DSRPC_SOCKET")]
    pub path: PathBuf,
    /// Embed a ping event (serial = call id) in every response.
    #[arg(long)]
    pub ping: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
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

/// First Ctrl-C clears `running`; a second one exits immediately.
pub(crate) fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        if !running.swap(false, Ordering::SeqCst) {
            std::process::exit(130);
        }
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
