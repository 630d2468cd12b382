#![forbid(unsafe_code)]

//! `riveter-ctl`: engine-side companion for `riveter`.
//!
//! Opens the shared handshake segments by name and plays the engine's part
//! of the protocol by hand: report a pause point, wait for the strategy,
//! inspect or remove the segments.

use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};

use riveter::handshake::shm::ShmSegments;
use riveter::handshake::{HandshakeChannel, SegmentNames};
use riveter::Result;

#[derive(Debug, Parser)]
#[command(
    name = "riveter-ctl",
    about = "Drive the riveter handshake segments from the engine side",
    version,
    long_about = None
)]
struct Cli {
    /// Ready flag segment name.
    #[arg(long)]
    ready: Option<String>,

    /// Strategy selector segment name.
    #[arg(long)]
    strategy: Option<String>,

    /// State size segment name.
    #[arg(long)]
    state_size: Option<String>,

    /// Record sequence segment name.
    #[arg(long)]
    sequence: Option<String>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Segment names with any overrides applied over the defaults.
    fn segment_names(&self) -> SegmentNames {
        let defaults = SegmentNames::default();
        SegmentNames {
            ready: self.ready.clone().unwrap_or(defaults.ready),
            strategy: self.strategy.clone().unwrap_or(defaults.strategy),
            state_size: self.state_size.clone().unwrap_or(defaults.state_size),
            sequence: self.sequence.clone().unwrap_or(defaults.sequence),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the segments (if missing) and reset them to the launch state.
    Create,

    /// Print the decoded segment contents as JSON.
    Peek,

    /// Report a pause point with the given persisted state size.
    Signal {
        /// Bytes the engine would persist at this pause point.
        #[arg(long)]
        size: u64,

        /// Block until the dispatcher writes a strategy back.
        #[arg(long)]
        wait: bool,

        /// Give up waiting after this many milliseconds.
        #[arg(long, default_value_t = 30_000)]
        timeout_ms: u64,
    },

    /// Unlink the segments.
    Teardown,
}

const DECISION_POLL: Duration = Duration::from_millis(10);

fn main() -> ExitCode {
    let args = Cli::parse();
    let names = args.segment_names();

    match execute(&args.command, &names) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn execute(command: &Command, names: &SegmentNames) -> Result<ExitCode> {
    names.validate()?;
    match command {
        Command::Create => {
            let channel = HandshakeChannel::new(ShmSegments::create_or_open(names)?);
            channel.initialize()?;
            println!("OK");
        }
        Command::Peek => {
            let channel = HandshakeChannel::new(ShmSegments::open_existing(names)?);
            let state = channel.snapshot()?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        Command::Signal {
            size,
            wait,
            timeout_ms,
        } => {
            let channel = HandshakeChannel::new(ShmSegments::open_existing(names)?);
            channel.signal(*size)?;
            if !wait {
                println!("OK");
                return Ok(ExitCode::SUCCESS);
            }

            let deadline = Instant::now() + Duration::from_millis(*timeout_ms);
            loop {
                if let Some(strategy) = channel.poll_decision()? {
                    println!("{strategy}");
                    break;
                }
                if Instant::now() >= deadline {
                    eprintln!("Error: no strategy written back within {timeout_ms} ms");
                    return Ok(ExitCode::FAILURE);
                }
                thread::sleep(DECISION_POLL);
            }
        }
        Command::Teardown => {
            let channel = HandshakeChannel::new(ShmSegments::open_existing(names)?);
            channel.teardown()?;
            println!("OK");
        }
    }
    Ok(ExitCode::SUCCESS)
}
