//! Command-line front end for the embeddable key-value store: a thin
//! argument parser over `caskdb::Engine`, one process invocation per
//! operation.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::LevelFilter;
use simplelog::{ColorChoice, Config as LogConfig, TermLogger, TerminalMode};

use caskdb::config::EngineConfig;
use caskdb::error::Error;
use caskdb::storage::Engine;

#[derive(Parser)]
#[command(name = "caskdb", about = "An embeddable, log-structured key-value store", version)]
struct Args {
    /// Path to a TOML config file. Defaults to `caskdb.toml` in the data directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides the data directory from the config file.
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Overrides the active-segment rotation threshold, in bytes.
    #[arg(long, global = true)]
    max_segment_size: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Writes a key/value pair, creating or overwriting it.
    Put { key: String, value: String },
    /// Prints the current value for a key.
    Get { key: String },
    /// Removes a key.
    Delete { key: String },
    /// Rewrites the database into a single segment, discarding garbage.
    Compact,
    /// Prints key count and disk usage.
    Status,
}

fn main() -> ExitCode {
    TermLogger::init(LevelFilter::Info, LogConfig::default(), TerminalMode::Mixed, ColorChoice::Auto)
        .expect("failed to initialize logger");

    let args = Args::parse();

    let mut config = match EngineConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => return fail(&err),
    };
    if let Some(dir) = args.dir {
        config.dir = dir;
    }
    if let Some(max_segment_size) = args.max_segment_size {
        config.max_segment_size = max_segment_size;
    }

    let engine = match Engine::open(&config.dir, config.max_segment_size) {
        Ok(engine) => engine,
        Err(err) => return fail(&err),
    };

    let result = match args.command {
        Command::Put { key, value } => engine.put(key.as_bytes(), value.as_bytes()),
        Command::Get { key } => match engine.get(key.as_bytes()) {
            Ok(value) => {
                println!("{}", String::from_utf8_lossy(&value));
                Ok(())
            }
            Err(err) => Err(err),
        },
        Command::Delete { key } => engine.delete(key.as_bytes()),
        Command::Compact => engine.compact(),
        Command::Status => match engine.status() {
            Ok(status) => {
                println!(
                    "keys: {}\nlive bytes: {}\ntotal bytes: {}\ngarbage bytes: {}",
                    status.keys, status.live_disk_size, status.total_disk_size, status.garbage_disk_size
                );
                Ok(())
            }
            Err(err) => Err(err),
        },
    };

    if let Err(err) = engine.close() {
        log::error!("failed to close database cleanly: {err}");
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => fail(&err),
    }
}

fn fail(err: &Error) -> ExitCode {
    eprintln!("error: {err}");
    match err {
        Error::KeyNotFound => ExitCode::from(2),
        _ => ExitCode::FAILURE,
    }
}
