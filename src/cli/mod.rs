use std::env;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::args::{Cli, Command};
use crate::cli::commands::{exit_for_error, install, restore, stage, verify};
use crate::config::load_or_default;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const SUBCOMMANDS: [&str; 5] = ["install", "verify", "stage", "restore", "help"];

pub mod args;
pub mod commands;

pub fn run() -> Result<()> {
    let cli = Cli::try_parse_from(preprocess_args(env::args().collect())).unwrap_or_else(|err| err.exit());
    init_tracing(cli.verbose);
    info!(version = VERSION, "kavita-update");

    let config = match load_or_default(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => exit_for_error(&err),
    };

    let outcome = match cli.command {
        Command::Install(args) => install::run_install(&config, args),
        Command::Verify(args) => verify::run_verify(args),
        Command::Stage(args) => stage::run_stage(&config, args),
        Command::Restore(args) => restore::run_restore(&config, args),
    };
    if let Err(err) = outcome {
        exit_for_error(&err);
    }
    Ok(())
}

// The application launches the updater as `kavita-update <pid> ...`; a bare
// first positional becomes the `install` subcommand.
fn preprocess_args(raw: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(raw.len() + 1);
    let mut iter = raw.into_iter();
    if let Some(bin) = iter.next() {
        out.push(bin);
    }
    let mut inserted = false;
    let mut takes_value = false;
    for arg in iter {
        if !inserted && !takes_value && !arg.starts_with('-') {
            if !SUBCOMMANDS.contains(&arg.as_str()) {
                out.push("install".to_string());
            }
            inserted = true;
        } else if !inserted && !takes_value && is_number(&arg) {
            out.push("install".to_string());
            inserted = true;
        }
        takes_value = !inserted && arg == "--config";
        out.push(arg);
    }
    out
}

fn is_number(arg: &str) -> bool {
    arg.strip_prefix('-')
        .map(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
