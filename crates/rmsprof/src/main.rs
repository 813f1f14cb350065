use anyhow::Context;
use clap::{CommandFactory, Parser};
use rmsprof::cli::{Cli, Command};
use rmsprof::error::exit_code;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::from(exit_code::SUCCESS as u8),
        Err(e) => {
            eprintln!("Error: {e:#}");
            if let Some(rmsprof_err) = e.downcast_ref::<rmsprof::Error>() {
                ExitCode::from(rmsprof_err.exit_code() as u8)
            } else if e.chain().any(|cause| cause.downcast_ref::<InvalidArgs>().is_some()) {
                ExitCode::from(exit_code::INVALID_ARGUMENTS as u8)
            } else {
                ExitCode::from(exit_code::GENERAL_ERROR as u8)
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct InvalidArgs(String);

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("rmsprof={default_level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level());

    cli.validate()
        .map_err(InvalidArgs)
        .context("Invalid arguments")?;

    match cli.command {
        Command::Aggregate { log, out_dir, db } => {
            rmsprof::commands::aggregate::run(&log, &out_dir, db.as_deref())
                .with_context(|| format!("Failed to aggregate {log}"))?;
        }
        Command::Top {
            log,
            top,
            json,
            csv,
            names,
        } => {
            rmsprof::commands::top::run(&log, top, json, csv, names.as_deref())?;
        }
        Command::Dump { log, limit } => {
            rmsprof::commands::dump::run(&log, limit)?;
        }
        Command::Query { file, sql } => {
            rmsprof::commands::query::run(&file, &sql)?;
        }
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "rmsprof", &mut std::io::stdout());
        }
    }

    Ok(())
}
