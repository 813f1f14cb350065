use crate::log::LogSource;
use clap::{ArgAction, Parser, Subcommand};
use rmsprof_trace::config::DEFAULT_LOG_PATH;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "rmsprof")]
#[command(about = "Aggregate rmsprof traces into call graphs and worst-case cost tables")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(long, short = 'v', global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build callgraph.log and cost_table.log from a trace log
    Aggregate {
        /// Trace log: a file path or shm:/name
        #[arg(default_value = DEFAULT_LOG_PATH, value_parser = parse_source)]
        log: LogSource,

        /// Directory for the output tables
        #[arg(long, short = 'o', default_value = ".")]
        out_dir: PathBuf,

        /// Also export the results to a SQLite database
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Rank subjects by worst observed cost, callees before their callers
    Top {
        /// Trace log: a file path or shm:/name
        #[arg(default_value = DEFAULT_LOG_PATH, value_parser = parse_source)]
        log: LogSource,

        /// Number of entries to display
        #[arg(long, short = 'n', default_value = "20")]
        top: usize,

        /// Output as JSON
        #[arg(long, conflicts_with = "csv")]
        json: bool,

        /// Output as CSV
        #[arg(long)]
        csv: bool,

        /// File of `id,name` lines labelling subjects
        #[arg(long)]
        names: Option<PathBuf>,
    },

    /// Print raw records up to the terminator
    Dump {
        /// Trace log: a file path or shm:/name
        #[arg(default_value = DEFAULT_LOG_PATH, value_parser = parse_source)]
        log: LogSource,

        /// Stop after N records
        #[arg(long, short = 'l')]
        limit: Option<usize>,
    },

    /// Execute raw SQL query on an exported database
    Query {
        /// Database written by `aggregate --db`
        file: PathBuf,

        /// SQL query to execute
        sql: String,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

fn parse_source(s: &str) -> Result<LogSource, String> {
    LogSource::parse(s).map_err(|e| e.to_string())
}

impl Cli {
    pub fn validate(&self) -> Result<(), String> {
        if let Command::Top { top: 0, .. } = self.command {
            return Err("--top must be at least 1".to_string());
        }
        if let Command::Dump { limit: Some(0), .. } = self.command {
            return Err("--limit must be at least 1".to_string());
        }
        Ok(())
    }

    /// Default filter directive for the log subscriber when RUST_LOG is unset
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}
