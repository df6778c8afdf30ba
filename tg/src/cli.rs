//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

use crate::group::GroupOverrides;

/// TaskGroup - run shell commands as a bounded, rate-limited group
#[derive(Debug, Parser)]
#[command(
    name = "tg",
    about = "Run shell commands concurrently with a worker cap and a rate limit",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run every task in a job file and print the outputs in order
    Run {
        /// Job file (YAML)
        #[arg(value_name = "JOB")]
        job: PathBuf,

        /// Maximum concurrent tasks (0 or less means uncapped)
        #[arg(short = 'n', allow_negative_numbers = true)]
        n: Option<i64>,

        /// Minimum interval between task starts (e.g. 100ms, 1.5s)
        #[arg(short, long)]
        every: Option<String>,

        /// Tasks that may start back to back before the interval applies
        #[arg(short, long)]
        burst: Option<u32>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Check a job file and report its effective group options
    Validate {
        /// Job file (YAML)
        #[arg(value_name = "JOB")]
        job: PathBuf,
    },
}

impl Command {
    /// Group option overrides given on the command line
    pub fn overrides(&self) -> GroupOverrides {
        match self {
            Command::Run { n, every, burst, .. } => {
                debug!(?n, ?every, ?burst, "Command::overrides: run flags");
                GroupOverrides {
                    n: *n,
                    every: every.clone(),
                    burst: *burst,
                }
            }
            Command::Validate { .. } => GroupOverrides::default(),
        }
    }
}

/// Output format for task results
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use text or json", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_with_overrides() {
        let cli = Cli::try_parse_from(["tg", "run", "job.yml", "-n", "4", "--every", "10ms", "--format", "json"]).unwrap();
        let Command::Run { ref job, format, .. } = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(job, &PathBuf::from("job.yml"));
        assert_eq!(format, OutputFormat::Json);

        let overrides = cli.command.overrides();
        assert_eq!(overrides.n, Some(4));
        assert_eq!(overrides.every.as_deref(), Some("10ms"));
        assert_eq!(overrides.burst, None);
    }

    #[test]
    fn test_negative_n_is_accepted() {
        let cli = Cli::try_parse_from(["tg", "run", "job.yml", "-n", "-1"]).unwrap();
        assert_eq!(cli.command.overrides().n, Some(-1));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["tg", "validate", "job.yml", "-l", "debug", "--config", "tg.yml"]).unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert_eq!(cli.config, Some(PathBuf::from("tg.yml")));
        assert_eq!(cli.command.overrides(), GroupOverrides::default());
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("TEXT".parse::<OutputFormat>(), Ok(OutputFormat::Text));
        assert_eq!("json".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert!("table".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["tg"]).is_err());
    }
}
