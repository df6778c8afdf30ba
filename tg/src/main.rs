//! TaskGroup - bounded, rate-limited shell job runner
//!
//! CLI entry point for running and validating job files.

use std::path::Path;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use taskgroup::cli::{Cli, Command, OutputFormat};
use taskgroup::config::Config;
use taskgroup::group::GroupOverrides;
use taskgroup::job::{JobFile, TaskOutput};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level_str = cli_log_level.or(config_log_level);
    let level = match level_str.map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("INFO") | None => tracing::Level::INFO,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        Some(other) => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", other);
            tracing::Level::INFO
        }
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .try_init()
        .map_err(|e| eyre::eyre!("Failed to install subscriber: {}", e))?;

    debug!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());

    // Setup logging with priority: CLI > config > INFO default
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    let overrides = cli.command.overrides();
    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Run { job, format, .. } => {
            debug!(job = %job.display(), ?format, "main: matched Run command");
            cmd_run(&config, &job, &overrides, format).await
        }
        Command::Validate { job } => {
            debug!(job = %job.display(), "main: matched Validate command");
            cmd_validate(&config, &job)
        }
    }
}

/// Run a job file and print each task's output in registration order
async fn cmd_run(config: &Config, path: &Path, overrides: &GroupOverrides, format: OutputFormat) -> Result<()> {
    let job = JobFile::load(path).context(format!("Failed to load job from {}", path.display()))?;
    let options = job.options(&config.group, overrides);
    info!(tasks = job.tasks.len(), ?options, "cmd_run: starting job");

    let ctx = CancellationToken::new();
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling tasks");
            interrupt.cancel();
        }
    });

    let outputs = job.run(&ctx, &options).await.context("Job failed")?;
    print_outputs(&outputs, format)
}

fn print_outputs(outputs: &[TaskOutput], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(outputs).context("Failed to serialize outputs")?;
            println!("{}", json);
        }
        OutputFormat::Text => {
            for output in outputs {
                println!("{} {}", format!("[{}]", output.name).cyan().bold(), output.output);
            }
        }
    }
    Ok(())
}

/// Parse a job file and its effective options without running anything
fn cmd_validate(config: &Config, path: &Path) -> Result<()> {
    let job = JobFile::load(path).context(format!("Failed to load job from {}", path.display()))?;
    let options = job.options(&config.group, &GroupOverrides::default());
    options.validate().context("Invalid group options")?;

    println!("{} {}", "✓".green(), path.display());
    println!("  tasks: {}", job.tasks.len());
    println!(
        "  n: {}",
        if options.cap() == 0 {
            "uncapped".to_string()
        } else {
            options.cap().to_string()
        }
    );
    println!(
        "  every: {}",
        if options.every.is_empty() {
            "unlimited"
        } else {
            options.every.as_str()
        }
    );
    println!("  burst: {}", options.burst);
    Ok(())
}
