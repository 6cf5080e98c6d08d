//! envdeploy - main entry point
//!
//! Loads the environment file, then runs env init, every target init and env
//! post through the orchestrator. Exit code 0 on success, 1 on any fatal error.

use std::process::ExitCode;

use anyhow::Context;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use envdeploy::cli::Cli;
use envdeploy::config_file::EnvironmentConfig;
use envdeploy::console::ConsoleReporter;
use envdeploy::error::Result;
use envdeploy::orchestrator::{Orchestrator, RunReport};
use envdeploy::process_guard::{self, ProcessGuard};

/// Logs go to stderr so stdout carries only run progress and script output
fn init_logging(default_level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .context("Invalid log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(anyhow::Error::msg)
        .context("Failed to install log subscriber")
}

fn run(cli: &Cli, console: &mut ConsoleReporter) -> Result<RunReport> {
    let mut config = EnvironmentConfig::load_from_file(&cli.config)?;
    info!(
        "Loaded environment '{}' ({} target(s)) from {}",
        config.name,
        config.targets.len(),
        cli.config.display()
    );

    if !cli.modules_dir.is_dir() {
        console.warning(&format!(
            "Modules directory {} does not exist; every action will be skipped",
            cli.modules_dir.display()
        ));
    }

    Orchestrator::new(&cli.modules_dir)
        .with_options(cli.invoke_options())
        .with_mode(cli.run_mode())
        .run(&mut config, console)
}

fn main() -> ExitCode {
    let cli = Cli::parse_args();

    if let Err(e) = init_logging(cli.log_level()) {
        eprintln!("{:#}", e);
    }
    debug!("CLI arguments parsed: {:?}", cli);

    // Running actions are terminated if we receive SIGINT/SIGTERM/SIGHUP
    if let Err(e) = process_guard::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }
    let _guard = ProcessGuard::new();

    let mut console = ConsoleReporter::new();
    match run(&cli, &mut console) {
        Ok(report) => {
            console.finished(&report);
            ExitCode::SUCCESS
        }
        Err(err) => {
            console.fatal(&err);
            ExitCode::FAILURE
        }
    }
}
