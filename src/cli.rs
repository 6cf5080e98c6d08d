use clap::{ArgAction, Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::action_runner::InvokeOptions;
use crate::orchestrator::RunMode;

/// envdeploy - deploy an environment by running its module actions
#[derive(Parser, Debug)]
#[command(name = "envdeploy")]
#[command(about = "Drive module action scripts to deploy an environment and its targets")]
#[command(version)]
pub struct Cli {
    /// What to do with the environment
    #[arg(short, long, value_enum)]
    pub action: RunAction,

    /// Path to the environment file (YAML)
    #[arg(short, long)]
    pub config: PathBuf,

    /// Directory holding `env/` and `target/` modules
    #[arg(short, long, default_value = "modules")]
    pub modules_dir: PathBuf,

    /// Kill an action and abort the run after this many seconds
    #[arg(short, long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Interpreter used to run action scripts
    #[arg(long, default_value = "bash")]
    pub shell: String,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RunAction {
    /// Run env init, every target init, then env post
    Init,
    /// Resolve and validate every step without running scripts
    Validate,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn run_mode(&self) -> RunMode {
        match self.action {
            RunAction::Init => RunMode::Execute,
            RunAction::Validate => RunMode::ValidateOnly,
        }
    }

    pub fn invoke_options(&self) -> InvokeOptions {
        InvokeOptions {
            shell: self.shell.clone(),
            timeout: self.timeout.map(Duration::from_secs),
            working_dir: None,
        }
    }

    /// Default tracing filter when `RUST_LOG` is unset
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_action_and_config_required() {
        assert!(Cli::try_parse_from(["envdeploy"]).is_err());
        assert!(Cli::try_parse_from(["envdeploy", "--action", "init"]).is_err());
        assert!(Cli::try_parse_from(["envdeploy", "--config", "myenv.yaml"]).is_err());
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["envdeploy", "-a", "init", "-c", "myenv.yaml"]).unwrap();

        assert_eq!(cli.action, RunAction::Init);
        assert_eq!(cli.config, PathBuf::from("myenv.yaml"));
        assert_eq!(cli.modules_dir, PathBuf::from("modules"));
        assert_eq!(cli.run_mode(), RunMode::Execute);
        assert_eq!(cli.invoke_options(), InvokeOptions::default());
        assert_eq!(cli.log_level(), "warn");
    }

    #[test]
    fn test_validate_with_timeout() {
        let cli = Cli::try_parse_from([
            "envdeploy", "--action", "validate", "--config", "e.yaml", "-t", "90", "-vv",
        ])
        .unwrap();

        assert_eq!(cli.run_mode(), RunMode::ValidateOnly);
        assert_eq!(cli.invoke_options().timeout, Some(Duration::from_secs(90)));
        assert_eq!(cli.log_level(), "debug");
    }

    #[test]
    fn test_unknown_action_rejected() {
        assert!(Cli::try_parse_from(["envdeploy", "-a", "deploy", "-c", "e.yaml"]).is_err());
    }
}
