//! Error handling module for envdeploy
//!
//! Provides the error taxonomy of a deployment run using thiserror.
//! Every fatal condition is returned up the call chain as a `DeployError`;
//! only the binary decides whether to terminate the process.

use thiserror::Error;

/// Reasons an action's prerequisites are not satisfied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Environment or target declares no module
    #[error("No module specified for {scope}")]
    MissingModule { scope: String },

    /// Parameter name outside the `[A-Za-z_]+` grammar
    #[error("Invalid parameter name '{name}' in {scope} (allowed: letters and underscores)")]
    InvalidParamName { scope: String, name: String },

    /// Required parameter absent from the parameter set
    #[error("Required parameter {0} not found")]
    MissingParam(String),

    /// Required command not resolvable on the search path
    #[error("Required command {0} not found in system path")]
    MissingCommand(String),
}

/// Main error type for envdeploy
#[derive(Error, Debug)]
pub enum DeployError {
    /// Configuration or descriptor file missing, unreadable or unparsable
    #[error("Configuration error: {0}")]
    ConfigLoad(String),

    /// Action prerequisites or configuration invariants violated
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Action script exited unsuccessfully
    #[error("Action {action} failed with {}", exit_label(.exit_code))]
    Execution {
        action: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    /// Action script exceeded the configured timeout
    #[error("Action {action} timed out after {seconds}s")]
    Timeout {
        action: String,
        seconds: u64,
        stdout: String,
        stderr: String,
    },

    /// The shell interpreter could not be started
    #[error("Failed to spawn {action}: {source}")]
    Spawn {
        action: String,
        #[source]
        source: std::io::Error,
    },

    /// Run state machine violations
    #[error("Run state error: {0}")]
    State(String),

    /// Other IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "termination by signal".to_string(),
    }
}

/// Result type alias for envdeploy operations
pub type Result<T> = std::result::Result<T, DeployError>;

impl DeployError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigLoad(msg.into())
    }

    /// Captured output of the failed action, if any
    pub fn captured_output(&self) -> Option<(&str, &str)> {
        match self {
            Self::Execution { stdout, stderr, .. } | Self::Timeout { stdout, stderr, .. } => {
                Some((stdout.as_str(), stderr.as_str()))
            }
            _ => None,
        }
    }
}
