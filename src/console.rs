//! Operator-facing console output.
//!
//! Every line starts with the `»»»` marker; its colour tells progress
//! (green), warnings (yellow) and fatal errors (red) apart. Colour is only
//! used when the stream is a terminal.

use crossterm::style::Stylize;
use crossterm::tty::IsTty;
use std::io::{self, Write};

use crate::error::DeployError;
use crate::orchestrator::{RunEvent, RunObserver, RunReport};

const MARKER: &str = "»»»";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tone {
    Progress,
    Warning,
    Fatal,
}

/// Prints run progress to stdout and problems to stderr
#[derive(Debug, Clone)]
pub struct ConsoleReporter {
    color_out: bool,
    color_err: bool,
}

impl Default for ConsoleReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleReporter {
    /// Colour decided per stream by whether it is a terminal
    pub fn new() -> Self {
        Self {
            color_out: io::stdout().is_tty(),
            color_err: io::stderr().is_tty(),
        }
    }

    /// Never emit escape sequences
    pub fn plain() -> Self {
        Self {
            color_out: false,
            color_err: false,
        }
    }

    fn marker(&self, tone: Tone, color: bool) -> String {
        if !color {
            return MARKER.to_string();
        }
        match tone {
            Tone::Progress => MARKER.green().to_string(),
            Tone::Warning => MARKER.yellow().to_string(),
            Tone::Fatal => MARKER.red().to_string(),
        }
    }

    fn out(&self, line: &str) {
        let _ = writeln!(
            io::stdout(),
            "{} {}",
            self.marker(Tone::Progress, self.color_out),
            line
        );
    }

    fn err(&self, tone: Tone, line: &str) {
        let _ = writeln!(
            io::stderr(),
            "{} {}",
            self.marker(tone, self.color_err),
            line
        );
    }

    /// Final line of a successful run
    pub fn finished(&self, report: &RunReport) {
        if report.validated() > 0 && report.ran() == 0 {
            self.out(&format!(
                "✓ Validation passed: {} step(s) ready, {} skipped",
                report.validated(),
                report.skipped()
            ));
        } else {
            self.out(&format!(
                "✓ Run complete: {} step(s) ran, {} skipped",
                report.ran(),
                report.skipped()
            ));
        }
    }

    /// Fatal error, with the failed action's captured output when there is one
    pub fn fatal(&self, err: &DeployError) {
        self.err(Tone::Fatal, &format!("💥 {}", err));
        if let Some((stdout, stderr)) = err.captured_output() {
            let mut handle = io::stderr().lock();
            if !stdout.trim().is_empty() {
                let _ = writeln!(handle, "--- stdout ---\n{}", stdout.trim_end());
            }
            if !stderr.trim().is_empty() {
                let body = stderr.trim_end();
                let body = if self.color_err {
                    body.red().to_string()
                } else {
                    body.to_string()
                };
                let _ = writeln!(handle, "--- stderr ---\n{}", body);
            }
        }
    }

    /// Non-fatal problem
    pub fn warning(&self, msg: &str) {
        self.err(Tone::Warning, &format!("⚠ {}", msg));
    }
}

impl RunObserver for ConsoleReporter {
    fn on_event(&mut self, event: &RunEvent<'_>) {
        match event {
            RunEvent::StepStarted { action, scope, .. } => self.out(&format!(
                "🚀 Starting {} module {}/{} for {}",
                action.kind, action.module, action.action, scope
            )),
            RunEvent::StepSkipped { action, reason, .. } => {
                self.warning(&format!("Skipping {}: {}", action, reason))
            }
            RunEvent::StepValidated { .. } => {}
            RunEvent::ActionFinished { output, .. } => {
                // A failed action's output is printed with the fatal error
                if output.success && !output.stdout.is_empty() {
                    let _ = write!(io::stdout(), "{}", output.stdout);
                }
            }
            RunEvent::ParamSet { scope, name, .. } => {
                self.out(&format!("✚ {} set for {}", name, scope))
            }
        }
    }
}
