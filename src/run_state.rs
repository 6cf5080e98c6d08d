//! Run State Machine
//!
//! Authoritative record of where a deployment run is. Only forward moves to
//! the immediate next stage are accepted, so no step can be skipped or run
//! twice by mistake.
//!
//! # Stage Flow
//!
//! ```text
//! EnvInit
//!     ↓
//! TargetInit(0) → TargetInit(1) → … → TargetInit(n-1)   (skipped when n == 0)
//!     ↓
//! EnvPost
//!     ↓
//! Done
//!
//! (Any non-terminal stage can transition to Aborted)
//! ```

use std::fmt;
use thiserror::Error;

/// Stages of a run in sequential order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunStage {
    /// The environment module's `init` action
    EnvInit,

    /// The `init` action of the i-th target, in target-name order
    TargetInit(usize),

    /// The environment module's `post` action
    EnvPost,

    /// Run succeeded (terminal)
    Done,

    /// Run stopped on a fatal error (terminal)
    Aborted,
}

impl RunStage {
    /// Returns true for Done and Aborted
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }

    /// Next stage for a run over `target_count` targets
    pub const fn next(self, target_count: usize) -> Option<Self> {
        match self {
            Self::EnvInit if target_count > 0 => Some(Self::TargetInit(0)),
            Self::EnvInit => Some(Self::EnvPost),
            Self::TargetInit(i) if i + 1 < target_count => Some(Self::TargetInit(i + 1)),
            Self::TargetInit(_) => Some(Self::EnvPost),
            Self::EnvPost => Some(Self::Done),
            Self::Done | Self::Aborted => None,
        }
    }

    /// Position in the run; Aborted has none
    const fn position(self) -> Option<usize> {
        match self {
            Self::EnvInit => Some(0),
            Self::TargetInit(i) => Some(1 + i),
            Self::EnvPost => Some(usize::MAX - 1),
            Self::Done => Some(usize::MAX),
            Self::Aborted => None,
        }
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EnvInit => write!(f, "environment init"),
            Self::TargetInit(i) => write!(f, "target init #{}", i + 1),
            Self::EnvPost => write!(f, "environment post"),
            Self::Done => write!(f, "done"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Errors that can occur during state transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunTransitionError {
    /// Attempted to skip one or more stages
    #[error("Cannot skip from {from} to {to}")]
    SkippedStage { from: RunStage, to: RunStage },

    /// Attempted to go backwards
    #[error("Cannot go backwards from {from} to {to} (runs are forward-only)")]
    BackwardTransition { from: RunStage, to: RunStage },

    /// Attempted to transition from Done or Aborted
    #[error("Cannot transition from terminal state {from}")]
    FromTerminalState { from: RunStage },

    /// Target index beyond the configured targets
    #[error("Target index {index} out of range ({count} targets)")]
    NoSuchTarget { index: usize, count: usize },
}

/// Tracks the stage of one run.
///
/// # Example
///
/// ```
/// use envdeploy::run_state::{RunContext, RunStage};
///
/// let mut ctx = RunContext::new(1);
/// assert_eq!(ctx.current_stage(), RunStage::EnvInit);
///
/// ctx.advance().unwrap();
/// assert_eq!(ctx.current_stage(), RunStage::TargetInit(0));
///
/// // Cannot skip stages
/// assert!(ctx.transition_to(RunStage::Done).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct RunContext {
    current: RunStage,
    target_count: usize,
    aborted_at: Option<RunStage>,
    history: Vec<RunStage>,
}

impl RunContext {
    /// New run positioned at EnvInit
    pub fn new(target_count: usize) -> Self {
        Self {
            current: RunStage::EnvInit,
            target_count,
            aborted_at: None,
            history: vec![RunStage::EnvInit],
        }
    }

    #[inline]
    pub fn current_stage(&self) -> RunStage {
        self.current
    }

    #[inline]
    pub fn target_count(&self) -> usize {
        self.target_count
    }

    /// Stage that was running when the run aborted
    #[inline]
    pub fn aborted_at(&self) -> Option<RunStage> {
        self.aborted_at
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.current == RunStage::Done
    }

    #[inline]
    pub fn is_aborted(&self) -> bool {
        self.current == RunStage::Aborted
    }

    /// Every stage entered so far, in order
    pub fn history(&self) -> &[RunStage] {
        &self.history
    }

    /// Advance to the next stage in sequence.
    pub fn advance(&mut self) -> Result<RunStage, RunTransitionError> {
        let Some(next) = self.current.next(self.target_count) else {
            return Err(RunTransitionError::FromTerminalState { from: self.current });
        };
        self.enter(next);
        Ok(next)
    }

    /// Transition to a specific stage, which must be the next one.
    pub fn transition_to(&mut self, target: RunStage) -> Result<RunStage, RunTransitionError> {
        if self.current.is_terminal() {
            return Err(RunTransitionError::FromTerminalState { from: self.current });
        }

        if let RunStage::TargetInit(index) = target {
            if index >= self.target_count {
                return Err(RunTransitionError::NoSuchTarget {
                    index,
                    count: self.target_count,
                });
            }
        }

        match (target.position(), self.current.position()) {
            (Some(to), Some(from)) if to <= from => {
                return Err(RunTransitionError::BackwardTransition {
                    from: self.current,
                    to: target,
                });
            }
            _ => {}
        }

        if self.current.next(self.target_count) != Some(target) {
            return Err(RunTransitionError::SkippedStage {
                from: self.current,
                to: target,
            });
        }

        self.enter(target);
        Ok(target)
    }

    /// Mark the run as aborted, remembering where it stopped.
    pub fn abort(&mut self) -> Result<(), RunTransitionError> {
        if self.current.is_terminal() {
            return Err(RunTransitionError::FromTerminalState { from: self.current });
        }
        self.aborted_at = Some(self.current);
        self.enter(RunStage::Aborted);
        Ok(())
    }

    fn enter(&mut self, stage: RunStage) {
        tracing::debug!("Run stage: {} -> {}", self.current, stage);
        self.history.push(stage);
        self.current = stage;
    }
}

// Convert RunTransitionError to the main DeployError type
impl From<RunTransitionError> for crate::error::DeployError {
    fn from(err: RunTransitionError) -> Self {
        crate::error::DeployError::State(err.to_string())
    }
}
