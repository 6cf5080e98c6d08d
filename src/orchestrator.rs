//! Orchestration driver
//!
//! Drives one run over an environment: the environment module's `init`
//! action, then every target's `init` action in target-name order, then the
//! environment module's `post` action. Each step resolves the action,
//! validates its requirements against the scope's parameter set, invokes the
//! script and merges any `:::setParam` values back into that same set.
//!
//! The first fatal error aborts the run; actions already executed are not
//! rolled back. A missing script is not an error: the step is skipped with a
//! warning.

use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::action_runner::{self, ActionOutput, InvokeOptions};
use crate::config_file::EnvironmentConfig;
use crate::error::{DeployError, Result};
use crate::module_manifest::{ActionId, ActionName, DescriptorResolver, ModuleKind};
use crate::params::ParameterSet;
use crate::run_state::{RunContext, RunStage};
use crate::set_param::{MarkerChannel, ParamChannel};
use crate::validator::{self, CommandLookup, SearchPath};

/// Whether steps are executed or only checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    #[default]
    Execute,
    /// Resolve and validate every step without starting any script
    ValidateOnly,
}

/// Why a step was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Neither `<action>` nor `<action>.sh` exists
    NoScript,
    /// The script exists but the module descriptor has no entry for the action
    NotDeclared,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoScript => write!(f, "no script"),
            Self::NotDeclared => write!(f, "not declared in the module descriptor"),
        }
    }
}

/// Progress notifications emitted while a run proceeds
#[derive(Debug)]
pub enum RunEvent<'a> {
    StepStarted {
        stage: RunStage,
        action: &'a ActionId,
        scope: &'a str,
    },
    /// No script, or no descriptor entry, for the action
    StepSkipped {
        stage: RunStage,
        action: &'a ActionId,
        scope: &'a str,
        reason: SkipReason,
    },
    /// Requirements satisfied (validate-only mode stops here)
    StepValidated {
        stage: RunStage,
        action: &'a ActionId,
        scope: &'a str,
    },
    /// The script exited, successfully or not
    ActionFinished {
        action: &'a ActionId,
        output: &'a ActionOutput,
    },
    /// A `:::setParam` value was merged into the scope
    ParamSet {
        scope: &'a str,
        name: &'a str,
        value: &'a str,
    },
}

/// Receives `RunEvent`s as the run proceeds
pub trait RunObserver {
    fn on_event(&mut self, event: &RunEvent<'_>);
}

/// Observer that ignores everything
#[derive(Debug, Default)]
pub struct Silent;

impl RunObserver for Silent {
    fn on_event(&mut self, _event: &RunEvent<'_>) {}
}

/// What happened to one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Script ran; names of the parameters it set, in application order
    Ran { params_set: Vec<String> },
    /// Requirements checked, script not started
    Validated,
    /// No script for this action
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub stage: RunStage,
    pub action: ActionId,
    pub scope: String,
    pub outcome: StepOutcome,
}

/// Summary of a run that reached Done
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub steps: Vec<StepReport>,
}

impl RunReport {
    pub fn ran(&self) -> usize {
        self.count(|o| matches!(o, StepOutcome::Ran { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, StepOutcome::Skipped))
    }

    pub fn validated(&self) -> usize {
        self.count(|o| matches!(o, StepOutcome::Validated))
    }

    fn count(&self, pred: impl Fn(&StepOutcome) -> bool) -> usize {
        self.steps.iter().filter(|s| pred(&s.outcome)).count()
    }
}

/// Sequential, fail-fast driver for a deployment run
pub struct Orchestrator {
    resolver: DescriptorResolver,
    commands: Box<dyn CommandLookup>,
    channel: Box<dyn ParamChannel>,
    options: InvokeOptions,
    mode: RunMode,
}

impl Orchestrator {
    /// Driver over `modules_dir` using `PATH` and stdout markers
    pub fn new(modules_dir: impl Into<PathBuf>) -> Self {
        Self {
            resolver: DescriptorResolver::new(modules_dir),
            commands: Box::new(SearchPath::from_env()),
            channel: Box::new(MarkerChannel),
            options: InvokeOptions::default(),
            mode: RunMode::Execute,
        }
    }

    pub fn with_commands(mut self, commands: impl CommandLookup + 'static) -> Self {
        self.commands = Box::new(commands);
        self
    }

    pub fn with_channel(mut self, channel: impl ParamChannel + 'static) -> Self {
        self.channel = Box::new(channel);
        self
    }

    pub fn with_options(mut self, options: InvokeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    /// Run env init, every target init, then env post.
    ///
    /// Parameters extracted from a step are written into the parameter set of
    /// that step's scope inside `config`, so the caller sees the final values.
    pub fn run(
        &self,
        config: &mut EnvironmentConfig,
        observer: &mut dyn RunObserver,
    ) -> Result<RunReport> {
        config.validate()?;

        let mut ctx = RunContext::new(config.targets.len());
        let mut report = RunReport::default();

        match self.drive(config, &mut ctx, &mut report, observer) {
            Ok(()) => {
                info!(
                    "Run of '{}' complete: {} ran, {} skipped",
                    config.name,
                    report.ran(),
                    report.skipped()
                );
                Ok(report)
            }
            Err(err) => {
                let stage = ctx.current_stage();
                if ctx.abort().is_ok() {
                    debug!("Run of '{}' aborted during {}: {}", config.name, stage, err);
                }
                Err(err)
            }
        }
    }

    fn drive(
        &self,
        config: &mut EnvironmentConfig,
        ctx: &mut RunContext,
        report: &mut RunReport,
        observer: &mut dyn RunObserver,
    ) -> Result<()> {
        let env_scope = format!("environment '{}'", config.name);

        let init = ActionId::new(ModuleKind::Env, &config.module, ActionName::Init);
        report.steps.push(self.step(
            ctx.current_stage(),
            init,
            &env_scope,
            &mut config.params,
            observer,
        )?);

        for target in config.targets.values_mut() {
            let stage = ctx.advance()?;
            let scope = format!("target '{}'", target.name);
            let init = ActionId::new(ModuleKind::Target, &target.module, ActionName::Init);
            report
                .steps
                .push(self.step(stage, init, &scope, &mut target.params, observer)?);
        }

        let stage = ctx.advance()?;
        let post = ActionId::new(ModuleKind::Env, &config.module, ActionName::Post);
        report
            .steps
            .push(self.step(stage, post, &env_scope, &mut config.params, observer)?);

        ctx.transition_to(RunStage::Done)?;
        Ok(())
    }

    /// Resolve, validate, invoke and extract for one action
    fn step(
        &self,
        stage: RunStage,
        action: ActionId,
        scope: &str,
        params: &mut ParameterSet,
        observer: &mut dyn RunObserver,
    ) -> Result<StepReport> {
        observer.on_event(&RunEvent::StepStarted {
            stage,
            action: &action,
            scope,
        });

        let Some(resolved) = self.resolver.resolve(&action)? else {
            let reason = if self.resolver.script_path(&action).is_some() {
                SkipReason::NotDeclared
            } else {
                SkipReason::NoScript
            };
            info!("Skipping {} ({}): {}", action, scope, reason);
            observer.on_event(&RunEvent::StepSkipped {
                stage,
                action: &action,
                scope,
                reason,
            });
            return Ok(self.report(stage, action, scope, StepOutcome::Skipped));
        };

        validator::validate(&resolved.spec, params, self.commands.as_ref())?;
        observer.on_event(&RunEvent::StepValidated {
            stage,
            action: &action,
            scope,
        });

        if self.mode == RunMode::ValidateOnly {
            return Ok(self.report(stage, action, scope, StepOutcome::Validated));
        }

        let output = action_runner::invoke(&resolved.script_path, params, &self.options)
            .map_err(|err| relabel(err, &action))?;
        observer.on_event(&RunEvent::ActionFinished {
            action: &action,
            output: &output,
        });
        output.ensure_success(&action.to_string())?;

        let mut params_set = Vec::new();
        for (name, value) in self.channel.extract(&output) {
            info!("{} set {} for {}", action, name, scope);
            observer.on_event(&RunEvent::ParamSet {
                scope,
                name: &name,
                value: &value,
            });
            params.set(name.clone(), value);
            params_set.push(name);
        }

        Ok(self.report(stage, action, scope, StepOutcome::Ran { params_set }))
    }

    fn report(
        &self,
        stage: RunStage,
        action: ActionId,
        scope: &str,
        outcome: StepOutcome,
    ) -> StepReport {
        StepReport {
            stage,
            action,
            scope: scope.to_string(),
            outcome,
        }
    }
}

/// Name invoker errors by action identity rather than script path
fn relabel(err: DeployError, action: &ActionId) -> DeployError {
    match err {
        DeployError::Timeout {
            seconds,
            stdout,
            stderr,
            ..
        } => DeployError::Timeout {
            action: action.to_string(),
            seconds,
            stdout,
            stderr,
        },
        DeployError::Spawn { source, .. } => DeployError::Spawn {
            action: action.to_string(),
            source,
        },
        other => other,
    }
}
