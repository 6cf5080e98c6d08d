//! envdeploy library
//!
//! Core of the deployment orchestrator: resolves module actions, validates
//! their requirements, runs their scripts and threads `:::setParam` values
//! through the rest of the run.

pub mod action_runner;
pub mod cli;
pub mod config_file;
pub mod console;
pub mod error;
pub mod module_manifest;
pub mod orchestrator;
pub mod params;
pub mod process_guard;
pub mod run_state;
pub mod set_param;
pub mod validator;

// Re-export main types for convenience
pub use action_runner::{invoke, ActionOutput, InvokeOptions};
pub use config_file::{EnvironmentConfig, Target};
pub use error::{DeployError, ValidationError};
pub use module_manifest::{
    ActionId, ActionName, ActionSpec, DescriptorResolver, ModuleDescriptor, ModuleKind,
    ResolvedAction,
};
pub use orchestrator::{
    Orchestrator, RunEvent, RunMode, RunObserver, RunReport, Silent, SkipReason, StepOutcome,
    StepReport,
};
pub use params::ParameterSet;
pub use process_guard::{ChildRegistry, CommandProcessGroup, ProcessGuard};
pub use run_state::{RunContext, RunStage, RunTransitionError};
pub use set_param::{MarkerChannel, ParamChannel};
pub use validator::{validate, CommandLookup, SearchPath};
