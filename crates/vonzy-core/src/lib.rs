//! Vonzy Core: the engine behind the `vonzy` automation runner.
//!
//! A workflow is a tree of steps loaded from YAML. Each step is bound to an
//! action (`shell`, `rsync`, or anything registered by an embedder), may be
//! gated by a rule, and owns an ordered list of commands. Running a workflow
//! yields one [`StepResult`] per visited step, in pre-order, while results
//! accumulate in a shared [`Context`] that later rules can read.
//!
//! ```no_run
//! use vonzy_core::{ActionRegistry, PresetInputs, Workflow};
//!
//! # fn main() -> vonzy_core::Result<()> {
//! let workflow = Workflow::from_file("vonzy.yml")?;
//! let mut context = workflow.build_context(&mut PresetInputs::new())?;
//! let registry = ActionRegistry::new();
//! for result in workflow.runner(&mut context, &registry) {
//!     println!("{} {}", result.status, result.step.display_name());
//! }
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod cancel;
pub mod error;
pub mod shell_env;
pub mod workflow;

// Convenience re-exports
pub use action::{Action, ActionConfig, ActionRegistry, LineSink, RsyncAction, ShellDriver};
pub use cancel::CancelToken;
pub use error::{Result, VonzyError};
pub use workflow::{
    Context, InputCollector, PresetInputs, StepResult, StepRunner, StepStatus, Workflow,
};
