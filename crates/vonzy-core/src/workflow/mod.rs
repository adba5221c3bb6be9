//! Workflow engine: YAML-defined step trees with rule gating.
//!
//! # Architecture
//!
//! ```text
//! vonzy.yml ──► Workflow ──► build_context() ──► Context
//!                  │            (env files, inputs, process env)
//!                  ▼
//!             StepRunner ──► rule::matches ──► ActionRegistry ──► Action
//!                  │                                                │
//!                  ◄──────────── StepResult (recorded in Context) ◄─┘
//! ```

pub mod context;
pub mod env;
pub mod executor;
pub mod inputs;
pub mod rule;
pub mod schema;

pub use context::Context;
pub use env::load_env_files;
pub use executor::{StepResult, StepRunner, StepStatus};
pub use inputs::{InputCollector, PresetInputs};
pub use schema::{
    ActionRef, ActionSpec, Command, CommandBody, CommandRule, EnvFiles, Input, InputType,
    OnFailure, OnSkip, Step, Workflow,
};
