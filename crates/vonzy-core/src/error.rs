//! Core error type for Vonzy.
//!
//! `VonzyError` is used throughout the engine. Step-level failures are caught at
//! the step boundary and recorded on the `StepResult`; only config, input and
//! interrupt errors reach the caller of a run.

#[derive(Debug, thiserror::Error)]
pub enum VonzyError {
    /// An ancestor id path could not be found in the run context.
    #[error("Invalid step: {0}")]
    InvalidStep(String),

    /// Unknown action name/class, or an input with an unknown widget type.
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    /// An optional external capability (e.g. a binary on PATH) is unavailable.
    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    #[error("Rule evaluation error in '{rule}': {message}")]
    RuleEvaluation { rule: String, message: String },

    /// A command failed; `code` carries the inferred return code when known.
    #[error("Command execution error: {message}")]
    CommandExecution { message: String, code: Option<i32> },

    /// Spawning or acquiring the action's resource failed.
    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Invalid workflow configuration: {0}")]
    Config(String),

    #[error("Interrupted")]
    Interrupted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl VonzyError {
    pub fn command(message: impl Into<String>) -> Self {
        VonzyError::CommandExecution {
            message: message.into(),
            code: None,
        }
    }

    /// The inferred return code of a failed command, if any.
    pub fn return_code(&self) -> Option<i32> {
        match self {
            VonzyError::CommandExecution { code, .. } => *code,
            _ => None,
        }
    }
}

pub type Result<T, E = VonzyError> = std::result::Result<T, E>;
