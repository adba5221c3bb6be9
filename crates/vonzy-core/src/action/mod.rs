//! Actions: the units of work a step is bound to.
//!
//! A step resolves a fresh action from the [`ActionRegistry`], then drives it
//! through `initialize` → `execute` (once per matching command) → `cleanup`.
//! `cleanup` runs exactly once whenever `initialize` was attempted.

pub mod registry;
pub mod rsync;
pub mod shell;

pub use registry::{ActionFactory, ActionRegistry};
pub use rsync::RsyncAction;
pub use shell::ShellDriver;

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::cancel::CancelToken;
use crate::error::{Result, VonzyError};
use crate::workflow::context::Context;
use crate::workflow::schema::CommandBody;

pub trait Action: Send {
    /// Acquire the action's resource, e.g. spawn a child process.
    fn initialize(&mut self) -> Result<()>;

    /// Run one command, already rendered against `context`, and return its
    /// captured output lines.
    fn execute(&mut self, command: &CommandBody, context: &Context) -> Result<Vec<String>>;

    /// Release the resource. Returns the exit status of the child, if any.
    fn cleanup(&mut self) -> Result<Option<i32>>;
}

/// Receives output lines as an action produces them.
#[derive(Clone)]
pub struct LineSink(Arc<dyn Fn(&str) + Send + Sync>);

impl LineSink {
    pub fn new(f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn emit(&self, line: &str) {
        (self.0)(line)
    }
}

impl fmt::Debug for LineSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LineSink")
    }
}

/// Everything a factory needs to build an action for one step.
#[derive(Debug, Clone)]
pub struct ActionConfig {
    pub name: String,
    pub class: String,
    /// Step params with templates already rendered.
    pub params: Map<String, Value>,
    pub cancel: CancelToken,
    pub on_line: Option<LineSink>,
}

impl ActionConfig {
    pub fn new(name: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            class: crate::workflow::schema::default_class(),
            params,
            cancel: CancelToken::new(),
            on_line: None,
        }
    }

    pub fn str_param(&self, key: &str) -> Result<Option<String>> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(other) => Err(self.bad_param(key, "a string", other)),
        }
    }

    pub fn u64_param(&self, key: &str) -> Result<Option<u64>> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_u64()
                .map(Some)
                .ok_or_else(|| {
                    self.bad_param(key, "a positive integer", &Value::Number(n.clone()))
                }),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| self.bad_param(key, "a positive integer", &Value::String(s.clone()))),
            Some(other) => Err(self.bad_param(key, "a positive integer", other)),
        }
    }

    pub fn f64_param(&self, key: &str) -> Result<Option<f64>> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_f64()),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| self.bad_param(key, "a number", &Value::String(s.clone()))),
            Some(other) => Err(self.bad_param(key, "a number", other)),
        }
    }

    pub fn bool_param(&self, key: &str) -> Result<Option<bool>> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(Some(true)),
                "false" | "no" | "0" => Ok(Some(false)),
                _ => Err(self.bad_param(key, "a boolean", &Value::String(s.clone()))),
            },
            Some(other) => Err(self.bad_param(key, "a boolean", other)),
        }
    }

    /// A list of strings; a single string is split on whitespace.
    pub fn list_param(&self, key: &str) -> Result<Vec<String>> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::String(s)) => Ok(s.split_whitespace().map(str::to_string).collect()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    Value::Number(n) => Ok(n.to_string()),
                    other => Err(self.bad_param(key, "a list of strings", other)),
                })
                .collect(),
            Some(other) => Err(self.bad_param(key, "a list of strings", other)),
        }
    }

    /// A string-to-string mapping.
    pub fn map_param(&self, key: &str) -> Result<Vec<(String, String)>> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Object(map)) => Ok(map
                .iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), v)
                })
                .collect()),
            Some(other) => Err(self.bad_param(key, "a mapping", other)),
        }
    }

    fn bad_param(&self, key: &str, expected: &str, got: &Value) -> VonzyError {
        VonzyError::InvalidAction(format!(
            "Action '{}': param '{}' must be {}, got {}",
            self.name, key, expected, got
        ))
    }
}
