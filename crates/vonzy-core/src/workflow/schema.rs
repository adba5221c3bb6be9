//! YAML schema types for workflow definitions.
//!
//! A workflow YAML defines a tree of steps, each bound to an action:
//!
//! ```yaml
//! name: "Deploy"
//! log_level: info
//! env_file: [".env", ".env.local"]
//!
//! inputs:
//!   - key: target
//!     type: list
//!     description: "Where to deploy"
//!     choices: [staging, production]
//!
//! steps:
//!   - id: build
//!     name: "Build"
//!     use: shell
//!     commands:
//!       - cargo build --release
//!       - rule: "inputs.target == 'production'"
//!         cmd: "cargo test --release"
//!     steps:
//!       - id: upload
//!         name: "Upload"
//!         use:
//!           name: rsync
//!           params:
//!             source: target/release/app
//!             destination: /srv/app
//!         rule: "steps.build.result.status == 'success'"
//! ```

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, VonzyError};

/// Top-level workflow definition loaded from a YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Workflow name
    pub name: String,

    /// Log level: trace, debug, info, warning, error, critical, off or notset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Env file(s) loaded before the run starts
    #[serde(default)]
    pub env_file: Option<EnvFiles>,

    /// Values collected from the user before traversal
    #[serde(default)]
    pub inputs: Vec<Input>,

    /// Top-level steps, executed in order
    pub steps: Vec<Step>,

    /// What to do after a step fails
    #[serde(default)]
    pub on_failure: OnFailure,

    /// What to do with the children of a skipped step
    #[serde(default)]
    pub on_skip: OnSkip,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// One env file or a list of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvFiles {
    One(String),
    Many(Vec<String>),
}

impl EnvFiles {
    pub fn paths(&self) -> Vec<&str> {
        match self {
            EnvFiles::One(path) => vec![path.as_str()],
            EnvFiles::Many(paths) => paths.iter().map(String::as_str).collect(),
        }
    }
}

/// What to do when a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
    /// Keep traversing siblings and children (default)
    #[default]
    Continue,
    /// End the run after the failed step's result
    Stop,
}

/// What to do with the children of a skipped step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OnSkip {
    /// Visit children anyway; their own rules decide (default)
    #[default]
    Descend,
    /// Skip the whole subtree without emitting results for it
    Prune,
}

/// Widget type of an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Text,
    Email,
    Password,
    Number,
    List,
    Checkbox,
    /// Any other string; rejected with `InvalidAction` when collected.
    #[serde(other)]
    Unknown,
}

impl fmt::Display for InputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InputType::Text => "text",
            InputType::Email => "email",
            InputType::Password => "password",
            InputType::Number => "number",
            InputType::List => "list",
            InputType::Checkbox => "checkbox",
            InputType::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// A value collected before the run and merged into the context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Input {
    pub key: String,

    #[serde(rename = "type")]
    pub input_type: InputType,

    #[serde(default)]
    pub required: bool,

    /// Preset value; takes precedence over `default`
    #[serde(default)]
    pub value: Option<Value>,

    #[serde(default)]
    pub default: Option<Value>,

    /// Choices for `list` and `checkbox` inputs
    #[serde(default)]
    pub choices: Vec<String>,

    #[serde(default)]
    pub description: String,
}

impl Input {
    /// Preset value, falling back to the default.
    pub fn initial_value(&self) -> Option<&Value> {
        self.value.as_ref().or(self.default.as_ref())
    }

    /// Prompt text shown to the user.
    pub fn message(&self) -> &str {
        if self.description.is_empty() {
            &self.key
        } else {
            &self.description
        }
    }
}

/// Reference to the action a step is bound to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionRef {
    /// Bare action name, e.g. `shell`
    Name(String),
    /// Action with parameters
    Detailed(ActionSpec),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSpec {
    pub name: String,

    #[serde(default)]
    pub params: Map<String, Value>,

    /// Class hint inside the action module
    #[serde(default = "default_class", rename = "class", alias = "klass")]
    pub class: String,
}

pub fn default_class() -> String {
    "Action".to_string()
}

impl ActionRef {
    pub fn name(&self) -> &str {
        match self {
            ActionRef::Name(name) => name,
            ActionRef::Detailed(spec) => &spec.name,
        }
    }

    pub fn to_spec(&self) -> ActionSpec {
        match self {
            ActionRef::Name(name) => ActionSpec {
                name: name.clone(),
                params: Map::new(),
                class: default_class(),
            },
            ActionRef::Detailed(spec) => spec.clone(),
        }
    }
}

impl fmt::Display for ActionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A command handed to an action: plain text or a parameter mapping such as
/// `{cmd: "...", expect: "password:"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandBody {
    Text(String),
    Params(Map<String, Value>),
}

impl fmt::Display for CommandBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandBody::Text(text) => write!(f, "{}", text),
            CommandBody::Params(params) => match params.get("cmd").and_then(Value::as_str) {
                Some(cmd) => write!(f, "{}", cmd),
                None => write!(f, "{}", Value::Object(params.clone())),
            },
        }
    }
}

/// A command gated by its own rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRule {
    pub rule: String,
    pub cmd: CommandBody,
}

/// An entry of a step's `commands` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Command {
    Rule(CommandRule),
    Plain(CommandBody),
}

impl Command {
    pub fn rule(&self) -> Option<&str> {
        match self {
            Command::Rule(rule) => Some(&rule.rule),
            Command::Plain(_) => None,
        }
    }

    pub fn body(&self) -> &CommandBody {
        match self {
            Command::Rule(rule) => &rule.cmd,
            Command::Plain(body) => body,
        }
    }
}

/// A node of the step tree. Children are owned; ids are unique among siblings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(rename = "use")]
    pub action: ActionRef,

    #[serde(default)]
    pub rule: Option<String>,

    #[serde(default)]
    pub commands: Vec<Command>,

    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Step {
    /// Name for display, falling back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

impl Workflow {
    /// Parse and validate a workflow definition from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let workflow: Workflow = serde_yaml::from_str(yaml)?;
        workflow.validate()?;
        Ok(workflow)
    }

    /// Load a workflow definition from a file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            VonzyError::Config(format!("Failed to read workflow file '{}': {}", path, e))
        })?;
        Self::from_yaml(&content)
    }

    /// Check log level and per-parent id uniqueness.
    pub fn validate(&self) -> Result<()> {
        self.log_directive()?;
        validate_siblings(&self.steps, "<root>")
    }

    /// `tracing` level directive for `log_level`.
    pub fn log_directive(&self) -> Result<&'static str> {
        match self.log_level.to_ascii_lowercase().as_str() {
            "trace" => Ok("trace"),
            "debug" => Ok("debug"),
            "info" | "notset" => Ok("info"),
            "warn" | "warning" => Ok("warn"),
            "error" | "critical" | "fatal" => Ok("error"),
            "off" => Ok("off"),
            other => Err(VonzyError::Config(format!("Invalid log level '{}'", other))),
        }
    }

    /// Top-level steps restricted to `ids`, in declared order.
    ///
    /// An empty selection means every step. Unknown ids are an error.
    pub fn select_steps(&self, ids: &[String]) -> Result<Vec<&Step>> {
        if ids.is_empty() {
            return Ok(self.steps.iter().collect());
        }
        for id in ids {
            if !self.steps.iter().any(|s| &s.id == id) {
                return Err(VonzyError::InvalidStep(format!(
                    "Step '{}' not found. Available: {:?}",
                    id,
                    self.steps.iter().map(|s| s.id.as_str()).collect::<Vec<_>>()
                )));
            }
        }
        Ok(self.steps.iter().filter(|s| ids.contains(&s.id)).collect())
    }

    /// Total number of steps in the tree.
    pub fn step_count(&self) -> usize {
        fn count(steps: &[Step]) -> usize {
            steps.iter().map(|s| 1 + count(&s.steps)).sum()
        }
        count(&self.steps)
    }
}

fn validate_siblings(steps: &[Step], parent: &str) -> Result<()> {
    let mut seen = HashSet::new();
    for step in steps {
        if step.id.trim().is_empty() {
            return Err(VonzyError::Config(format!(
                "Step under '{}' has an empty id",
                parent
            )));
        }
        if !seen.insert(step.id.as_str()) {
            return Err(VonzyError::Config(format!(
                "Duplicate step id '{}' under '{}'",
                step.id, parent
            )));
        }
        validate_siblings(&step.steps, &step.id)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_workflow() {
        let yaml = r#"
name: "Test Flow"
steps:
  - id: build
    name: "Build"
    use: shell
    commands:
      - echo hi
"#;
        let wf = Workflow::from_yaml(yaml).unwrap();
        assert_eq!(wf.name, "Test Flow");
        assert_eq!(wf.log_level, "info");
        assert!(wf.inputs.is_empty());
        assert_eq!(wf.steps.len(), 1);
        assert_eq!(wf.steps[0].action.name(), "shell");
        assert_eq!(wf.on_failure, OnFailure::Continue);
        assert_eq!(wf.on_skip, OnSkip::Descend);
    }

    #[test]
    fn test_parse_full_workflow() {
        let yaml = r#"
name: "Deploy"
log_level: DEBUG
env_file: [".env", ".env.local"]
on_failure: stop
inputs:
  - key: target
    type: list
    description: "Where to deploy"
    choices: [staging, production]
  - key: retries
    type: number
    default: 3
steps:
  - id: build
    name: "Build"
    use:
      name: vonzy.actions.shell
      params:
        cwd: /tmp
        timeout: 5
    rule: "inputs.target != 'none'"
    commands:
      - cargo build
      - cmd: "secret"
        expect: "password:"
      - rule: "inputs.retries > 1"
        cmd: "cargo test"
    steps:
      - id: upload
        use: rsync
"#;
        let wf = Workflow::from_yaml(yaml).unwrap();
        assert_eq!(wf.log_directive().unwrap(), "debug");
        assert_eq!(wf.env_file.as_ref().unwrap().paths(), vec![".env", ".env.local"]);
        assert_eq!(wf.on_failure, OnFailure::Stop);
        assert_eq!(wf.inputs[0].input_type, InputType::List);
        assert_eq!(wf.inputs[1].initial_value(), Some(&serde_json::json!(3)));

        let build = &wf.steps[0];
        let spec = build.action.to_spec();
        assert_eq!(spec.name, "vonzy.actions.shell");
        assert_eq!(spec.class, "Action");
        assert_eq!(spec.params["timeout"], serde_json::json!(5));
        assert!(matches!(build.commands[0], Command::Plain(CommandBody::Text(_))));
        assert!(matches!(build.commands[1], Command::Plain(CommandBody::Params(_))));
        assert_eq!(build.commands[2].rule(), Some("inputs.retries > 1"));
        assert_eq!(build.commands[2].body().to_string(), "cargo test");
        assert_eq!(build.steps[0].display_name(), "upload");
        assert_eq!(wf.step_count(), 2);
    }

    #[test]
    fn test_unknown_input_type_parses() {
        let yaml = r#"
name: "x"
inputs:
  - key: color
    type: colorpicker
steps: []
"#;
        let wf = Workflow::from_yaml(yaml).unwrap();
        assert_eq!(wf.inputs[0].input_type, InputType::Unknown);
    }

    #[test]
    fn test_duplicate_sibling_ids_rejected() {
        let yaml = r#"
name: "x"
steps:
  - id: a
    use: shell
  - id: a
    use: shell
"#;
        assert!(matches!(Workflow::from_yaml(yaml), Err(VonzyError::Config(_))));
    }

    #[test]
    fn test_same_id_under_different_parents_allowed() {
        let yaml = r#"
name: "x"
steps:
  - id: a
    use: shell
    steps:
      - id: check
        use: shell
  - id: b
    use: shell
    steps:
      - id: check
        use: shell
"#;
        assert!(Workflow::from_yaml(yaml).is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let yaml = "name: x\nlog_level: loud\nsteps: []\n";
        assert!(matches!(Workflow::from_yaml(yaml), Err(VonzyError::Config(_))));
    }

    #[test]
    fn test_select_steps() {
        let yaml = r#"
name: "x"
steps:
  - id: a
    use: shell
  - id: b
    use: shell
  - id: c
    use: shell
"#;
        let wf = Workflow::from_yaml(yaml).unwrap();
        let picked = wf.select_steps(&["c".to_string(), "a".to_string()]).unwrap();
        assert_eq!(picked.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(), vec!["a", "c"]);
        assert_eq!(wf.select_steps(&[]).unwrap().len(), 3);
        assert!(matches!(
            wf.select_steps(&["zzz".to_string()]),
            Err(VonzyError::InvalidStep(_))
        ));
    }
}
