//! Input collection.
//!
//! Inputs are collected once, before traversal, and merged into the context.
//! The interactive prompter lives in the CLI; [`PresetInputs`] is the
//! non-interactive collector used for `--input key=value` and in tests.
//!
//! Value coercion is shared by every collector: `number` becomes an integer,
//! `checkbox` a list of strings, everything else a string.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{Result, VonzyError};
use crate::workflow::schema::{Input, InputType};

/// Collects values for a workflow's declared inputs.
pub trait InputCollector {
    fn collect(&mut self, inputs: &[Input]) -> Result<Map<String, Value>>;
}

/// Non-interactive collector: preset values, then the declared value/default.
#[derive(Debug, Clone, Default)]
pub struct PresetInputs {
    values: HashMap<String, String>,
}

impl PresetInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Parse `key=value` pairs.
    pub fn from_pairs<S: AsRef<str>>(pairs: &[S]) -> Result<Self> {
        let mut values = HashMap::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                VonzyError::Config(format!("Invalid input '{}', expected KEY=VALUE", pair))
            })?;
            values.insert(key.trim().to_string(), value.to_string());
        }
        Ok(Self { values })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

impl InputCollector for PresetInputs {
    fn collect(&mut self, inputs: &[Input]) -> Result<Map<String, Value>> {
        let mut collected = Map::new();
        for input in inputs {
            ensure_supported(input)?;
            let value = match (self.values.get(&input.key), input.initial_value()) {
                (Some(raw), _) => coerce_value(input, raw)?,
                (None, Some(initial)) => coerce_json(input, initial)?,
                (None, None) if input.required => {
                    return Err(VonzyError::Config(format!(
                        "Input '{}' is required",
                        input.key
                    )))
                }
                (None, None) => continue,
            };
            tracing::debug!("[Inputs] {} = {}", input.key, display_value(input, &value));
            collected.insert(input.key.clone(), value);
        }
        Ok(collected)
    }
}

/// Fail with `InvalidAction` for input types no collector can render.
pub fn ensure_supported(input: &Input) -> Result<()> {
    match input.input_type {
        InputType::Unknown => Err(VonzyError::InvalidAction(format!(
            "Unsupported input type for '{}'",
            input.key
        ))),
        _ => Ok(()),
    }
}

fn email_pattern() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static email pattern is valid")
    })
}

pub fn is_valid_email(text: &str) -> bool {
    email_pattern().is_match(text.trim())
}

/// Coerce raw text to the value type of `input`.
pub fn coerce_value(input: &Input, raw: &str) -> Result<Value> {
    let invalid = |reason: String| VonzyError::Config(format!("Input '{}': {}", input.key, reason));

    match input.input_type {
        InputType::Number => raw
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| invalid(format!("'{}' is not a number", raw))),
        InputType::Email => {
            if is_valid_email(raw) {
                Ok(Value::String(raw.trim().to_string()))
            } else {
                Err(invalid(format!("'{}' is not a valid email", raw)))
            }
        }
        InputType::List => {
            check_choice(input, raw).map_err(invalid)?;
            Ok(Value::String(raw.to_string()))
        }
        InputType::Checkbox => {
            let mut picked = Vec::new();
            for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                check_choice(input, item).map_err(invalid)?;
                picked.push(Value::String(item.to_string()));
            }
            Ok(Value::Array(picked))
        }
        InputType::Text | InputType::Password => Ok(Value::String(raw.to_string())),
        InputType::Unknown => {
            ensure_supported(input)?;
            Ok(Value::Null)
        }
    }
}

/// Coerce a value declared in YAML (`value` / `default`).
pub fn coerce_json(input: &Input, value: &Value) -> Result<Value> {
    match (input.input_type, value) {
        (_, Value::String(raw)) => coerce_value(input, raw),
        (InputType::Number, Value::Number(n)) => n.as_i64().map(Value::from).ok_or_else(|| {
            VonzyError::Config(format!("Input '{}': {} is not an integer", input.key, n))
        }),
        (InputType::Checkbox, Value::Array(items)) => {
            let raw = items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(",");
            coerce_value(input, &raw)
        }
        (_, other) => coerce_value(input, &other.to_string()),
    }
}

fn check_choice(input: &Input, value: &str) -> std::result::Result<(), String> {
    if input.choices.is_empty() || input.choices.iter().any(|c| c == value) {
        Ok(())
    } else {
        Err(format!("'{}' is not one of {:?}", value, input.choices))
    }
}

fn display_value(input: &Input, value: &Value) -> String {
    match input.input_type {
        InputType::Password => "******".to_string(),
        _ => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(key: &str, input_type: InputType) -> Input {
        Input {
            key: key.to_string(),
            input_type,
            required: false,
            value: None,
            default: None,
            choices: Vec::new(),
            description: String::new(),
        }
    }

    #[test]
    fn test_preset_values_are_coerced() {
        let inputs = vec![
            input("retries", InputType::Number),
            input("features", InputType::Checkbox),
            input("name", InputType::Text),
        ];
        let mut collector =
            PresetInputs::from_pairs(&["retries=3", "features=a, b", "name=x=y"]).unwrap();
        let values = collector.collect(&inputs).unwrap();
        assert_eq!(values["retries"], json!(3));
        assert_eq!(values["features"], json!(["a", "b"]));
        assert_eq!(values["name"], json!("x=y"));
    }

    #[test]
    fn test_defaults_and_declared_values() {
        let mut retries = input("retries", InputType::Number);
        retries.default = Some(json!(2));
        let mut target = input("target", InputType::List);
        target.choices = vec!["staging".to_string(), "production".to_string()];
        target.value = Some(json!("production"));
        target.default = Some(json!("staging"));
        let optional = input("note", InputType::Text);

        let values = PresetInputs::new().collect(&[retries, target, optional]).unwrap();
        assert_eq!(values["retries"], json!(2));
        assert_eq!(values["target"], json!("production"));
        assert!(!values.contains_key("note"));
    }

    #[test]
    fn test_required_input_missing() {
        let mut token = input("token", InputType::Password);
        token.required = true;
        let err = PresetInputs::new().collect(&[token]).unwrap_err();
        assert!(matches!(err, VonzyError::Config(_)));
    }

    #[test]
    fn test_unknown_type_is_invalid_action() {
        let color = input("color", InputType::Unknown);
        let err = PresetInputs::new().with("color", "red").collect(&[color]).unwrap_err();
        assert!(matches!(err, VonzyError::InvalidAction(_)));
    }

    #[test]
    fn test_validation_failures() {
        let email = input("email", InputType::Email);
        assert!(coerce_value(&email, "dev@example.org").is_ok());
        assert!(coerce_value(&email, "not-an-email").is_err());

        let number = input("n", InputType::Number);
        assert!(coerce_value(&number, "twelve").is_err());

        let mut list = input("target", InputType::List);
        list.choices = vec!["staging".to_string()];
        assert!(coerce_value(&list, "production").is_err());
    }

    #[test]
    fn test_malformed_pair() {
        assert!(PresetInputs::from_pairs(&["novalue"]).is_err());
    }
}
