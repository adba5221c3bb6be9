//! Interactive input collection with `dialoguer`.

use dialoguer::theme::ColorfulTheme;
use dialoguer::{Input as TextPrompt, MultiSelect, Password, Select};
use serde_json::{Map, Value};

use vonzy_core::workflow::inputs::{coerce_json, coerce_value, ensure_supported, is_valid_email};
use vonzy_core::workflow::{Input, InputCollector, InputType, PresetInputs};
use vonzy_core::{Result, VonzyError};

/// Prompts for every input that has no preset value.
///
/// Declared `value`s are used as-is; `default`s are offered as the prompt's
/// default answer.
pub struct DialoguerPrompter {
    presets: PresetInputs,
    theme: ColorfulTheme,
}

impl DialoguerPrompter {
    pub fn new(presets: PresetInputs) -> Self {
        Self {
            presets,
            theme: ColorfulTheme::default(),
        }
    }

    fn ask(&self, input: &Input) -> Result<Option<Value>> {
        let default = input.default.as_ref().map(default_text);
        let value = match input.input_type {
            InputType::Text | InputType::Email | InputType::Number => {
                let answer = self.ask_text(input, default)?;
                if answer.trim().is_empty() && !input.required {
                    return Ok(None);
                }
                coerce_value(input, &answer)?
            }
            InputType::Password => {
                let answer = Password::with_theme(&self.theme)
                    .with_prompt(input.message())
                    .allow_empty_password(!input.required)
                    .interact()
                    .map_err(prompt_error)?;
                if answer.is_empty() {
                    return Ok(default.map(Value::String));
                }
                Value::String(answer)
            }
            InputType::List => {
                let picked = default
                    .as_deref()
                    .and_then(|d| input.choices.iter().position(|c| c == d))
                    .unwrap_or(0);
                let index = Select::with_theme(&self.theme)
                    .with_prompt(input.message())
                    .items(input.choices.as_slice())
                    .default(picked)
                    .interact()
                    .map_err(prompt_error)?;
                Value::String(input.choices[index].clone())
            }
            InputType::Checkbox => {
                let preselected = input
                    .default
                    .as_ref()
                    .map(|d| coerce_json(input, d))
                    .transpose()?
                    .unwrap_or(Value::Array(Vec::new()));
                let defaults: Vec<bool> = input
                    .choices
                    .iter()
                    .map(|c| match &preselected {
                        Value::Array(items) => items.iter().any(|i| i.as_str() == Some(c.as_str())),
                        _ => false,
                    })
                    .collect();
                let indexes = MultiSelect::with_theme(&self.theme)
                    .with_prompt(input.message())
                    .items(input.choices.as_slice())
                    .defaults(&defaults)
                    .interact()
                    .map_err(prompt_error)?;
                Value::Array(
                    indexes
                        .into_iter()
                        .map(|i| Value::String(input.choices[i].clone()))
                        .collect(),
                )
            }
            InputType::Unknown => {
                ensure_supported(input)?;
                return Ok(None);
            }
        };
        Ok(Some(value))
    }

    fn ask_text(&self, input: &Input, default: Option<String>) -> Result<String> {
        let input_type = input.input_type;
        let required = input.required;
        let mut prompt = TextPrompt::<String>::with_theme(&self.theme)
            .with_prompt(input.message())
            .allow_empty(!required)
            .validate_with(move |answer: &String| -> std::result::Result<(), String> {
                if answer.trim().is_empty() {
                    return if required { Err("A value is required".to_string()) } else { Ok(()) };
                }
                match input_type {
                    InputType::Email if !is_valid_email(answer) => {
                        Err("Please enter a valid email".to_string())
                    }
                    InputType::Number if answer.trim().parse::<i64>().is_err() => {
                        Err("Please enter a whole number".to_string())
                    }
                    _ => Ok(()),
                }
            });
        if let Some(default) = default {
            prompt = prompt.default(default);
        }
        prompt.interact_text().map_err(prompt_error)
    }
}

impl InputCollector for DialoguerPrompter {
    fn collect(&mut self, inputs: &[Input]) -> Result<Map<String, Value>> {
        let mut collected = Map::new();
        for input in inputs {
            ensure_supported(input)?;
            if matches!(input.input_type, InputType::List | InputType::Checkbox)
                && input.choices.is_empty()
            {
                return Err(VonzyError::Config(format!(
                    "Input '{}' has no choices",
                    input.key
                )));
            }

            let value = if let Some(raw) = self.presets.get(&input.key) {
                Some(coerce_value(input, raw)?)
            } else if let Some(preset) = &input.value {
                Some(coerce_json(input, preset)?)
            } else {
                self.ask(input)?
            };

            match value {
                Some(value) => {
                    collected.insert(input.key.clone(), value);
                }
                None if input.required => {
                    return Err(VonzyError::Config(format!(
                        "Input '{}' is required",
                        input.key
                    )))
                }
                None => {}
            }
        }
        Ok(collected)
    }
}

fn default_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn prompt_error(e: dialoguer::Error) -> VonzyError {
    VonzyError::Config(format!("Failed to read input: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(key: &str, input_type: InputType) -> Input {
        Input {
            key: key.to_string(),
            input_type,
            required: true,
            value: None,
            default: None,
            choices: Vec::new(),
            description: String::new(),
        }
    }

    #[test]
    fn test_presets_and_values_skip_prompting() {
        let mut port = input("port", InputType::Number);
        port.value = Some(json!(8080));
        let name = input("name", InputType::Text);

        let mut prompter = DialoguerPrompter::new(PresetInputs::new().with("name", "site"));
        let values = prompter.collect(&[port, name]).unwrap();
        assert_eq!(values["port"], json!(8080));
        assert_eq!(values["name"], json!("site"));
    }

    #[test]
    fn test_choice_inputs_need_choices() {
        let mut prompter = DialoguerPrompter::new(PresetInputs::new());
        let err = prompter.collect(&[input("env", InputType::List)]).unwrap_err();
        assert!(matches!(err, VonzyError::Config(_)));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let mut prompter = DialoguerPrompter::new(PresetInputs::new());
        let err = prompter.collect(&[input("x", InputType::Unknown)]).unwrap_err();
        assert!(matches!(err, VonzyError::InvalidAction(_)));
    }
}
