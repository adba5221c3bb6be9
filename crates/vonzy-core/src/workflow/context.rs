//! Run context: the shared state threaded through a workflow run.
//!
//! Holds the environment, collected inputs, their flat merged view (`ctx`) and
//! the nested per-step results (`steps`). The context is built once, before
//! traversal, and afterwards only grows: each step appends its own result at
//! `steps[id1]...[idN]["result"]`.

use serde_json::{json, Map, Value as JsonValue};

use crate::error::{Result, VonzyError};
use crate::workflow::rule::{self, Value};

#[derive(Debug, Clone, Default)]
pub struct Context {
    env: Map<String, JsonValue>,
    inputs: Map<String, JsonValue>,
    ctx: Map<String, JsonValue>,
    steps: Map<String, JsonValue>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge environment variables into `env` and `ctx`. Inputs keep priority in `ctx`.
    pub fn merge_env<I, K, V>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in vars {
            let key = key.into();
            let value = JsonValue::String(value.into());
            if !self.inputs.contains_key(&key) {
                self.ctx.insert(key.clone(), value.clone());
            }
            self.env.insert(key, value);
        }
    }

    /// Merge collected input values into `inputs` and `ctx`.
    pub fn merge_inputs(&mut self, values: Map<String, JsonValue>) {
        for (key, value) in values {
            self.ctx.insert(key.clone(), value.clone());
            self.inputs.insert(key, value);
        }
    }

    pub fn env(&self) -> &Map<String, JsonValue> {
        &self.env
    }

    pub fn inputs(&self) -> &Map<String, JsonValue> {
        &self.inputs
    }

    pub fn ctx(&self) -> &Map<String, JsonValue> {
        &self.ctx
    }

    pub fn steps(&self) -> &Map<String, JsonValue> {
        &self.steps
    }

    /// Resolve a top-level name for rule evaluation.
    ///
    /// `ctx`, `env`, `inputs` and `steps` are the declared roots; any other bare
    /// name is looked up in the flat `ctx` view.
    pub fn lookup(&self, name: &str) -> Value {
        match name {
            "ctx" => Value::from_map(&self.ctx),
            "env" => Value::from_map(&self.env),
            "inputs" => Value::from_map(&self.inputs),
            "steps" => Value::from_map(&self.steps),
            other => self
                .ctx
                .get(other)
                .map(Value::from)
                .unwrap_or(Value::Undefined),
        }
    }

    /// Store a step result under `steps[parents...][id]["result"]`.
    ///
    /// Every ancestor must already have an entry; siblings are never touched.
    pub fn record_result(&mut self, parents: &[String], id: &str, result: JsonValue) -> Result<()> {
        let mut level = &mut self.steps;
        for (depth, parent) in parents.iter().enumerate() {
            level = level
                .get_mut(parent)
                .and_then(JsonValue::as_object_mut)
                .ok_or_else(|| {
                    VonzyError::InvalidStep(format!(
                        "Step '{}' not found -> {:?}",
                        parent,
                        &parents[..=depth]
                    ))
                })?;
        }

        let entry = level
            .entry(id.to_string())
            .or_insert_with(|| json!({}));
        match entry.as_object_mut() {
            Some(obj) => {
                obj.insert("result".to_string(), result);
                Ok(())
            }
            None => Err(VonzyError::InvalidStep(format!(
                "Entry for step '{}' is not a mapping",
                id
            ))),
        }
    }

    /// The entry stored for the step at `path` (ancestor ids then its own id).
    pub fn step_entry(&self, path: &[&str]) -> Option<&JsonValue> {
        let (first, rest) = path.split_first()?;
        let mut current = self.steps.get(*first)?;
        for id in rest {
            current = current.get(*id)?;
        }
        Some(current)
    }

    /// The recorded result for the step at `path`.
    pub fn result_at(&self, path: &[&str]) -> Option<&JsonValue> {
        self.step_entry(path)?.get("result")
    }

    /// Render `{{ expr }}` placeholders and `{root.path}` fields in `template`.
    pub fn render(&self, template: &str) -> Result<String> {
        rule::render_template(template, self)
    }

    /// Render every string inside a parameter value.
    pub fn render_json(&self, value: &JsonValue) -> Result<JsonValue> {
        Ok(match value {
            JsonValue::String(s) => JsonValue::String(self.render(s)?),
            JsonValue::Array(items) => JsonValue::Array(
                items
                    .iter()
                    .map(|item| self.render_json(item))
                    .collect::<Result<Vec<_>>>()?,
            ),
            JsonValue::Object(map) => JsonValue::Object(self.render_map(map)?),
            other => other.clone(),
        })
    }

    /// Render every string inside a parameter mapping.
    pub fn render_map(&self, map: &Map<String, JsonValue>) -> Result<Map<String, JsonValue>> {
        let mut out = Map::new();
        for (key, item) in map {
            out.insert(key.clone(), self.render_json(item)?);
        }
        Ok(out)
    }
}
