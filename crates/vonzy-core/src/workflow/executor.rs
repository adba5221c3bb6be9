//! Step traversal: runs a workflow's step tree.
//!
//! [`StepRunner`] is an iterator over [`StepResult`]s in pre-order: a parent's
//! result is recorded in the [`Context`] and yielded before any of its children
//! run; siblings run in declared order. For every step:
//!
//! 1. Evaluate its rule. A false (or broken) rule yields `skipped` and the
//!    action is never touched.
//! 2. Resolve a fresh action from the registry with the step's rendered params.
//! 3. `initialize()`, then `execute()` each command whose own rule matches.
//!    The first failing command aborts the rest.
//! 4. `cleanup()` always runs once `initialize()` was attempted; a cleanup error
//!    replaces the step's outcome.
//!
//! A failed step does not stop the run unless `on_failure: stop`; children of a
//! skipped step are still visited unless `on_skip: prune`.

use std::fmt;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use crate::action::{Action, ActionConfig, ActionRegistry, LineSink};
use crate::cancel::CancelToken;
use crate::error::{Result, VonzyError};
use crate::workflow::context::Context;
use crate::workflow::rule;
use crate::workflow::schema::{CommandBody, OnFailure, OnSkip, Step, Workflow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Success,
    Error,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Success => "success",
            StepStatus::Error => "error",
            StepStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one step.
#[derive(Debug)]
pub struct StepResult<'w> {
    pub step: &'w Step,
    /// Ancestor ids followed by the step's own id.
    pub path: Vec<String>,
    pub status: StepStatus,
    pub error: Option<VonzyError>,
    pub output: Vec<String>,
    /// Exit status reported by the action's `cleanup()`.
    pub exit_code: Option<i32>,
    pub elapsed: Duration,
}

impl<'w> StepResult<'w> {
    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }

    /// Nesting depth; top-level steps are at depth 0.
    pub fn depth(&self) -> usize {
        self.path.len().saturating_sub(1)
    }

    /// The record stored in the context under `steps[...]["result"]`.
    pub fn to_json(&self) -> Value {
        json!({
            "status": self.status.as_str(),
            "error": self.error.as_ref().map(|e| e.to_string()),
            "output": self.output,
            "exit_code": self.exit_code,
        })
    }
}

struct Frame<'w> {
    step: &'w Step,
    parents: Vec<String>,
}

/// Lazy, single-pass traversal of a step tree.
pub struct StepRunner<'w, 'r> {
    context: &'r mut Context,
    registry: &'r ActionRegistry,
    cancel: CancelToken,
    on_failure: OnFailure,
    on_skip: OnSkip,
    line_sink: Option<LineSink>,
    stack: Vec<Frame<'w>>,
    finished: bool,
    interrupted: bool,
}

impl<'w, 'r> StepRunner<'w, 'r> {
    pub fn new(
        steps: Vec<&'w Step>,
        context: &'r mut Context,
        registry: &'r ActionRegistry,
    ) -> Self {
        let stack = steps
            .into_iter()
            .rev()
            .map(|step| Frame {
                step,
                parents: Vec::new(),
            })
            .collect();
        Self {
            context,
            registry,
            cancel: CancelToken::new(),
            on_failure: OnFailure::default(),
            on_skip: OnSkip::default(),
            line_sink: None,
            stack,
            finished: false,
            interrupted: false,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_on_failure(mut self, on_failure: OnFailure) -> Self {
        self.on_failure = on_failure;
        self
    }

    pub fn with_on_skip(mut self, on_skip: OnSkip) -> Self {
        self.on_skip = on_skip;
        self
    }

    /// Stream action output lines as they are captured.
    pub fn with_line_sink(mut self, sink: LineSink) -> Self {
        self.line_sink = Some(sink);
        self
    }

    /// Whether the run ended because of a cancellation request.
    pub fn interrupted(&self) -> bool {
        self.interrupted
    }

    fn run_step(&mut self, frame: &Frame<'w>) -> StepResult<'w> {
        let step = frame.step;
        let started = Instant::now();
        let mut path = frame.parents.clone();
        path.push(step.id.clone());

        let mut result = StepResult {
            step,
            path,
            status: StepStatus::Skipped,
            error: None,
            output: Vec::new(),
            exit_code: None,
            elapsed: Duration::ZERO,
        };

        if !rule::matches(step.rule.as_deref(), &*self.context) {
            tracing::info!("[Step] {} skipped", result.path.join("."));
            return result;
        }

        tracing::info!("[Step] {} running ({})", result.path.join("."), step.action);
        match self.execute_step(step, &mut result.output) {
            Ok(code) => {
                result.status = StepStatus::Success;
                result.exit_code = code;
            }
            Err((error, code)) => {
                tracing::error!("[Step] {} failed: {}", result.path.join("."), error);
                result.status = StepStatus::Error;
                result.error = Some(error);
                result.exit_code = code;
            }
        }
        result.elapsed = started.elapsed();
        result
    }

    /// Resolve, drive and clean up the step's action.
    fn execute_step(
        &self,
        step: &Step,
        output: &mut Vec<String>,
    ) -> std::result::Result<Option<i32>, (VonzyError, Option<i32>)> {
        let mut action = self.resolve_action(step).map_err(|e| (e, None))?;

        let outcome = drive(action.as_mut(), step, &*self.context, &self.cancel, output);
        let cleanup = action.cleanup();

        match (outcome, cleanup) {
            (_, Err(cleanup_error)) => Err((cleanup_error, None)),
            (Err(error), Ok(code)) => Err((error, code)),
            (Ok(()), Ok(code)) => Ok(code),
        }
    }

    fn resolve_action(&self, step: &Step) -> Result<Box<dyn Action>> {
        let spec = step.action.to_spec();
        let config = ActionConfig {
            name: spec.name,
            class: spec.class,
            params: self.context.render_map(&spec.params)?,
            cancel: self.cancel.clone(),
            on_line: self.line_sink.clone(),
        };
        self.registry.resolve(&config)
    }
}

/// `initialize()` then every matching command, stopping at the first error.
fn drive(
    action: &mut dyn Action,
    step: &Step,
    context: &Context,
    cancel: &CancelToken,
    output: &mut Vec<String>,
) -> Result<()> {
    action.initialize()?;

    for command in &step.commands {
        cancel.check()?;
        if !rule::matches(command.rule(), context) {
            tracing::debug!("[Step] {}: command '{}' skipped", step.id, command.body());
            continue;
        }
        let body = render_command(command.body(), context)?;
        tracing::debug!("[Step] {}: executing '{}'", step.id, body);
        let lines = action.execute(&body, context)?;
        output.extend(lines);
    }
    Ok(())
}

fn render_command(body: &CommandBody, context: &Context) -> Result<CommandBody> {
    let rendered = match body {
        CommandBody::Text(text) => CommandBody::Text(context.render(text)?),
        CommandBody::Params(params) => CommandBody::Params(context.render_map(params)?),
    };
    Ok(rendered)
}

impl<'w, 'r> Iterator for StepRunner<'w, 'r> {
    type Item = StepResult<'w>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if self.cancel.is_cancelled() {
            tracing::warn!("[Workflow] Interrupted, {} step(s) not started", self.stack.len());
            self.finished = true;
            self.interrupted = true;
            return None;
        }

        let frame = self.stack.pop()?;
        let mut result = self.run_step(&frame);

        if let Err(e) = self
            .context
            .record_result(&frame.parents, &frame.step.id, result.to_json())
        {
            tracing::error!("[Workflow] Failed to record result: {}", e);
            result.status = StepStatus::Error;
            result.error = Some(e);
        }

        if matches!(result.error, Some(VonzyError::Interrupted)) {
            self.finished = true;
            self.interrupted = true;
        } else if result.status == StepStatus::Error && self.on_failure == OnFailure::Stop {
            tracing::warn!("[Workflow] Stopping after failed step '{}'", frame.step.id);
            self.finished = true;
        }

        let descend = match result.status {
            StepStatus::Skipped => self.on_skip == OnSkip::Descend,
            _ => true,
        };
        if descend && !self.finished {
            let mut parents = frame.parents;
            parents.push(frame.step.id.clone());
            for child in frame.step.steps.iter().rev() {
                self.stack.push(Frame {
                    step: child,
                    parents: parents.clone(),
                });
            }
        }

        Some(result)
    }
}

impl Workflow {
    /// Traverse the whole step tree.
    pub fn runner<'w, 'r>(
        &'w self,
        context: &'r mut Context,
        registry: &'r ActionRegistry,
    ) -> StepRunner<'w, 'r> {
        StepRunner::new(self.steps.iter().collect(), context, registry)
            .with_on_failure(self.on_failure)
            .with_on_skip(self.on_skip)
    }

    /// Traverse only the selected top-level steps (all when `ids` is empty).
    pub fn runner_for<'w, 'r>(
        &'w self,
        ids: &[String],
        context: &'r mut Context,
        registry: &'r ActionRegistry,
    ) -> Result<StepRunner<'w, 'r>> {
        let steps = self.select_steps(ids)?;
        tracing::info!("[Workflow] Running '{}' ({} top-level steps)", self.name, steps.len());
        Ok(StepRunner::new(steps, context, registry)
            .with_on_failure(self.on_failure)
            .with_on_skip(self.on_skip))
    }
}
