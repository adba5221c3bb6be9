//! `vonzy run`: execute a workflow's step tree.

use std::time::Duration;

use console::style;

use vonzy_core::{
    ActionRegistry, CancelToken, Context, LineSink, PresetInputs, StepResult, StepStatus, Workflow,
};

use crate::prompt::DialoguerPrompter;

/// Counts and failures of one run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub skipped: usize,
    /// Dotted paths of failed steps, in the order they ran.
    pub failed: Vec<String>,
    pub interrupted: bool,
}

impl RunSummary {
    fn record(&mut self, result: &StepResult<'_>) {
        match result.status {
            StepStatus::Success => self.succeeded += 1,
            StepStatus::Skipped => self.skipped += 1,
            StepStatus::Error => self.failed.push(result.path.join(".")),
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.skipped + self.failed.len()
    }

    pub fn into_result(self) -> Result<(), String> {
        if self.interrupted {
            Err("Run interrupted".to_string())
        } else if !self.failed.is_empty() {
            Err(format!("Workflow failed. Failed steps: {}", self.failed.join(", ")))
        } else {
            Ok(())
        }
    }
}

/// Run `config`, optionally restricted to the top-level `steps`.
pub async fn run(
    config: &str,
    steps: &[String],
    inputs: &[String],
    no_input: bool,
) -> Result<(), String> {
    let workflow = super::load_workflow(config)?;

    println!("📄 Loaded workflow: {} ({})", workflow.name, config);
    println!("   {} step(s)", workflow.step_count());
    println!();

    let presets = PresetInputs::from_pairs(inputs).map_err(|e| e.to_string())?;
    let mut context = if no_input || !console::user_attended() {
        workflow.build_context(&mut presets.clone())
    } else {
        workflow.build_context(&mut DialoguerPrompter::new(presets))
    }
    .map_err(|e| e.to_string())?;

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("[Run] Ctrl-C received, cancelling");
            eprintln!("\n⚠️  Interrupt received, stopping after the current step...");
            on_interrupt.cancel();
        }
    });

    tracing::info!("[Run] Starting '{}' from {}", workflow.name, config);
    let selected = steps.to_vec();
    let summary = tokio::task::spawn_blocking(move || {
        let registry = ActionRegistry::new();
        execute(&workflow, &selected, &mut context, &registry, cancel)
    })
    .await
    .map_err(|e| format!("Run task failed: {}", e))??;

    print_summary(&summary);
    summary.into_result()
}

/// Traverse the workflow, printing each result as it arrives.
pub fn execute(
    workflow: &Workflow,
    steps: &[String],
    context: &mut Context,
    registry: &ActionRegistry,
    cancel: CancelToken,
) -> Result<RunSummary, String> {
    let sink = LineSink::new(|line| println!("   {} {}", style("│").dim(), line));
    let mut runner = workflow
        .runner_for(steps, context, registry)
        .map_err(|e| e.to_string())?
        .with_cancel(cancel)
        .with_line_sink(sink);

    let mut summary = RunSummary::default();
    for result in runner.by_ref() {
        println!("{}", format_result(&result));
        summary.record(&result);
    }
    summary.interrupted = runner.interrupted();
    Ok(summary)
}

/// One progress line, indented by nesting depth.
pub fn format_result(result: &StepResult<'_>) -> String {
    let indent = "  ".repeat(result.depth());
    let name = result.step.display_name();
    let elapsed = style(format_elapsed(result.elapsed)).dim();
    match result.status {
        StepStatus::Success => format!("{}✅ {} {}", indent, style(name).green(), elapsed),
        StepStatus::Skipped => format!("{}⏭  {}", indent, style(name).dim()),
        StepStatus::Error => {
            let reason = result
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string());
            format!(
                "{}❌ {} {}\n{}   {}",
                indent,
                style(name).red().bold(),
                elapsed,
                indent,
                style(reason).red()
            )
        }
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    if elapsed.as_secs() >= 60 {
        format!("({}m{:02}s)", elapsed.as_secs() / 60, elapsed.as_secs() % 60)
    } else {
        format!("({:.1}s)", elapsed.as_secs_f64())
    }
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("── Summary ──");
    println!(
        "   {} step(s): {} succeeded, {} failed, {} skipped",
        summary.total(),
        summary.succeeded,
        summary.failed.len(),
        summary.skipped
    );
    if summary.interrupted {
        println!("\n{}", style("⚠️  Run interrupted").yellow());
    } else if summary.failed.is_empty() {
        println!("\n🎉 Workflow completed successfully!");
    }
}
