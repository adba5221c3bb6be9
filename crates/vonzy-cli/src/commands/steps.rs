//! `vonzy steps`: print the step tree without executing anything.

use vonzy_core::workflow::Step;
use vonzy_core::Workflow;

use super::truncate;

const RULE_WIDTH: usize = 60;

pub fn run(config: &str) -> Result<(), String> {
    let workflow = super::load_workflow(config)?;
    print!("{}", render_tree(&workflow));
    Ok(())
}

/// Render the workflow as a box-drawing tree, one line per step.
pub fn render_tree(workflow: &Workflow) -> String {
    let mut out = format!("{} ({} steps)\n", workflow.name, workflow.step_count());
    render_children(&workflow.steps, "", &mut out);
    out
}

fn render_children(steps: &[Step], prefix: &str, out: &mut String) {
    for (i, step) in steps.iter().enumerate() {
        let last = i + 1 == steps.len();
        let (branch, extension) = if last { ("└── ", "    ") } else { ("├── ", "│   ") };
        out.push_str(prefix);
        out.push_str(branch);
        out.push_str(&describe(step));
        out.push('\n');
        render_children(&step.steps, &format!("{}{}", prefix, extension), out);
    }
}

fn describe(step: &Step) -> String {
    let mut line = format!("{} [{}]", step.id, step.action);
    if !step.name.is_empty() && step.name != step.id {
        line.push_str(&format!(" {}", step.name));
    }
    if !step.commands.is_empty() {
        line.push_str(&format!(" ({} cmd)", step.commands.len()));
    }
    if let Some(rule) = &step.rule {
        line.push_str(&format!(" if {}", truncate(rule.trim(), RULE_WIDTH)));
    }
    line
}
