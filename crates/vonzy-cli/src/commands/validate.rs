//! `vonzy validate`: check a workflow without running it.

use vonzy_core::workflow::rule::check_syntax;
use vonzy_core::workflow::{InputType, Step};
use vonzy_core::{ActionRegistry, Workflow};

pub fn run(config: &str) -> Result<(), String> {
    let workflow = super::load_workflow(config)?;
    let problems = check(&workflow, &ActionRegistry::new());

    if !problems.is_empty() {
        for problem in &problems {
            println!("❌ {}", problem);
        }
        return Err(format!(
            "Workflow '{}' has {} problem(s)",
            workflow.name,
            problems.len()
        ));
    }

    println!("✅ Workflow '{}' is valid", workflow.name);
    println!("   Log level: {}", workflow.log_level);
    println!("   Inputs: {}", workflow.inputs.len());
    println!("   Steps: {} ({} top-level)", workflow.step_count(), workflow.steps.len());
    Ok(())
}

/// Problems a run would hit before or while gating steps: unknown input
/// types, choice inputs without choices, unknown actions and malformed rules.
pub fn check(workflow: &Workflow, registry: &ActionRegistry) -> Vec<String> {
    let mut problems = Vec::new();

    for input in &workflow.inputs {
        match input.input_type {
            InputType::Unknown => {
                problems.push(format!("Input '{}': unsupported type", input.key));
            }
            InputType::List | InputType::Checkbox if input.choices.is_empty() => {
                problems.push(format!(
                    "Input '{}': type '{}' needs choices",
                    input.key, input.input_type
                ));
            }
            _ => {}
        }
    }

    check_steps(&workflow.steps, "", registry, &mut problems);
    problems
}

fn check_steps(
    steps: &[Step],
    parent: &str,
    registry: &ActionRegistry,
    problems: &mut Vec<String>,
) {
    for step in steps {
        let path = if parent.is_empty() {
            step.id.clone()
        } else {
            format!("{}.{}", parent, step.id)
        };

        let spec = step.action.to_spec();
        if !registry.contains(&spec.name, &spec.class) {
            problems.push(format!(
                "Step '{}': unknown action '{}' (available: {})",
                path,
                spec.name,
                registry.names().join(", ")
            ));
        }

        if let Some(rule) = &step.rule {
            if let Err(e) = check_syntax(rule) {
                problems.push(format!("Step '{}': bad rule '{}': {}", path, rule, e));
            }
        }

        for (i, command) in step.commands.iter().enumerate() {
            if let Some(rule) = command.rule() {
                if let Err(e) = check_syntax(rule) {
                    problems.push(format!(
                        "Step '{}' command {}: bad rule '{}': {}",
                        path,
                        i + 1,
                        rule,
                        e
                    ));
                }
            }
        }

        check_steps(&step.steps, &path, registry, problems);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_workflow_has_no_problems() {
        let workflow = Workflow::from_yaml(
            r#"
name: ok
inputs:
  - key: target
    type: list
    choices: [staging, production]
steps:
  - id: build
    use: vonzy.actions.shell
    rule: "inputs.target in ['staging', 'production']"
    commands:
      - make
      - rule: "env.CI is defined"
        cmd: make test
"#,
        )
        .unwrap();
        assert!(check(&workflow, &ActionRegistry::new()).is_empty());
    }

    #[test]
    fn test_reports_every_problem() {
        let workflow = Workflow::from_yaml(
            r#"
name: broken
inputs:
  - key: color
    type: slider
  - key: env
    type: checkbox
steps:
  - id: build
    use: teleport
    rule: "inputs.x =="
    steps:
      - id: inner
        use: shell
        commands:
          - rule: "(unclosed"
            cmd: echo hi
"#,
        )
        .unwrap();
        let problems = check(&workflow, &ActionRegistry::new());
        assert_eq!(problems.len(), 5, "{:#?}", problems);
        assert!(problems[0].contains("color"));
        assert!(problems[1].contains("needs choices"));
        assert!(problems[2].contains("unknown action 'teleport'"));
        assert!(problems[3].contains("bad rule"));
        assert!(problems[4].starts_with("Step 'build.inner' command 1"));
    }
}
