//! Environment loading and run-context construction.

use std::path::Path;

use crate::error::{Result, VonzyError};
use crate::workflow::context::Context;
use crate::workflow::inputs::InputCollector;
use crate::workflow::schema::Workflow;

/// Load each env file into the process environment.
///
/// Variables already set in the environment win. Missing files are skipped with
/// a warning; unreadable or malformed files are an error.
pub fn load_env_files<P: AsRef<Path>>(paths: &[P]) -> Result<usize> {
    let mut loaded = 0;
    for path in paths {
        let path = path.as_ref();
        match dotenvy::from_path(path) {
            Ok(()) => {
                tracing::debug!("[Env] Loaded {}", path.display());
                loaded += 1;
            }
            Err(e) if e.not_found() => {
                tracing::warn!("[Env] Env file not found: {}", path.display());
            }
            Err(e) => {
                return Err(VonzyError::Config(format!(
                    "Failed to load env file '{}': {}",
                    path.display(),
                    e
                )))
            }
        }
    }
    Ok(loaded)
}

impl Workflow {
    /// Build the run context: env files, then inputs, then the process environment.
    pub fn build_context(&self, collector: &mut dyn InputCollector) -> Result<Context> {
        if let Some(files) = &self.env_file {
            load_env_files(&files.paths())?;
        }

        let values = collector.collect(&self.inputs)?;

        let mut ctx = Context::new();
        ctx.merge_inputs(values);
        ctx.merge_env(std::env::vars());
        tracing::info!(
            "[Workflow] Context ready: {} inputs, {} env vars",
            ctx.inputs().len(),
            ctx.env().len()
        );
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::inputs::PresetInputs;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_load_env_file_and_skip_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "VONZY_TEST_ENV_LOADED=yes").unwrap();

        let missing = dir.path().join("missing.env");
        let loaded = load_env_files(&[path, missing]).unwrap();
        assert_eq!(loaded, 1);
        assert_eq!(std::env::var("VONZY_TEST_ENV_LOADED").unwrap(), "yes");
    }

    #[test]
    fn test_build_context() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctx.env");
        std::fs::write(&path, "VONZY_TEST_CTX_VAR=from-file\n").unwrap();

        let yaml = format!(
            r#"
name: ctx
env_file: "{}"
inputs:
  - key: retries
    type: number
    default: 1
steps: []
"#,
            path.display()
        );
        let workflow = Workflow::from_yaml(&yaml).unwrap();
        let mut collector = PresetInputs::new().with("retries", "4");
        let ctx = workflow.build_context(&mut collector).unwrap();

        assert_eq!(ctx.env()["VONZY_TEST_CTX_VAR"], json!("from-file"));
        assert_eq!(ctx.inputs()["retries"], json!(4));
        assert_eq!(ctx.ctx()["retries"], json!(4));
        assert!(ctx.steps().is_empty());
    }
}
