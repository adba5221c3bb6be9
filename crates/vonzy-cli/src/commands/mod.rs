//! CLI command implementations.
//!
//! Each submodule corresponds to a top-level CLI command and works on a
//! `vonzy_core::Workflow` loaded from the `--config` path.

pub mod run;
pub mod steps;
pub mod validate;

use vonzy_core::Workflow;

const FALLBACK_LOG_FILTER: &str = "vonzy_core=warn,vonzy_cli=info";

/// Load a workflow, mapping errors to the CLI's string errors.
pub fn load_workflow(config: &str) -> Result<Workflow, String> {
    Workflow::from_file(config).map_err(|e| e.to_string())
}

/// Log filter derived from the workflow's `log_level`.
///
/// Falls back to a quiet default when the file cannot be loaded; the command
/// itself reports the load error.
pub fn default_log_filter(config: &str) -> String {
    Workflow::from_file(config)
        .ok()
        .and_then(|workflow| workflow.log_directive().ok())
        .map(|level| format!("vonzy_core={level},vonzy_cli={level}"))
        .unwrap_or_else(|| FALLBACK_LOG_FILTER.to_string())
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a much longer text", 6), "a muc…");
    }

    #[test]
    fn test_default_log_filter_without_file() {
        assert_eq!(default_log_filter("/nonexistent/vonzy.yml"), FALLBACK_LOG_FILTER);
    }
}
