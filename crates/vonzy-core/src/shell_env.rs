//! Locate executables for actions.
//!
//! The search path is the process `PATH` extended with a few user-level
//! install directories, so binaries such as `rsync` installed under `~/.local/bin`
//! are found even when the runner is launched from a minimal environment.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static SEARCH_PATH: OnceLock<Vec<PathBuf>> = OnceLock::new();

fn search_path() -> &'static [PathBuf] {
    SEARCH_PATH.get_or_init(resolve_search_path)
}

fn resolve_search_path() -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut dirs: Vec<PathBuf> = Vec::new();

    let current = std::env::var_os("PATH").unwrap_or_default();
    let candidates = std::env::split_paths(&current)
        .chain(well_known_dirs(&dirs::home_dir().unwrap_or_default()));

    for dir in candidates {
        if !dir.as_os_str().is_empty() && seen.insert(dir.clone()) {
            dirs.push(dir);
        }
    }

    tracing::debug!("[shell_env] Search path has {} entries", dirs.len());
    dirs
}

fn well_known_dirs(home: &Path) -> Vec<PathBuf> {
    let mut dirs = vec![
        home.join(".local").join("bin"),
        home.join(".cargo").join("bin"),
        home.join("bin"),
        PathBuf::from("/usr/local/bin"),
    ];
    #[cfg(target_os = "macos")]
    dirs.push(PathBuf::from("/opt/homebrew/bin"));
    #[cfg(target_os = "linux")]
    dirs.push(PathBuf::from("/snap/bin"));
    dirs.into_iter().filter(|d| d.is_dir()).collect()
}

/// Full path of `cmd`, or `None` when it cannot be found.
///
/// Names containing a path separator are checked as given.
pub fn which(cmd: &str) -> Option<String> {
    if cmd.contains(std::path::MAIN_SEPARATOR) {
        return Path::new(cmd).is_file().then(|| cmd.to_string());
    }

    search_path()
        .iter()
        .map(|dir| dir.join(cmd))
        .find(|candidate| candidate.is_file())
        .map(|found| found.to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_which_finds_sh() {
        let found = which("sh").expect("sh should be on PATH");
        assert!(found.ends_with("/sh"));
    }

    #[test]
    fn test_which_missing_binary() {
        assert!(which("definitely-not-a-real-binary-name").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_which_absolute_path() {
        assert_eq!(which("/bin/sh").as_deref(), Some("/bin/sh"));
        assert!(which("/no/such/binary").is_none());
    }
}
