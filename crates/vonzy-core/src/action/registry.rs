//! Action registry: maps a step's `use:` reference to an action constructor.
//!
//! The table is filled at startup (built-ins plus anything an embedder
//! registers). Names are normalized, so `shell`, `.shell` and
//! `vonzy.actions.shell` all resolve to the same entry. Every resolution builds
//! a fresh instance; resolved constructors are cached for the session.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::action::{Action, ActionConfig, RsyncAction, ShellDriver};
use crate::error::{Result, VonzyError};

/// Builds an action instance from its step configuration.
pub type ActionFactory = fn(&ActionConfig) -> Result<Box<dyn Action>>;

const NAMESPACE: &str = "vonzy.actions.";

type Key = (String, String);

pub struct ActionRegistry {
    factories: HashMap<Key, ActionFactory>,
    resolved: Mutex<HashMap<Key, ActionFactory>>,
}

impl ActionRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
            resolved: Mutex::new(HashMap::new()),
        }
    }

    /// A registry with the built-in actions.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register("shell", "Action", |config| {
            Ok(Box::new(ShellDriver::from_config(config)?))
        });
        registry.register("rsync", "Action", |config| {
            Ok(Box::new(RsyncAction::from_config(config)?))
        });
        registry
    }

    /// Register (or replace) a constructor for `name` / `class`.
    pub fn register(&mut self, name: &str, class: &str, factory: ActionFactory) {
        let key = (normalize_name(name), class.to_string());
        tracing::debug!("[ActionRegistry] Registered {}:{}", key.0, key.1);
        self.factories.insert(key, factory);
        if let Ok(mut resolved) = self.resolved.lock() {
            resolved.clear();
        }
    }

    pub fn contains(&self, name: &str, class: &str) -> bool {
        self.factories
            .contains_key(&(normalize_name(name), class.to_string()))
    }

    /// Registered action names, sorted and deduplicated.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().map(|(n, _)| n.clone()).collect();
        names.sort();
        names.dedup();
        names
    }

    /// Build a fresh action for `config.name` / `config.class`.
    pub fn resolve(&self, config: &ActionConfig) -> Result<Box<dyn Action>> {
        let factory = self.lookup(&config.name, &config.class)?;
        factory(config)
    }

    fn lookup(&self, name: &str, class: &str) -> Result<ActionFactory> {
        let key = (normalize_name(name), class.to_string());

        if let Some(factory) = self.resolved.lock().ok().and_then(|r| r.get(&key).copied()) {
            tracing::trace!("[ActionRegistry] Cache hit for {}:{}", key.0, key.1);
            return Ok(factory);
        }

        let factory = self.factories.get(&key).copied().ok_or_else(|| {
            if self.factories.keys().any(|(n, _)| *n == key.0) {
                VonzyError::InvalidAction(format!(
                    "Action '{}' has no class '{}'",
                    key.0, key.1
                ))
            } else {
                VonzyError::InvalidAction(format!(
                    "Unknown action '{}'. Available: {}",
                    name,
                    self.names().join(", ")
                ))
            }
        })?;

        tracing::debug!("[ActionRegistry] Resolved {}:{}", key.0, key.1);
        if let Ok(mut resolved) = self.resolved.lock() {
            resolved.insert(key, factory);
        }
        Ok(factory)
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// `vonzy.actions.shell`, `.shell` and `shell` are the same action.
pub fn normalize_name(name: &str) -> String {
    let name = name.trim().trim_start_matches('.');
    name.strip_prefix(NAMESPACE)
        .unwrap_or(name)
        .trim_start_matches('.')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::context::Context;
    use crate::workflow::schema::CommandBody;
    use serde_json::Map;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Noop;

    impl Action for Noop {
        fn initialize(&mut self) -> Result<()> {
            Ok(())
        }
        fn execute(&mut self, command: &CommandBody, _context: &Context) -> Result<Vec<String>> {
            Ok(vec![command.to_string()])
        }
        fn cleanup(&mut self) -> Result<Option<i32>> {
            Ok(None)
        }
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("shell"), "shell");
        assert_eq!(normalize_name(".shell"), "shell");
        assert_eq!(normalize_name("vonzy.actions.rsync"), "rsync");
        assert_eq!(normalize_name("..vonzy.actions.rsync"), "rsync");
    }

    #[test]
    fn test_builtins_registered() {
        let registry = ActionRegistry::new();
        assert!(registry.contains("shell", "Action"));
        assert!(registry.contains("vonzy.actions.rsync", "Action"));
        assert_eq!(registry.names(), vec!["rsync", "shell"]);
    }

    #[test]
    fn test_unknown_action_fails_fast() {
        let registry = ActionRegistry::new();
        let err = registry
            .resolve(&ActionConfig::new("teleport", Map::new()))
            .err()
            .unwrap();
        assert!(matches!(err, VonzyError::InvalidAction(_)));

        let mut config = ActionConfig::new("shell", Map::new());
        config.class = "Other".to_string();
        assert!(matches!(registry.resolve(&config), Err(VonzyError::InvalidAction(_))));
    }

    #[test]
    fn test_each_resolution_is_a_fresh_instance() {
        static BUILT: AtomicUsize = AtomicUsize::new(0);

        let mut registry = ActionRegistry::empty();
        registry.register("noop", "Action", |_| {
            BUILT.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(Noop))
        });

        let config = ActionConfig::new("vonzy.actions.noop", Map::new());
        let mut first = registry.resolve(&config).unwrap();
        let _second = registry.resolve(&config).unwrap();
        assert_eq!(BUILT.load(Ordering::SeqCst), 2);

        let out = first
            .execute(&CommandBody::Text("hi".to_string()), &Context::new())
            .unwrap();
        assert_eq!(out, vec!["hi"]);
    }
}
