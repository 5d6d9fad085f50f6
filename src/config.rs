//! The external configuration/registry lookup interface.
//!
//! The real deployment's configuration and registry lookups are out of scope (§1); this crate
//! only needs a narrow read-only key/value interface to learn `COMMAND`, `WRITABLE`,
//! `PIDNS_ENABLED`, `IMAGE`, and `CLEANUPDIR`. `EnvRegistry` mirrors the original's `SINGULARITY_*`
//! environment-variable convention for real use; `MapRegistry` backs tests and the `--registry`
//! CLI flag.

use std::collections::HashMap;

pub trait Registry {
    fn get(&self, key: &str) -> Option<String>;

    fn get_bool(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

/// Reads `SINGULARITY_<KEY>` environment variables, matching the original's invocation
/// convention.
pub struct EnvRegistry;

impl Registry for EnvRegistry {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(format!("SINGULARITY_{key}")).ok()
    }
}

/// An in-memory registry for tests and the `--registry KEY=VALUE` CLI flag.
#[derive(Default, Clone, Debug)]
pub struct MapRegistry {
    values: HashMap<String, String>,
}

impl MapRegistry {
    pub fn new() -> MapRegistry {
        MapRegistry::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }
}

impl Registry for MapRegistry {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_registry_round_trips() {
        let mut registry = MapRegistry::new();
        registry.set("COMMAND", "run");
        assert_eq!(registry.get("COMMAND"), Some("run".to_string()));
        assert_eq!(registry.get("MISSING"), None);
    }

    #[test]
    fn get_bool_reflects_presence() {
        let mut registry = MapRegistry::new();
        assert!(!registry.get_bool("PIDNS_ENABLED"));
        registry.set("PIDNS_ENABLED", "1");
        assert!(registry.get_bool("PIDNS_ENABLED"));
    }
}
