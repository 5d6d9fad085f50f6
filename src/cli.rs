//! Command-line surface this crate itself owns. `COMMAND` is read from the registry (matching the
//! original's environment-variable-driven invocation, §6), not from a positional argument, so the
//! flags here only cover what the binary needs to boot: verbosity and registry seeding for
//! standalone use outside a real deployment.

use clap::Parser;

use crate::config::MapRegistry;

#[derive(Parser, Debug)]
#[clap(version, about)]
pub struct Options {
    /// Increase logging verbosity (-v, -vv, -vvv).
    #[clap(short, long, parse(from_occurrences))]
    pub verbose: u8,

    /// Seed the in-memory registry with KEY=VALUE, repeatable. Ignored if a real registry
    /// deployment is in effect.
    #[clap(long = "registry", value_name = "KEY=VALUE")]
    pub registry_entries: Vec<String>,

    /// Arguments passed through to the command handler.
    #[clap(last = true)]
    pub args: Vec<String>,
}

impl Options {
    pub fn map_registry(&self) -> MapRegistry {
        let mut registry = MapRegistry::new();
        for entry in &self.registry_entries {
            if let Some((key, value)) = entry.split_once('=') {
                registry.set(key, value);
            }
        }
        registry
    }

    pub fn tracing_level(&self) -> tracing::Level {
        match self.verbose {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Registry;
    use clap::Parser;

    #[test]
    fn registry_entries_parse_into_map() {
        let options = Options::parse_from(["sup-core", "--registry", "COMMAND=run"]);
        let registry = options.map_registry();
        assert_eq!(registry.get("COMMAND"), Some("run".to_string()));
    }

    #[test]
    fn verbosity_count_maps_to_levels() {
        let options = Options::parse_from(["sup-core", "-vv"]);
        assert_eq!(options.tracing_level(), tracing::Level::DEBUG);
    }
}
