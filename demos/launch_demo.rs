//! A minimal consumer of the library, used by the integration tests the way the teacher's
//! `examples/test-daemon.rs` backs `tests/test.rs`: a small standalone program that exercises the
//! FORK bring-up end-to-end via a `--registry`-seeded command.

use sup_core::config::MapRegistry;
use sup_core::{dispatch_command, Registry};

fn main() {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let mut registry = MapRegistry::new();
    for arg in std::env::args().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            registry.set(key, value);
        }
    }
    if registry.get("COMMAND").is_none() {
        registry.set("COMMAND", "run");
    }

    let code = dispatch_command(&registry, &[], "/usr/libexec").unwrap_or(255);
    std::process::exit(code);
}
