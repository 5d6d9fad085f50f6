use clap::Parser;
use sup_core::cli::Options;
use sup_core::config::EnvRegistry;
use sup_core::{dispatch_command, Registry};

fn init_logging(level: tracing::Level) {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let options = Options::parse();
    init_logging(options.tracing_level());

    let libexec_dir =
        std::env::var("SINGULARITY_LIBEXECDIR").unwrap_or_else(|_| "/usr/libexec".to_string());

    // A --registry flag seeds a standalone in-memory registry for local testing; otherwise we
    // read from the environment the way a real deployment does (§6).
    let code = if options.registry_entries.is_empty() {
        dispatch_command(&EnvRegistry, &options.args, &libexec_dir)
    } else {
        let registry = options.map_registry();
        let registry: &dyn Registry = &registry;
        dispatch_command(registry, &options.args, &libexec_dir)
    };

    match code {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            tracing::event!(tracing::Level::ERROR, "{err:#}");
            std::process::exit(255);
        }
    }
}
