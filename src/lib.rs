/*
Copyright (c) 2022 VMware, Inc.
SPDX-License-Identifier: MIT
Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:
The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.
THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
 */

//! Fork/exec bring-up, event loop, and notify protocol for a privileged container launcher.
//!
//! A command is dispatched ([`dispatch`]) into one of three bring-up modes: run in-process, fork
//! a supervised sandbox ([`supervisor`]), or daemonize into a grandparent/daemon/sandbox chain
//! ([`daemon`]). The sandbox and its supervisor talk over an anonymous-pipe notify channel
//! ([`notify`]) multiplexed, along with a signal-backed descriptor ([`signal`]) and cleanup hooks
//! ([`cleanup`]), by a single-threaded event loop ([`events`]).

pub mod cleanup;
pub mod cli;
pub mod code;
pub mod config;
pub mod daemon;
pub mod dispatch;
pub mod events;
pub mod network;
pub mod notify;
pub mod notify_handler;
pub mod ns;
pub mod signal;
pub mod supervisor;
mod sys;

pub use code::TaggedCode;
pub use config::Registry;
pub use dispatch::{CommandDescriptor, ForkMode};
pub use ns::NsMask;
pub use supervisor::Outcome;

use anyhow::{anyhow, Result};

/// Resolves `COMMAND` from the registry and runs it via its configured bring-up mode. This is the
/// top-level entry point a `main` calls after parsing [`cli::Options`].
pub fn dispatch_command(
    registry: &dyn Registry,
    args: &[String],
    libexec_dir: &str,
) -> Result<i32> {
    let command_name = registry
        .get("COMMAND")
        .ok_or_else(|| anyhow!("COMMAND not set in registry"))?;
    let command = dispatch::lookup(&command_name)
        .ok_or_else(|| anyhow!("unknown command {command_name:?}"))?;

    let mut ns_mask = command.ns_mask;
    if !registry.get_bool("PIDNS_ENABLED") {
        ns_mask.remove(ns::NsMask::PID);
    }

    match command.fork_mode {
        ForkMode::NoFork => Ok((command.handler)(args, ns_mask, None)),
        ForkMode::Fork => {
            let options = default_supervisor_options(registry, libexec_dir);
            match supervisor::run_fork(command, args, ns_mask, options)? {
                Outcome::Exited(code) => Ok(code),
                Outcome::Signaled => {
                    unsafe { libc::kill(libc::getpid(), libc::SIGKILL) };
                    unreachable!("self-SIGKILL does not return");
                }
            }
        }
        ForkMode::Daemon => {
            let options = default_supervisor_options(registry, libexec_dir);
            let log_dir = std::env::temp_dir();
            daemon::run_daemon(command, args, ns_mask, &log_dir, options)
        }
    }
}

fn default_supervisor_options(
    registry: &dyn Registry,
    libexec_dir: &str,
) -> supervisor::SupervisorOptions {
    supervisor::SupervisorOptions {
        cleanup_dir: registry.get("CLEANUPDIR").map(std::path::PathBuf::from),
        notify_handler: notify_handler::NotifyHandlerConfig {
            libexec_dir: libexec_dir.to_string(),
            network: None,
            on_detach: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::MapRegistry;

    #[test]
    fn unknown_command_is_an_error() {
        let mut registry = MapRegistry::new();
        registry.set("COMMAND", "frobnicate");
        let result = dispatch_command(&registry, &[], "/usr/libexec");
        assert!(result.is_err());
    }

    #[test]
    fn missing_command_is_an_error() {
        let registry = MapRegistry::new();
        let result = dispatch_command(&registry, &[], "/usr/libexec");
        assert!(result.is_err());
    }

    #[test]
    fn nofork_command_runs_in_process() {
        let mut registry = MapRegistry::new();
        registry.set("COMMAND", "help");
        let result = dispatch_command(&registry, &[], "/usr/libexec").unwrap();
        assert_eq!(result, 0);
    }
}
