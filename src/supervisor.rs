//! The monitor: forks the sandbox, wires up the notify channel, signal source and event registry,
//! and runs the loop to completion (§4.E).
//!
//! Grounded in the teacher's `fork_and_wait_for_startup`/`Daemonize::new` fork skeleton, retargeted
//! from "wait for one byte on a startup pipe" to the richer notify-message handshake, and in
//! `wrapper.c`'s exact step ordering for the FORK bring-up path.

use anyhow::{Context, Result};
use tracing::{event, Level};

use crate::cleanup::Cleanup;
use crate::dispatch::{CommandDescriptor, Handler};
use crate::events::EventRegistry;
use crate::notify::{Message, NotifyChannel, NotifySide};
use crate::notify_handler::{self, NotifyHandlerConfig};
use crate::ns::NsMask;
use crate::signal::SignalSource;
use crate::sys;

/// What the supervisor produced once the sandbox has terminated.
pub enum Outcome {
    /// The sandbox exited normally with this 8-bit status.
    Exited(i32),
    /// The sandbox died by a signal; the caller should propagate signal death rather than return
    /// a normal exit code (P5).
    Signaled,
}

pub struct SupervisorOptions {
    pub cleanup_dir: Option<std::path::PathBuf>,
    pub notify_handler: NotifyHandlerConfig,
}

/// Runs the FORK bring-up for `command` and blocks until the sandbox terminates.
///
/// `args` are passed through to the command handler unchanged; `ns_mask` is the namespace set
/// still to be entered (namespaces already entered by the caller, e.g. a USER namespace, should
/// already have been stripped).
pub fn run_fork(
    command: &CommandDescriptor,
    args: &[String],
    ns_mask: NsMask,
    options: SupervisorOptions,
) -> Result<Outcome> {
    let channel = NotifyChannel::new().context("failed to create notify channel")?;

    match unsafe { sys::fork() }.context("fork failed")? {
        None => {
            // Child (sandbox) side.
            let mut side = channel.child_init();
            match side.recv() {
                Ok(Message::Continue) => {}
                Ok(_) => {
                    event!(Level::ERROR, "sandbox received bad notification, expected CONTINUE");
                    std::process::exit(255);
                }
                Err(err) => {
                    event!(Level::ERROR, "sandbox notify recv failed ({err})");
                    std::process::exit(255);
                }
            }
            // The side stays open across the handler call so it can send `SET_NETNS`/`SET_CGROUP`/
            // `DETACH` (§4.E step 6, §4.H); only NOFORK commands ever see `None` here.
            let code = run_handler(command.handler, args, ns_mask, &mut side);
            side.close();
            std::process::exit(code);
        }
        Some(sandbox_pid) => {
            // Parent (monitor) side.
            let side = channel.parent_init();
            run_monitor(sandbox_pid, side, options)
        }
    }
}

/// Runs the monitor's half: registers signal and notify sources, sends the initial `CONTINUE`,
/// enters the event loop, and tears down on exit.
///
/// This is also reused by the daemon bring-up (§4.F) for its inner FORK step, which is why it
/// takes an already-created [`crate::notify::NotifySide`] rather than creating its own channel.
pub fn run_monitor(
    sandbox_pid: libc::pid_t,
    mut parent_side: crate::notify::NotifySide,
    options: SupervisorOptions,
) -> Result<Outcome> {
    let mut registry = EventRegistry::new().context("failed to create event registry")?;

    let mut signal_source =
        SignalSource::new(sandbox_pid).context("failed to create signal source")?;
    let signal_fd = signal_source.pollable_fd();
    registry.register(
        crate::events::EventSource::new("signal")
            .with_fd(signal_fd)
            .with_on_ready(move |_pid, _registry| signal_source.on_ready()),
    )?;

    let mut cleanup = Cleanup::new();
    if let Some(dir) = &options.cleanup_dir {
        cleanup.register_remove_dir(dir)?;
    }
    registry.register(crate::events::EventSource::new("cleanup").with_on_exit(move || {
        cleanup.run();
        Ok(())
    }))?;

    // Fix for the suspected bug in §9: the original sends CONTINUE and then calls exit(0), which
    // would make FORK mode unusable. We always proceed into the event loop after this send.
    parent_side
        .send(Message::Continue)
        .context("failed to send initial CONTINUE to sandbox")?;

    notify_handler::register(
        &mut registry,
        parent_side,
        options.notify_handler,
        std::process::id() as libc::pid_t,
    )?;

    let code = registry.run(sandbox_pid)?;

    if code.is_signaled() {
        Ok(Outcome::Signaled)
    } else {
        Ok(Outcome::Exited(code.payload()))
    }
}

fn run_handler(handler: Handler, args: &[String], ns_mask: NsMask, side: &mut NotifySide) -> i32 {
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        handler(args, ns_mask, Some(side))
    }));
    match result {
        Ok(code) => code,
        Err(_) => {
            event!(Level::ERROR, "command handler panicked");
            255
        }
    }
}

pub fn abort_with(message: &str) -> ! {
    event!(Level::ERROR, "{message}");
    std::process::exit(255);
}
