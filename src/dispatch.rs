//! The command dispatch table: name to `{handler, fork_mode, ns_mask, cap_init}`.
//!
//! Grounded in `command/command.h`'s three handler signatures (`action`, `mount`, `start`) and the
//! enumeration of subcommands implied throughout `wrapper.c`. Handler bodies are out of scope
//! (§1); this module only owns the table shape and the bring-up mode each command selects.

use crate::notify::NotifySide;
use crate::ns::NsMask;

/// `notify` is `Some` for FORK/DAEMON commands (the sandbox's notify side, open for the handler to
/// send `SET_NETNS`/`SET_CGROUP`/`DETACH` per §4.H) and `None` for NOFORK commands, which never
/// have a sandbox or a notify channel.
pub type Handler = fn(args: &[String], ns_mask: NsMask, notify: Option<&mut NotifySide>) -> i32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForkMode {
    /// Run the handler in-process; no sandbox, no supervisor.
    NoFork,
    /// Fork a sandbox and supervise it until exit (§4.E).
    Fork,
    /// Daemonize: grandparent/daemon/sandbox chain (§4.F).
    Daemon,
}

#[derive(Clone, Copy)]
pub struct CommandDescriptor {
    pub name: &'static str,
    pub handler: Handler,
    pub fork_mode: ForkMode,
    pub ns_mask: NsMask,
    /// Whether the command needs capabilities escalated before its namespace transitions.
    pub cap_init: bool,
}

fn unimplemented_handler(_args: &[String], _ns_mask: NsMask, _notify: Option<&mut NotifySide>) -> i32 {
    // Command-handler bodies are an external collaborator (§1); this stands in until one is
    // wired in by the surrounding deployment.
    0
}

const FULL_CONTAINER_NS: NsMask = NsMask::from_bits_truncate(
    NsMask::USER.bits()
        | NsMask::PID.bits()
        | NsMask::MNT.bits()
        | NsMask::IPC.bits()
        | NsMask::UTS.bits()
        | NsMask::NET.bits()
        | NsMask::CGROUP.bits(),
);

const COMMANDS: &[CommandDescriptor] = &[
    CommandDescriptor {
        name: "shell",
        handler: unimplemented_handler,
        fork_mode: ForkMode::Fork,
        ns_mask: FULL_CONTAINER_NS,
        cap_init: true,
    },
    CommandDescriptor {
        name: "exec",
        handler: unimplemented_handler,
        fork_mode: ForkMode::Fork,
        ns_mask: FULL_CONTAINER_NS,
        cap_init: true,
    },
    CommandDescriptor {
        name: "run",
        handler: unimplemented_handler,
        fork_mode: ForkMode::Fork,
        ns_mask: FULL_CONTAINER_NS,
        cap_init: true,
    },
    CommandDescriptor {
        name: "test",
        handler: unimplemented_handler,
        fork_mode: ForkMode::Fork,
        ns_mask: FULL_CONTAINER_NS,
        cap_init: true,
    },
    CommandDescriptor {
        name: "mount",
        handler: unimplemented_handler,
        fork_mode: ForkMode::NoFork,
        ns_mask: NsMask::MNT,
        cap_init: true,
    },
    CommandDescriptor {
        name: "help",
        handler: unimplemented_handler,
        fork_mode: ForkMode::NoFork,
        ns_mask: NsMask::empty(),
        cap_init: false,
    },
    CommandDescriptor {
        name: "apps",
        handler: unimplemented_handler,
        fork_mode: ForkMode::NoFork,
        ns_mask: NsMask::empty(),
        cap_init: false,
    },
    CommandDescriptor {
        name: "inspect",
        handler: unimplemented_handler,
        fork_mode: ForkMode::NoFork,
        ns_mask: NsMask::empty(),
        cap_init: false,
    },
    CommandDescriptor {
        name: "check",
        handler: unimplemented_handler,
        fork_mode: ForkMode::NoFork,
        ns_mask: NsMask::empty(),
        cap_init: false,
    },
    CommandDescriptor {
        name: "image.import",
        handler: unimplemented_handler,
        fork_mode: ForkMode::NoFork,
        ns_mask: NsMask::empty(),
        cap_init: true,
    },
    CommandDescriptor {
        name: "image.export",
        handler: unimplemented_handler,
        fork_mode: ForkMode::NoFork,
        ns_mask: NsMask::empty(),
        cap_init: true,
    },
    CommandDescriptor {
        name: "instance.start",
        handler: unimplemented_handler,
        fork_mode: ForkMode::Daemon,
        ns_mask: FULL_CONTAINER_NS,
        cap_init: true,
    },
];

pub fn lookup(name: &str) -> Option<&'static CommandDescriptor> {
    COMMANDS.iter().find(|cmd| cmd.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_command_resolves_to_itself() {
        for cmd in COMMANDS {
            assert_eq!(lookup(cmd.name).unwrap().name, cmd.name);
        }
    }

    #[test]
    fn unknown_command_is_none() {
        assert!(lookup("frobnicate").is_none());
    }

    #[test]
    fn instance_start_daemonizes() {
        assert_eq!(lookup("instance.start").unwrap().fork_mode, ForkMode::Daemon);
    }

    #[test]
    fn mount_does_not_fork() {
        assert_eq!(lookup("mount").unwrap().fork_mode, ForkMode::NoFork);
    }
}
