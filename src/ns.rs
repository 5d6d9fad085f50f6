//! Namespace mask: which Linux namespaces a command still needs entered.
//!
//! Grounded in `command/command.h`'s `namespaces` parameter and the `SR_NS_*` flags referenced
//! throughout `wrapper.c` (e.g. `SR_NS_PID`). Modeled with `bitflags` the way `tennsei7-vo`'s
//! `shadow-rs` models its own small kernel-flag bitsets.

use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct NsMask: u32 {
        const USER   = 1 << 0;
        const PID    = 1 << 1;
        const MNT    = 1 << 2;
        const IPC    = 1 << 3;
        const UTS    = 1 << 4;
        const NET    = 1 << 5;
        const CGROUP = 1 << 6;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stripping_pid_leaves_others_intact() {
        let mut mask = NsMask::USER | NsMask::PID | NsMask::NET;
        mask.remove(NsMask::PID);
        assert!(!mask.contains(NsMask::PID));
        assert!(mask.contains(NsMask::USER));
        assert!(mask.contains(NsMask::NET));
    }
}
