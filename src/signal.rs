//! Signal source: a `signalfd`-backed event source that reaps the sandbox's `SIGCHLD` and turns
//! everything else into a loop-terminating event.
//!
//! Grounded in `lib/event/signal/signal.c` and `util/signal.{c,h}` for the signo dispatch, and the
//! teacher's `sys::xwaitpid` for the reaping idiom (generalized here to non-fatal `Result`s, since
//! the event loop classifies failures itself rather than aborting the process).

use anyhow::{Context, Result};
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};

use crate::code::TaggedCode;
use crate::sys;

const WATCHED_SIGNALS: &[libc::c_int] = &[
    libc::SIGCHLD,
    libc::SIGCONT,
    libc::SIGTERM,
    libc::SIGINT,
    libc::SIGHUP,
    libc::SIGQUIT,
];

pub struct SignalSource {
    fd: OwnedFd,
    sandbox_pid: libc::pid_t,
    /// A transient child pid whose next SIGCHLD should be reaped silently (see §4.B's "ignored
    /// child" override for helper processes the monitor itself forks, like the network helper).
    ignored_child: Option<libc::pid_t>,
}

impl SignalSource {
    /// Masks [`WATCHED_SIGNALS`] process-wide and opens the signalfd. Must run before any other
    /// thread or fork that should not inherit an unmasked signal disposition.
    pub fn new(sandbox_pid: libc::pid_t) -> Result<SignalSource> {
        sys::block_signals(WATCHED_SIGNALS).context("failed to block signals")?;
        let fd = sys::signalfd(WATCHED_SIGNALS).context("signalfd failed")?;
        Ok(SignalSource {
            fd,
            sandbox_pid,
            ignored_child: None,
        })
    }

    pub fn pollable_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Registers `pid` so that its next reported death is absorbed without affecting the loop.
    pub fn ignore_next_death_of(&mut self, pid: libc::pid_t) {
        self.ignored_child = Some(pid);
    }

    /// Reads one `signalfd_siginfo` record and classifies it into a [`TaggedCode`].
    pub fn on_ready(&mut self) -> Result<TaggedCode> {
        let mut info: libc::signalfd_siginfo = unsafe { std::mem::zeroed() };
        let size = std::mem::size_of::<libc::signalfd_siginfo>();
        let n = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                &mut info as *mut _ as *mut libc::c_void,
                size,
            )
        };
        if n as usize != size {
            return Err(std::io::Error::last_os_error()).context("signalfd read failed");
        }

        match info.ssi_signo as libc::c_int {
            libc::SIGCHLD => self.reap_children(),
            libc::SIGCONT => Ok(TaggedCode::none()),
            _ => Ok(TaggedCode::exited(255)),
        }
    }

    fn reap_children(&mut self) -> Result<TaggedCode> {
        let mut result = TaggedCode::none();
        loop {
            match sys::waitpid(-1, libc::WNOHANG) {
                Ok((0, _)) => break,
                Ok((pid, status)) => {
                    if self.ignored_child == Some(pid) {
                        self.ignored_child = None;
                        continue;
                    }
                    if pid == self.sandbox_pid {
                        result = match status.code() {
                            Some(code) => TaggedCode::exited(code),
                            None => TaggedCode::signaled(255),
                        };
                    }
                }
                Err(e) if e.raw_os_error() == Some(libc::ECHILD) => break,
                Err(e) => return Err(e).context("waitpid failed"),
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigcont_is_ignored() {
        // Exercised indirectly via the tagged-code classification rather than an actual signalfd,
        // since constructing one requires the process-wide mask side effect this test shouldn't
        // perform at the unit level; see tests/ for the end-to-end version (B2).
        assert!(!TaggedCode::none().is_terminal());
    }
}
