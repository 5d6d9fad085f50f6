//! DAEMON bring-up: the grandparent/daemon/sandbox chain (§4.F).
//!
//! Grounded in the teacher's `Daemonize` double-fork skeleton (detach, `setsid`, redirect standard
//! fds) generalized from "one daemon process" to "daemon process that itself runs the §4.E FORK
//! bring-up to produce a sandbox", and in `wrapper.c`'s exact eventfd/`BOOTED` handshake (lines
//! implementing the `CMD_DAEMON` branch), including the nonzero-exit-code carve-out that the
//! distilled spec summarized as just "writes BOOTED" (see SPEC_FULL.md §10).

use anyhow::{Context, Result};
use std::cell::Cell;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::rc::Rc;
use tracing::{event, Level};

use crate::dispatch::CommandDescriptor;
use crate::ns::NsMask;
use crate::supervisor::{self, Outcome, SupervisorOptions};
use crate::sys;

/// Grandparent-side epoll tokens multiplexing the success event-fd with the SIGCHLD signalfd, so
/// that a G1 death before `BOOTED` is reported is noticed instead of blocking forever (S6).
const EVENTFD_TOKEN: u64 = 0;
const SIGCHLD_TOKEN: u64 = 1;

/// The sentinel written to the grandparent's eventfd meaning "the sandbox booted successfully".
/// Chosen, per the original, to be larger than any legal 8-bit exit code so the two can't collide.
pub const BOOTED: u64 = 0xB007ED;

pub struct DaemonLogs {
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
}

impl DaemonLogs {
    fn create(dir: &std::path::Path) -> Result<DaemonLogs> {
        let stdout_path = dir.join(format!("sup-core-{}-stdout.log", std::process::id()));
        let stderr_path = dir.join(format!("sup-core-{}-stderr.log", std::process::id()));
        File::create(&stdout_path).context("failed to create daemon stdout log")?;
        File::create(&stderr_path).context("failed to create daemon stderr log")?;
        Ok(DaemonLogs {
            stdout_path,
            stderr_path,
        })
    }

    fn unlink(&self) {
        let _ = std::fs::remove_file(&self.stdout_path);
        let _ = std::fs::remove_file(&self.stderr_path);
    }
}

/// Runs the full DAEMON bring-up and returns the grandparent's exit code. Only the grandparent
/// (G0) returns from this function under normal operation; G1 and G2 exit the process directly.
pub fn run_daemon(
    command: &CommandDescriptor,
    args: &[String],
    ns_mask: NsMask,
    log_dir: &std::path::Path,
    options: SupervisorOptions,
) -> Result<i32> {
    let logs = DaemonLogs::create(log_dir)?;
    let efd = sys::eventfd(0, true).context("failed to create daemon eventfd")?;

    match unsafe { sys::fork() }.context("failed to fork daemon process")? {
        Some(daemon_pid) => run_grandparent(daemon_pid, efd.as_raw_fd(), &logs),
        None => {
            run_daemon_process(command, args, ns_mask, efd.as_raw_fd(), &logs, options);
            unreachable!("run_daemon_process always exits the process");
        }
    }
}

/// Waits for `BOOTED` on the event-fd while also watching for G1's death via `SIGCHLD`, so that a
/// G1 crash or abort before it ever writes the event-fd is observed (S6) instead of blocking
/// forever on a read that nothing will ever satisfy.
fn run_grandparent(daemon_pid: libc::pid_t, efd: i32, logs: &DaemonLogs) -> Result<i32> {
    sys::block_signals(&[libc::SIGCHLD]).context("failed to block SIGCHLD in grandparent")?;
    let sigfd = sys::signalfd(&[libc::SIGCHLD]).context("failed to open grandparent signalfd")?;

    let epoll = sys::Epoll::new().context("failed to create grandparent epoll")?;
    epoll.add(efd, EVENTFD_TOKEN)?;
    epoll.add(sigfd.as_raw_fd(), SIGCHLD_TOKEN)?;

    loop {
        let token = epoll.wait_one()?;
        if token == EVENTFD_TOKEN {
            match sys::eventfd_read(efd) {
                Ok(status) => {
                    let code = if status == 0 { 255 } else { status as i32 };
                    if code == BOOTED as i32 {
                        event!(Level::DEBUG, "daemon booted successfully");
                        logs.unlink();
                        return Ok(0);
                    }
                    event!(Level::ERROR, "failed to spawn daemon process");
                    print_captured_stderr(logs);
                    return Ok(code);
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(err).context("eventfd read failed in grandparent"),
            }
        } else {
            drain_one_siginfo(sigfd.as_raw_fd());
            match sys::waitpid(daemon_pid, libc::WNOHANG) {
                Ok((0, _)) => continue,
                Ok((_, status)) => {
                    let code = status.code().unwrap_or(255);
                    event!(Level::ERROR, "daemon process exited before signaling startup ({status})");
                    print_captured_stderr(logs);
                    return Ok(code);
                }
                Err(e) if e.raw_os_error() == Some(libc::ECHILD) => continue,
                Err(err) => return Err(err).context("waitpid on daemon failed"),
            }
        }
    }
}

fn drain_one_siginfo(fd: i32) {
    let mut info: libc::signalfd_siginfo = unsafe { std::mem::zeroed() };
    unsafe {
        libc::read(
            fd,
            &mut info as *mut _ as *mut libc::c_void,
            std::mem::size_of::<libc::signalfd_siginfo>(),
        );
    }
}

fn print_captured_stderr(logs: &DaemonLogs) {
    if let Ok(mut file) = File::open(&logs.stderr_path) {
        let mut contents = String::new();
        if file.read_to_string(&mut contents).is_ok() {
            print!("{contents}");
        }
    }
}

fn run_daemon_process(
    command: &CommandDescriptor,
    args: &[String],
    mut ns_mask: NsMask,
    efd: i32,
    logs: &DaemonLogs,
    mut options: SupervisorOptions,
) -> ! {
    // Detach from the controlling terminal.
    if std::env::set_current_dir("/").is_err() || unsafe { libc::setsid() } < 0 {
        supervisor::abort_with("daemon process failed to detach");
    }
    unsafe { libc::umask(0) };

    // The PID namespace, if any, has already been entered by the sandbox fork inside
    // supervisor::run_fork; here we only need to make sure it's no longer requested twice.
    ns_mask.remove(NsMask::PID);

    redirect_standard_fds(logs);
    close_other_fds(efd);

    // Report BOOTED to the grandparent as soon as the sandbox asks to detach (S5), not only once
    // it exits. `reported` tracks whether that already happened so the exit-path below doesn't
    // write to the eventfd a second time, mirroring the original's `efd = -1` after the first
    // write.
    let reported = Rc::new(Cell::new(false));
    let reported_in_closure = reported.clone();
    let stdout_path = logs.stdout_path.clone();
    let stderr_path = logs.stderr_path.clone();
    options.notify_handler.on_detach = Some(Box::new(move || {
        let _ = sys::eventfd_write(efd, BOOTED);
        let _ = std::fs::remove_file(&stdout_path);
        let _ = std::fs::remove_file(&stderr_path);
        reported_in_closure.set(true);
    }));

    let outcome = supervisor::run_fork(command, args, ns_mask, options);
    match outcome {
        Ok(Outcome::Exited(code)) => {
            if !reported.get() {
                if code != 0 {
                    let _ = sys::eventfd_write(efd, code as u64);
                } else {
                    let _ = sys::eventfd_write(efd, BOOTED);
                    logs.unlink();
                }
            }
            std::process::exit(code);
        }
        Ok(Outcome::Signaled) => {
            if !reported.get() {
                let _ = sys::eventfd_write(efd, 255);
            }
            logs.unlink();
            // Matches §4.E step 8: propagate signal death by killing ourselves.
            unsafe { libc::kill(libc::getpid(), libc::SIGKILL) };
            unreachable!();
        }
        Err(err) => {
            event!(Level::ERROR, "daemon bring-up failed ({err})");
            if !reported.get() {
                let _ = sys::eventfd_write(efd, 255);
            }
            std::process::exit(255);
        }
    }
}

fn redirect_standard_fds(logs: &DaemonLogs) {
    unsafe { libc::close(0) };
    if let Ok(stdout_fd) = File::options().append(true).open(&logs.stdout_path) {
        unsafe { libc::dup2(stdout_fd.as_raw_fd(), 1) };
    }
    if let Ok(stderr_fd) = File::options().append(true).open(&logs.stderr_path) {
        unsafe { libc::dup2(stderr_fd.as_raw_fd(), 2) };
    }
}

fn close_other_fds(keep: i32) {
    let max_fd = unsafe { libc::sysconf(libc::_SC_OPEN_MAX) };
    for fd in 3..max_fd as i32 {
        if fd != keep {
            unsafe { libc::close(fd) };
        }
    }
}
