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

//! Raw system call wrappers shared by the rest of the crate.
//!
//! Every wrapper here returns `std::io::Error` rather than panicking, since call sites live inside
//! `anyhow::Result` setup code that already has somewhere to send a failure.

use libc::c_int;
use std::io::{Error, ErrorKind};
use std::os::unix::prelude::*;
use std::process::ExitStatus;

pub fn pipe() -> Result<(OwnedFd, OwnedFd), Error> {
    let mut fds: [RawFd; 2] = [0; 2];
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } < 0 {
        return Err(Error::last_os_error());
    }
    Ok((unsafe { OwnedFd::from_raw_fd(fds[0]) }, unsafe {
        OwnedFd::from_raw_fd(fds[1])
    }))
}

pub unsafe fn fork() -> Result<Option<c_int>, Error> {
    let pid = libc::fork();
    if pid < 0 {
        Err(Error::last_os_error())
    } else if pid == 0 {
        Ok(None)
    } else {
        Ok(Some(pid))
    }
}

pub fn waitpid(pid: c_int, flags: c_int) -> Result<(c_int, ExitStatus), Error> {
    loop {
        let mut status = 0;
        let retval = unsafe { libc::waitpid(pid, &mut status as *mut c_int, flags) };
        if retval != -1 {
            return Ok((retval, ExitStatus::from_raw(status)));
        }
        let err = Error::last_os_error();
        if err.kind() != ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Blocks the given signals in the process-wide mask and returns an fd that reads `signalfd_siginfo`
/// records for them. The caller must have already blocked the signals via [`block_signals`], since
/// `signalfd` only delivers signals that are blocked from ordinary asynchronous delivery.
pub fn signalfd(signals: &[c_int]) -> Result<OwnedFd, Error> {
    let mut set: libc::sigset_t = unsafe { std::mem::zeroed() };
    unsafe {
        libc::sigemptyset(&mut set);
        for &sig in signals {
            libc::sigaddset(&mut set, sig);
        }
    }
    let fd = unsafe { libc::signalfd(-1, &set, libc::SFD_CLOEXEC) };
    if fd < 0 {
        return Err(Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Blocks the given signals from ordinary delivery so that they are only observable by reading the
/// fd returned by [`signalfd`].
pub fn block_signals(signals: &[c_int]) -> Result<(), Error> {
    let mut set: libc::sigset_t = unsafe { std::mem::zeroed() };
    unsafe {
        libc::sigemptyset(&mut set);
        for &sig in signals {
            libc::sigaddset(&mut set, sig);
        }
        if libc::sigprocmask(libc::SIG_BLOCK, &set, std::ptr::null_mut()) < 0 {
            return Err(Error::last_os_error());
        }
    }
    Ok(())
}

pub fn eventfd(initval: u32, nonblock: bool) -> Result<OwnedFd, Error> {
    let mut flags = libc::EFD_CLOEXEC;
    if nonblock {
        flags |= libc::EFD_NONBLOCK;
    }
    let fd = unsafe { libc::eventfd(initval, flags) };
    if fd < 0 {
        return Err(Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

pub fn eventfd_write(fd: RawFd, value: u64) -> Result<(), Error> {
    let retval = unsafe {
        libc::write(
            fd,
            &value as *const u64 as *const libc::c_void,
            std::mem::size_of::<u64>(),
        )
    };
    if retval != std::mem::size_of::<u64>() as isize {
        return Err(Error::last_os_error());
    }
    Ok(())
}

pub fn eventfd_read(fd: RawFd) -> Result<u64, Error> {
    let mut value: u64 = 0;
    let retval = unsafe {
        libc::read(
            fd,
            &mut value as *mut u64 as *mut libc::c_void,
            std::mem::size_of::<u64>(),
        )
    };
    if retval != std::mem::size_of::<u64>() as isize {
        return Err(Error::last_os_error());
    }
    Ok(value)
}

/// A thin wrapper around an epoll instance used as the single readiness-waiting primitive for the
/// event loop (see [`crate::events::EventRegistry`]).
pub struct Epoll {
    fd: OwnedFd,
}

impl Epoll {
    pub fn new() -> Result<Epoll, Error> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(Error::last_os_error());
        }
        Ok(Epoll {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    pub fn add(&self, fd: RawFd, token: u64) -> Result<(), Error> {
        let mut event = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: token,
        };
        if unsafe {
            libc::epoll_ctl(self.fd.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &mut event)
        } < 0
        {
            return Err(Error::last_os_error());
        }
        Ok(())
    }

    pub fn remove(&self, fd: RawFd) -> Result<(), Error> {
        if unsafe {
            libc::epoll_ctl(self.fd.as_raw_fd(), libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut())
        } < 0
        {
            return Err(Error::last_os_error());
        }
        Ok(())
    }

    /// Blocks until exactly one registered fd is ready, returning the token it was added with.
    pub fn wait_one(&self) -> Result<u64, Error> {
        let mut events: [libc::epoll_event; 1] = unsafe { std::mem::zeroed() };
        loop {
            let n = unsafe { libc::epoll_wait(self.fd.as_raw_fd(), events.as_mut_ptr(), 1, -1) };
            if n < 0 {
                let err = Error::last_os_error();
                if err.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            if n == 0 {
                continue;
            }
            return Ok(unsafe { events[0].u64 });
        }
    }
}

