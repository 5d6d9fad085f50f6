//! The event registry and the single-threaded cooperative loop that drives it.
//!
//! Grounded in `lib/event/event.{c,h}`: an insertion-ordered collection of named sources, each
//! with an optional fd and optional `on_ready`/`on_exit` callbacks, multiplexed by one blocking
//! readiness wait. Cross-checked against `other_examples/…cinit…process_manager` for the general
//! shape of an epoll-driven dispatch struct, reimplemented here over the teacher's raw-`libc`
//! `sys` module instead of `nix`.

use anyhow::{anyhow, Result};
use std::os::unix::io::RawFd;
use tracing::{event, Level};

use crate::code::TaggedCode;
use crate::sys::Epoll;

type OnReady = Box<dyn FnMut(libc::pid_t, &mut EventRegistry) -> Result<TaggedCode>>;

pub struct EventSource {
    pub name: String,
    fd: Option<RawFd>,
    on_ready: Option<OnReady>,
    on_exit: Option<Box<dyn FnMut() -> Result<()>>>,
}

impl EventSource {
    pub fn new(name: impl Into<String>) -> EventSource {
        EventSource {
            name: name.into(),
            fd: None,
            on_ready: None,
            on_exit: None,
        }
    }

    pub fn with_fd(mut self, fd: RawFd) -> EventSource {
        self.fd = Some(fd);
        self
    }

    pub fn with_on_ready(
        mut self,
        f: impl FnMut(libc::pid_t, &mut EventRegistry) -> Result<TaggedCode> + 'static,
    ) -> EventSource {
        self.on_ready = Some(Box::new(f));
        self
    }

    pub fn with_on_exit(mut self, f: impl FnMut() -> Result<()> + 'static) -> EventSource {
        self.on_exit = Some(Box::new(f));
        self
    }
}

/// Owns the registered sources and the epoll instance multiplexing their fds. Sources are kept in
/// insertion order so that exit-time teardown (P3) is deterministic.
pub struct EventRegistry {
    epoll: Epoll,
    sources: Vec<EventSource>,
    /// Maps an epoll token (the source's index at registration time) back to its slot.
    tokens: Vec<usize>,
}

impl EventRegistry {
    pub fn new() -> Result<EventRegistry> {
        Ok(EventRegistry {
            epoll: Epoll::new()?,
            sources: Vec::new(),
            tokens: Vec::new(),
        })
    }

    /// Appends `source` to the registry. If it carries an fd, that fd becomes eligible for the
    /// *next* readiness cycle, never the one currently being dispatched.
    pub fn register(&mut self, source: EventSource) -> Result<()> {
        if self.sources.iter().any(|s| s.name == source.name) {
            return Err(anyhow!("duplicate event source name {:?}", source.name));
        }
        let token = self.sources.len() as u64;
        if let Some(fd) = source.fd {
            self.epoll.add(fd, token)?;
        }
        self.sources.push(source);
        self.tokens.push(token as usize);
        Ok(())
    }

    /// Runs the loop until an `on_ready` callback returns a terminal [`TaggedCode`] (exited or
    /// signaled), then drains every `on_exit` hook in registration order and returns the terminal
    /// code.
    pub fn run(&mut self, sandbox_pid: libc::pid_t) -> Result<TaggedCode> {
        loop {
            let token = self.epoll.wait_one()? as usize;

            // Take the callback out before invoking it so it can take `&mut self` to register new
            // sources (e.g. `network-cleanup`, §4.H step 2) without a double mutable borrow of
            // `self.sources`.
            let mut on_ready = match self.sources.get_mut(token).and_then(|s| s.on_ready.take()) {
                Some(cb) => cb,
                None => continue,
            };

            match on_ready(sandbox_pid, self) {
                Ok(code) => {
                    if let Some(source) = self.sources.get_mut(token) {
                        source.on_ready = Some(on_ready);
                    }
                    if code.is_terminal() {
                        self.drain_exit_hooks();
                        return Ok(code);
                    }
                }
                Err(err) => {
                    event!(Level::WARN, "event source {:?} failed ({err})", self.sources[token].name);
                    if let Some(fd) = self.sources[token].fd.take() {
                        let _ = self.epoll.remove(fd);
                    }
                }
            }
        }
    }

    fn drain_exit_hooks(&mut self) {
        for source in &mut self.sources {
            if let Some(on_exit) = source.on_exit.as_mut() {
                if let Err(err) = on_exit() {
                    event!(Level::WARN, "exit hook {:?} failed ({err})", source.name);
                }
            }
        }
    }
}
