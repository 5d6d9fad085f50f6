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

//! Deterministic teardown of scratch state: `CLEANUPDIR` removal (P6) and pidfile-style process
//! kills, run as an `on_exit` hook from the event loop rather than from a signal-handler thread.
//!
//! Adapted from the teacher's `Actions`/`Cleanup`. The teacher's `SignalHandler` ran these actions
//! on a background thread in reaction to `signal-hook`; that's incompatible with this crate's
//! single-threaded, fully-masked-signal event loop (§4.B/§5), where teardown instead happens
//! synchronously when [`EventRegistry::run`](crate::events::EventRegistry::run) returns. `Cleanup`
//! here is a plain value registered as one `on_exit` hook, not a process-wide singleton.

use anyhow::{anyhow, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{event, Level};

#[derive(Default)]
pub struct Cleanup {
    kill_pids: HashSet<libc::pid_t>,
    remove_dirs: HashSet<PathBuf>,
    remove_files: HashSet<PathBuf>,
}

impl Cleanup {
    pub fn new() -> Cleanup {
        Cleanup::default()
    }

    pub fn register_kill_pid(&mut self, pid: libc::pid_t) {
        self.kill_pids.insert(pid);
    }

    pub fn register_remove_dir<P: AsRef<Path>>(&mut self, dir: P) -> Result<()> {
        self.remove_dirs.insert(absolute_path(dir.as_ref())?);
        Ok(())
    }

    pub fn register_remove_file<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        self.remove_files.insert(absolute_path(file.as_ref())?);
        Ok(())
    }

    /// Runs every registered action. Failures are logged and do not stop the remaining actions
    /// (§7's "cleanup failure" kind is a warning, not fatal).
    pub fn run(&mut self) {
        for pid in self.kill_pids.drain() {
            unsafe {
                libc::kill(pid, libc::SIGTERM);
            }
        }
        for file in self.remove_files.drain() {
            if let Err(err) = fs::remove_file(&file) {
                event!(Level::WARN, "{}: removing file failed ({err})", file.display());
            }
        }
        for dir in self.remove_dirs.drain() {
            if let Err(err) = fs::remove_dir_all(&dir) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    event!(Level::WARN, "{}: removing directory failed ({err})", dir.display());
                }
            }
        }
    }
}

fn absolute_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(PathBuf::from(path))
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .map_err(|e| anyhow!("failed to resolve {}: {e}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanupdir_is_removed_after_run() {
        let dir = std::env::temp_dir().join(format!("sup-core-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("scratch"), b"x").unwrap();

        let mut cleanup = Cleanup::new();
        cleanup.register_remove_dir(&dir).unwrap();
        cleanup.run();

        assert!(!dir.exists());
    }

    #[test]
    fn missing_dir_does_not_panic() {
        let mut cleanup = Cleanup::new();
        cleanup
            .register_remove_dir("/nonexistent/sup-core-test-dir")
            .unwrap();
        cleanup.run();
    }
}
