//! Invocation contract for the external network setup helper.
//!
//! Grounded in `util/network.c`'s `singularity_network_setup`/`singularity_network_cleanup`: the
//! helper lives at `<libexec>/singularity/network`, is run through `/bin/bash --norc --noprofile`,
//! and receives its instructions entirely through a cleaned environment of `SINGULARITY_NETNS_*`
//! variables. This module implements only the caller side; the helper's behavior is external
//! (§1).
//!
//! Fixes the suspected bug in `singularity_network_cleanup` (§9): that function falls through
//! without an explicit success return on the happy path. Here, both [`setup`] and [`cleanup`]
//! return an explicit `Result` on every path.

use anyhow::{bail, Context, Result};
use std::process::Command;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetnsCommand {
    Add,
    Del,
}

impl NetnsCommand {
    fn as_str(self) -> &'static str {
        match self {
            NetnsCommand::Add => "ADD",
            NetnsCommand::Del => "DEL",
        }
    }
}

pub struct NetworkConfig<'a> {
    pub netns_type: &'a str,
    pub pid: libc::pid_t,
    pub parent_pid: libc::pid_t,
    pub confdir: &'a str,
    pub conf: &'a str,
    pub cnipath: &'a str,
    pub ifname: &'a str,
}

fn run_helper(libexec_dir: &str, command: NetnsCommand, config: &NetworkConfig) -> Result<()> {
    let script = format!("{libexec_dir}/singularity/network");
    let status = Command::new("/bin/bash")
        .arg("--norc")
        .arg("--noprofile")
        .arg(&script)
        .env_clear()
        .env("SINGULARITY_NETNS_TYPE", config.netns_type)
        .env("SINGULARITY_NETNS_COMMAND", command.as_str())
        .env("SINGULARITY_NETNS_PID", config.pid.to_string())
        .env("SINGULARITY_NETNS_PPID", config.parent_pid.to_string())
        .env("SINGULARITY_NETNS_CONFDIR", config.confdir)
        .env("SINGULARITY_NETNS_CONF", config.conf)
        .env("SINGULARITY_NETNS_CNIPATH", config.cnipath)
        .env("SINGULARITY_NETNS_IFNAME", config.ifname)
        .status()
        .with_context(|| format!("{script}: failed to spawn network helper"))?;

    if !status.success() {
        bail!("{script}: network helper exited with {status}");
    }
    Ok(())
}

pub fn setup(libexec_dir: &str, config: &NetworkConfig) -> Result<()> {
    run_helper(libexec_dir, NetnsCommand::Add, config)
}

pub fn cleanup(libexec_dir: &str, config: &NetworkConfig) -> Result<()> {
    run_helper(libexec_dir, NetnsCommand::Del, config)
}
