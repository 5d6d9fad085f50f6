//! Wires the notify channel's read end into the event registry as the source that interprets
//! privileged-action requests from the sandbox (§4.H).

use anyhow::Result;

use crate::code::TaggedCode;
use crate::events::{EventRegistry, EventSource};
use crate::network::{self, NetworkConfig};
use crate::notify::{Message, NotifySide};

pub struct NotifyHandlerConfig {
    pub libexec_dir: String,
    pub network: Option<NetworkConfigOwned>,
    /// Invoked exactly once, the first time the sandbox sends `DETACH`. Used by the daemon
    /// bring-up (§4.F) to report `BOOTED` to the grandparent as soon as the sandbox signals
    /// readiness, well before the sandbox itself exits (S5).
    pub on_detach: Option<Box<dyn FnMut()>>,
}

/// An owned copy of [`NetworkConfig`], since the handler outlives any single borrow.
#[derive(Clone)]
pub struct NetworkConfigOwned {
    pub netns_type: String,
    pub confdir: String,
    pub conf: String,
    pub cnipath: String,
    pub ifname: String,
}

impl NetworkConfigOwned {
    fn borrowed<'a>(&'a self, pid: libc::pid_t, parent_pid: libc::pid_t) -> NetworkConfig<'a> {
        NetworkConfig {
            netns_type: &self.netns_type,
            pid,
            parent_pid,
            confdir: &self.confdir,
            conf: &self.conf,
            cnipath: &self.cnipath,
            ifname: &self.ifname,
        }
    }
}

/// Registers the notify handler as an event source named `"notify"`. Returns the registered fd so
/// the caller can drive it in non-registry-backed tests too.
pub fn register(
    registry: &mut EventRegistry,
    mut side: NotifySide,
    config: NotifyHandlerConfig,
    parent_pid: libc::pid_t,
) -> Result<()> {
    let fd = side
        .pollable_fd()
        .ok_or_else(|| anyhow::anyhow!("notify side has no pollable fd"))?;

    let mut config = config;
    let source = EventSource::new("notify").with_fd(fd).with_on_ready(move |sandbox_pid, reg| {
        let msg = match side.recv() {
            Ok(msg) => msg,
            Err(err) => return Err(anyhow::anyhow!("notify channel recv failed ({err})")),
        };
        match msg {
            Message::SetNetns => {
                let ok = match &config.network {
                    Some(net) => network::setup(&config.libexec_dir, &net.borrowed(sandbox_pid, parent_pid)).is_ok(),
                    None => false,
                };
                let _ = side.send(if ok { Message::Ok } else { Message::Error });
                if ok {
                    if let Some(net) = config.network.clone() {
                        let libexec_dir = config.libexec_dir.clone();
                        reg.register(EventSource::new("network-cleanup").with_on_exit(
                            move || network::cleanup(&libexec_dir, &net.borrowed(sandbox_pid, parent_pid)),
                        ))?;
                    }
                }
                Ok(TaggedCode::notified(Message::SetNetns.raw_value()))
            }
            Message::SetCgroup => {
                // Pure handshake: cgroup configuration is delegated elsewhere (Open Question,
                // resolved in DESIGN.md).
                let _ = side.send(Message::Ok);
                Ok(TaggedCode::notified(Message::SetCgroup.raw_value()))
            }
            Message::Detach => {
                if let Some(mut cb) = config.on_detach.take() {
                    cb();
                }
                Ok(TaggedCode::notified(Message::Detach.raw_value()))
            }
            other => Ok(TaggedCode::notified(other.raw_value())),
        }
    });

    registry.register(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotifyChannel;

    #[test]
    fn registering_twice_fails_on_duplicate_name() {
        let mut registry = EventRegistry::new().unwrap();
        let channel_a = NotifyChannel::new().unwrap();
        let config_a = NotifyHandlerConfig {
            libexec_dir: "/usr/libexec".into(),
            network: None,
            on_detach: None,
        };
        register(&mut registry, channel_a.parent_init(), config_a, 1).unwrap();

        let channel_b = NotifyChannel::new().unwrap();
        let config_b = NotifyHandlerConfig {
            libexec_dir: "/usr/libexec".into(),
            network: None,
            on_detach: None,
        };
        assert!(register(&mut registry, channel_b.parent_init(), config_b, 1).is_err());
    }
}
