use std::collections::HashMap;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::classify::{self, ClassifyError};
use crate::logging::LogPolicy;
use crate::process::{ProcessInfo, ProcessSource};
use crate::tunnel::{ConnStatus, Connection, Tunnel, TunnelKind};

/// Tunnels found on the host, in discovery order, keyed by controlling pid.
pub struct Registry {
    tunnels: Vec<Tunnel>,
    log: LogPolicy,
    privileged: bool,
}

impl Registry {
    /// An empty registry. Reverse tunnels are only looked for when `privileged`.
    pub fn new(log: LogPolicy, privileged: bool) -> Self {
        Self {
            tunnels: Vec::new(),
            log,
            privileged,
        }
    }

    /// Rebuild the registry from a fresh process snapshot.
    ///
    /// The new set replaces the old one only once it is complete. On error the
    /// previous snapshot is kept.
    pub fn refresh(&mut self, source: &mut dyn ProcessSource) -> Result<()> {
        let procs = source.processes().context("failed to read process table")?;
        let names: HashMap<u32, &str> = procs.iter().map(|p| (p.pid, p.name.as_str())).collect();

        if !self.privileged {
            debug!("not running as root, skipping reverse tunnel detection");
        }

        let mut found = Vec::new();
        for proc in &procs {
            let tunnel = match proc.name.as_str() {
                "ssh" => self.scan_ssh(proc, &names, source),
                "sshd" if self.privileged => self.scan_sshd(proc, source),
                _ => None,
            };
            if let Some(tunnel) = tunnel {
                insert(&mut found, tunnel);
            }
        }

        self.tunnels = found;
        debug!(
            tunnels = self.tunnels.len(),
            connections = self.total_connections(),
            "registry refreshed"
        );
        Ok(())
    }

    fn scan_ssh(
        &self,
        proc: &ProcessInfo,
        names: &HashMap<u32, &str>,
        source: &mut dyn ProcessSource,
    ) -> Option<Tunnel> {
        debug!(pid = %self.log.show(proc.pid), cmdline = %self.log.show(proc.cmdline.join(" ")), "ssh process");

        let spec = match classify::classify(&proc.cmdline) {
            Ok(spec) => spec,
            Err(ClassifyError::NotATunnel) => return None,
            Err(e @ ClassifyError::AmbiguousForward(_)) => {
                debug!(pid = %self.log.show(proc.pid), "skipping ssh process: {}", e);
                return None;
            }
        };

        let kind = if names.get(&proc.ppid) == Some(&"autossh") {
            TunnelKind::Auto {
                autossh_pid: proc.ppid,
            }
        } else {
            TunnelKind::Raw
        };

        let connections = self.sockets_of(proc.pid, source)?;

        let tunnel = Tunnel {
            kind,
            ssh_pid: proc.pid,
            listen_port: spec.listen_port,
            via_host: spec.via_host,
            target_host: spec.target_host,
            target_port: spec.target_port,
            forward: spec.forward,
            connections,
        };
        debug!(tunnel = %self.log.show(&tunnel), "found tunnel");
        Some(tunnel)
    }

    /// An sshd session carrying an incoming tunnel holds both the established
    /// client connection and at least one listening socket.
    fn scan_sshd(&self, proc: &ProcessInfo, source: &mut dyn ProcessSource) -> Option<Tunnel> {
        let sockets = self.sockets_of(proc.pid, source)?;

        let mut tunnel = Tunnel::reverse_placeholder(proc.pid);
        let (established, others): (Vec<Connection>, Vec<Connection>) = sockets
            .into_iter()
            .partition(|c| c.status == ConnStatus::Established);
        if established.is_empty() || others.is_empty() {
            return None;
        }
        // Each established socket is pushed to the front.
        tunnel.connections = established.into_iter().rev().chain(others).collect();

        debug!(pid = %self.log.show(proc.pid), "found incoming tunnel");
        Some(tunnel)
    }

    /// `None` when the process vanished mid-scan.
    fn sockets_of(&self, pid: u32, source: &mut dyn ProcessSource) -> Option<Vec<Connection>> {
        match source.sockets(pid) {
            Ok(Some(conns)) => Some(conns),
            Ok(None) => {
                debug!(pid = %self.log.show(pid), "process exited during scan");
                None
            }
            Err(e) => {
                warn!(pid = %self.log.show(pid), "cannot read sockets: {:#}", e);
                Some(Vec::new())
            }
        }
    }

    /// The tunnel at `pos` in discovery order.
    pub fn get(&self, pos: usize) -> Option<&Tunnel> {
        self.tunnels.get(pos)
    }

    pub fn len(&self) -> usize {
        self.tunnels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tunnels.is_empty()
    }

    pub fn tunnels(&self) -> &[Tunnel] {
        &self.tunnels
    }

    pub fn total_connections(&self) -> usize {
        self.tunnels.iter().map(|t| t.connections.len()).sum()
    }
}

/// Add a tunnel, replacing in place any earlier one with the same key.
fn insert(tunnels: &mut Vec<Tunnel>, tunnel: Tunnel) {
    let key = tunnel.controlling_pid();
    match tunnels.iter_mut().find(|t| t.controlling_pid() == key) {
        Some(slot) => *slot = tunnel,
        None => tunnels.push(tunnel),
    }
}


#[cfg(test)]
mod tests {
    use super::fake::{FakeProcesses, conn};
    use super::*;
    use crate::tunnel::ForwardKind;

    fn refreshed(source: &mut FakeProcesses, privileged: bool) -> Registry {
        let mut reg = Registry::new(LogPolicy::default(), privileged);
        reg.refresh(source).unwrap();
        reg
    }

    #[test]
    fn autossh_child_registers_under_supervisor() {
        let mut source = FakeProcesses::default()
            .with(100, 1, "autossh", "autossh -M 0 -L 8080:localhost:80 example.com")
            .with(101, 100, "ssh", "/usr/bin/ssh -L 8080:localhost:80 example.com")
            .socket(
                101,
                conn("127.0.0.1", 8080, Some(("127.0.0.1", 50000)), ConnStatus::Established),
            );
        let reg = refreshed(&mut source, false);

        assert_eq!(reg.len(), 1);
        let t = reg.get(0).unwrap();
        assert_eq!(t.kind, TunnelKind::Auto { autossh_pid: 100 });
        assert_eq!(t.controlling_pid(), 100);
        assert_eq!(t.ssh_pid, 101);
        assert_eq!(t.forward, ForwardKind::Local);
        assert_eq!(t.listen_port, 8080);
        assert_eq!(t.via_host, "example.com");
        assert_eq!(t.connections.len(), 1);
        assert_eq!(reg.total_connections(), 1);
    }

    #[test]
    fn bare_ssh_is_raw() {
        let mut source = FakeProcesses::default()
            .with(50, 1, "bash", "-bash")
            .with(51, 50, "ssh", "ssh -N -R 9000:localhost:3000 gw");
        let reg = refreshed(&mut source, false);

        let t = reg.get(0).unwrap();
        assert_eq!(t.kind, TunnelKind::Raw);
        assert_eq!(t.controlling_pid(), 51);
        assert_eq!(t.forward, ForwardKind::Remote);
    }

    #[test]
    fn orphan_ssh_is_raw() {
        let mut source = FakeProcesses::default().with(51, 999, "ssh", "ssh -L 1:h:2 gw");
        let reg = refreshed(&mut source, false);
        assert_eq!(reg.get(0).unwrap().kind, TunnelKind::Raw);
    }

    #[test]
    fn non_tunnels_are_skipped() {
        let mut source = FakeProcesses::default()
            .with(10, 1, "ssh", "ssh user@host")
            .with(11, 1, "ssh", "ssh -L 1:a:2 -L 3:b:4 host")
            .with(12, 1, "sshfs", "sshfs -L 1:a:2 host")
            .with(13, 1, "ssh", "ssh -L 5:c:6 host");
        let reg = refreshed(&mut source, false);

        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(0).unwrap().ssh_pid, 13);
    }

    #[test]
    fn discovery_order_is_kept() {
        let mut source = FakeProcesses::default()
            .with(30, 1, "ssh", "ssh -L 3:c:3 host")
            .with(10, 1, "ssh", "ssh -L 1:a:1 host")
            .with(20, 1, "ssh", "ssh -L 2:b:2 host");
        let reg = refreshed(&mut source, false);

        let pids: Vec<u32> = reg.tunnels().iter().map(|t| t.ssh_pid).collect();
        assert_eq!(pids, vec![30, 10, 20]);
    }

    #[test]
    fn vanished_process_is_skipped() {
        let mut source = FakeProcesses::default()
            .with(10, 1, "ssh", "ssh -L 1:a:1 host")
            .with(11, 1, "ssh", "ssh -L 2:b:2 host");
        source.vanished.push(10);
        let reg = refreshed(&mut source, false);

        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(0).unwrap().ssh_pid, 11);
    }

    #[test]
    fn refresh_replaces_previous_snapshot() {
        let mut reg = Registry::new(LogPolicy::default(), false);
        let mut first = FakeProcesses::default().with(10, 1, "ssh", "ssh -L 1:a:1 host");
        reg.refresh(&mut first).unwrap();
        assert_eq!(reg.len(), 1);

        let mut second = FakeProcesses::default();
        reg.refresh(&mut second).unwrap();
        assert!(reg.is_empty());
        assert!(reg.get(0).is_none());
    }

    #[test]
    fn failed_refresh_keeps_previous_snapshot() {
        let mut source = FakeProcesses::default().with(10, 1, "ssh", "ssh -L 1:a:1 host");
        let mut reg = refreshed(&mut source, false);

        source.procs.clear();
        source.fail = true;
        assert!(reg.refresh(&mut source).is_err());
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(0).unwrap().ssh_pid, 10);
    }

    #[test]
    fn unreadable_sockets_leave_tunnel_without_connections() {
        let mut source = FakeProcesses::default()
            .with(10, 1, "ssh", "ssh -L 1:a:1 host")
            .socket(10, conn("127.0.0.1", 1, None, ConnStatus::Listen));
        source.unreadable.push(10);
        let reg = refreshed(&mut source, false);

        assert_eq!(reg.len(), 1);
        assert!(reg.get(0).unwrap().connections.is_empty());
        assert_eq!(reg.total_connections(), 0);
    }

    fn sshd_source(statuses: &[ConnStatus]) -> FakeProcesses {
        let mut source = FakeProcesses::default().with(200, 1, "sshd", "sshd: alice");
        for (i, status) in statuses.iter().enumerate() {
            source = source.socket(200, conn("0.0.0.0", 9000 + i as u16, None, *status));
        }
        source
    }

    #[test]
    fn sshd_with_listen_only_is_not_a_tunnel() {
        let mut source = sshd_source(&[ConnStatus::Listen]);
        assert!(refreshed(&mut source, true).is_empty());
    }

    #[test]
    fn sshd_with_established_only_is_not_a_tunnel() {
        let mut source = sshd_source(&[ConnStatus::Established, ConnStatus::Established]);
        assert!(refreshed(&mut source, true).is_empty());
    }

    #[test]
    fn sshd_reverse_tunnel_orders_established_first() {
        let mut source = sshd_source(&[
            ConnStatus::Listen,
            ConnStatus::Established,
            ConnStatus::Listen,
        ]);
        let reg = refreshed(&mut source, true);

        assert_eq!(reg.len(), 1);
        let t = reg.get(0).unwrap();
        assert_eq!(t.forward, ForwardKind::Reverse);
        assert_eq!(t.controlling_pid(), 200);
        let statuses: Vec<ConnStatus> = t.connections.iter().map(|c| c.status).collect();
        assert_eq!(
            statuses,
            vec![ConnStatus::Established, ConnStatus::Listen, ConnStatus::Listen]
        );
        assert_eq!(t.connections[1].local_port, 9000);
        assert_eq!(t.connections[2].local_port, 9002);
    }

    #[test]
    fn sshd_ignored_without_privilege() {
        let mut source = sshd_source(&[ConnStatus::Established, ConnStatus::Listen]);
        assert!(refreshed(&mut source, false).is_empty());
    }

    #[test]
    fn duplicate_key_replaces_in_place() {
        let mut source = FakeProcesses::default()
            .with(100, 1, "autossh", "autossh host")
            .with(101, 100, "ssh", "ssh -L 1:a:1 host")
            .with(300, 1, "ssh", "ssh -L 3:c:3 host")
            .with(102, 100, "ssh", "ssh -L 2:b:2 host");
        let reg = refreshed(&mut source, false);

        assert_eq!(reg.len(), 2);
        assert_eq!(reg.get(0).unwrap().ssh_pid, 102);
        assert_eq!(reg.get(1).unwrap().ssh_pid, 300);
    }
}
