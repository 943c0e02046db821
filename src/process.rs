use std::io;

use anyhow::Result;

use crate::tunnel::Connection;

/// One entry of the process table.
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub pid: u32,
    pub ppid: u32,
    pub name: String,
    pub cmdline: Vec<String>,
}

/// Snapshot source for the process and socket tables.
pub trait ProcessSource {
    /// List every running process.
    fn processes(&mut self) -> Result<Vec<ProcessInfo>>;

    /// Internet sockets held by a process, in the order the OS reports them.
    ///
    /// Returns `Ok(None)` when the process has exited since it was listed.
    /// Sockets the caller may not inspect are left out.
    fn sockets(&mut self, pid: u32) -> Result<Option<Vec<Connection>>>;
}

/// Whether we run with root privileges.
pub fn is_privileged() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Signals the monitor sends to tunnel processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelSignal {
    /// SIGUSR1: autossh kills and restarts its ssh child.
    Reload,
    /// SIGKILL.
    Kill,
}

impl TunnelSignal {
    fn as_raw(self) -> libc::c_int {
        match self {
            TunnelSignal::Reload => libc::SIGUSR1,
            TunnelSignal::Kill => libc::SIGKILL,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TunnelSignal::Reload => "SIGUSR1",
            TunnelSignal::Kill => "SIGKILL",
        }
    }
}

/// Delivers signals to processes.
pub trait Signaller {
    fn send(&self, pid: u32, signal: TunnelSignal) -> io::Result<()>;
}

/// Sends real signals with `kill(2)`.
pub struct OsSignaller;

impl Signaller for OsSignaller {
    fn send(&self, pid: u32, signal: TunnelSignal) -> io::Result<()> {
        let pid = libc::pid_t::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        if pid <= 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "refusing to signal a process group"));
        }
        let ret = unsafe { libc::kill(pid, signal.as_raw()) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(target_os = "linux")]
pub use linux::ProcFs as SystemProcesses;

#[cfg(target_os = "linux")]
mod linux {
    use std::collections::HashMap;

    use anyhow::{Context, Result};
    use procfs::ProcError;
    use procfs::net::TcpState;
    use procfs::process::{FDTarget, Process};

    use super::{ProcessInfo, ProcessSource};
    use crate::tunnel::{ConnStatus, Connection, Family};

    /// Reads `/proc`. The socket tables are loaded lazily once per snapshot.
    #[derive(Default)]
    pub struct ProcFs {
        sockets: Option<HashMap<u64, Connection>>,
    }

    impl ProcFs {
        pub fn new() -> Self {
            Self::default()
        }

        fn socket_table(&mut self) -> &HashMap<u64, Connection> {
            self.sockets.get_or_insert_with(build_socket_map)
        }
    }

    impl ProcessSource for ProcFs {
        fn processes(&mut self) -> Result<Vec<ProcessInfo>> {
            // New snapshot: the socket tables must be re-read too.
            self.sockets = None;

            let mut list = Vec::new();
            for proc in procfs::process::all_processes().context("failed to list processes")? {
                let Ok(proc) = proc else { continue };
                let Ok(stat) = proc.stat() else { continue };
                let cmdline = proc.cmdline().unwrap_or_default();
                list.push(ProcessInfo {
                    pid: stat.pid as u32,
                    ppid: stat.ppid as u32,
                    name: stat.comm,
                    cmdline,
                });
            }
            Ok(list)
        }

        fn sockets(&mut self, pid: u32) -> Result<Option<Vec<Connection>>> {
            let proc = match Process::new(pid as i32) {
                Ok(p) => p,
                Err(ProcError::NotFound(_)) => return Ok(None),
                Err(e) => return Err(e).context("failed to open process"),
            };
            let fds = match proc.fd() {
                Ok(fds) => fds,
                Err(ProcError::NotFound(_)) => return Ok(None),
                // Not ours to inspect.
                Err(ProcError::PermissionDenied(_)) => return Ok(Some(Vec::new())),
                Err(e) => return Err(e).context("failed to read file descriptors"),
            };

            let table = self.socket_table();
            let mut conns = Vec::new();
            for fd in fds.flatten() {
                if let FDTarget::Socket(inode) = fd.target {
                    if let Some(conn) = table.get(&inode) {
                        conns.push(conn.clone());
                    }
                }
            }
            Ok(Some(conns))
        }
    }

    fn tcp_status(state: &TcpState) -> ConnStatus {
        match state {
            TcpState::Established => ConnStatus::Established,
            TcpState::SynSent => ConnStatus::SynSent,
            TcpState::SynRecv => ConnStatus::SynRecv,
            TcpState::FinWait1 => ConnStatus::FinWait1,
            TcpState::FinWait2 => ConnStatus::FinWait2,
            TcpState::TimeWait => ConnStatus::TimeWait,
            TcpState::Close => ConnStatus::Close,
            TcpState::CloseWait => ConnStatus::CloseWait,
            TcpState::LastAck => ConnStatus::LastAck,
            TcpState::Listen => ConnStatus::Listen,
            TcpState::Closing => ConnStatus::Closing,
            _ => ConnStatus::None,
        }
    }

    /// Map socket inode to connection for every TCP socket on the host.
    fn build_socket_map() -> HashMap<u64, Connection> {
        let mut map = HashMap::new();

        let tcp = procfs::net::tcp()
            .into_iter()
            .flatten()
            .map(|e| (e, Family::Inet));
        let tcp6 = procfs::net::tcp6()
            .into_iter()
            .flatten()
            .map(|e| (e, Family::Inet6));
        for (entry, family) in tcp.chain(tcp6) {
            let remote = entry.remote_address;
            let remote = if remote.port() == 0 && remote.ip().is_unspecified() {
                None
            } else {
                Some((remote.ip().to_string(), remote.port()))
            };
            map.insert(
                entry.inode,
                Connection {
                    local_address: entry.local_address.ip().to_string(),
                    local_port: entry.local_address.port(),
                    remote,
                    status: tcp_status(&entry.state),
                    family,
                },
            );
        }

        map
    }
}

#[cfg(not(target_os = "linux"))]
pub use unsupported::Unsupported as SystemProcesses;

#[cfg(not(target_os = "linux"))]
mod unsupported {
    use anyhow::Result;

    use super::{ProcessInfo, ProcessSource};
    use crate::tunnel::Connection;

    /// Stand-in for platforms without a `/proc` reader.
    #[derive(Default)]
    pub struct Unsupported;

    impl Unsupported {
        pub fn new() -> Self {
            Self
        }
    }

    impl ProcessSource for Unsupported {
        fn processes(&mut self) -> Result<Vec<ProcessInfo>> {
            anyhow::bail!("process inspection is only implemented for Linux")
        }

        fn sockets(&mut self, _pid: u32) -> Result<Option<Vec<Connection>>> {
            Ok(None)
        }
    }
}
