use std::fmt;

/// Direction and mechanism of a forward, as given by the ssh option letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardKind {
    Local,
    Remote,
    Dynamic,
    Reverse,
    Unknown,
}

impl ForwardKind {
    /// Map an option letter (`L`, `R`, `D`, or `V` for inferred sshd sessions).
    pub fn from_code(code: char) -> Self {
        match code {
            'L' => ForwardKind::Local,
            'R' => ForwardKind::Remote,
            'D' => ForwardKind::Dynamic,
            'V' => ForwardKind::Reverse,
            _ => ForwardKind::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ForwardKind::Local => "local",
            ForwardKind::Remote => "remote",
            ForwardKind::Dynamic => "dynamic",
            ForwardKind::Reverse => "reverse",
            ForwardKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ForwardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a tunnel is supervised by autossh or is a bare ssh process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelKind {
    Auto { autossh_pid: u32 },
    Raw,
}

/// One SSH port forward, identified by the process(es) that hold it open.
#[derive(Debug, Clone)]
pub struct Tunnel {
    pub kind: TunnelKind,
    pub ssh_pid: u32,
    pub listen_port: u16,
    pub via_host: String,
    pub target_host: String,
    pub target_port: u16,
    pub forward: ForwardKind,
    pub connections: Vec<Connection>,
}

/// Host value used when the real one cannot be determined.
pub const UNKNOWN_HOST: &str = "unknown";

impl Tunnel {
    /// Placeholder for an incoming tunnel inferred from an sshd session.
    pub fn reverse_placeholder(sshd_pid: u32) -> Self {
        Self {
            kind: TunnelKind::Raw,
            ssh_pid: sshd_pid,
            listen_port: 0,
            via_host: UNKNOWN_HOST.to_string(),
            target_host: UNKNOWN_HOST.to_string(),
            target_port: 0,
            forward: ForwardKind::Reverse,
            connections: Vec::new(),
        }
    }

    /// Pid that keys the tunnel in the registry and receives reload/close signals.
    pub fn controlling_pid(&self) -> u32 {
        match self.kind {
            TunnelKind::Auto { autossh_pid } => autossh_pid,
            TunnelKind::Raw => self.ssh_pid,
        }
    }

    pub fn type_label(&self) -> &'static str {
        match self.kind {
            TunnelKind::Auto { .. } => "auto",
            TunnelKind::Raw => "ssh",
        }
    }

    /// Cells of the tunnel table, in header order.
    pub fn cells(&self) -> [String; 7] {
        [
            self.type_label().to_string(),
            self.forward.to_string(),
            self.ssh_pid.to_string(),
            self.listen_port.to_string(),
            self.via_host.clone(),
            self.target_host.clone(),
            self.target_port.to_string(),
        ]
    }
}

impl fmt::Display for Tunnel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cells().join("\t"))
    }
}

/// Socket state, named after the kernel TCP states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnStatus {
    Established,
    SynSent,
    SynRecv,
    FinWait1,
    FinWait2,
    TimeWait,
    Close,
    CloseWait,
    LastAck,
    Listen,
    Closing,
    None,
}

impl ConnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnStatus::Established => "ESTABLISHED",
            ConnStatus::SynSent => "SYN_SENT",
            ConnStatus::SynRecv => "SYN_RECV",
            ConnStatus::FinWait1 => "FIN_WAIT1",
            ConnStatus::FinWait2 => "FIN_WAIT2",
            ConnStatus::TimeWait => "TIME_WAIT",
            ConnStatus::Close => "CLOSE",
            ConnStatus::CloseWait => "CLOSE_WAIT",
            ConnStatus::LastAck => "LAST_ACK",
            ConnStatus::Listen => "LISTEN",
            ConnStatus::Closing => "CLOSING",
            ConnStatus::None => "NONE",
        }
    }

    /// Established and listening sockets are the healthy states of a tunnel.
    pub fn is_healthy(&self) -> bool {
        matches!(self, ConnStatus::Established | ConnStatus::Listen)
    }
}

impl fmt::Display for ConnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Inet,
    Inet6,
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Family::Inet => "INET",
            Family::Inet6 => "INET6",
        })
    }
}

/// One socket held by a tunnel's controlling process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub local_address: String,
    pub local_port: u16,
    /// Remote address and port; always set together.
    pub remote: Option<(String, u16)>,
    pub status: ConnStatus,
    pub family: Family,
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}:{}",
            self.family, self.status, self.local_address, self.local_port
        )?;
        if let Some((ref addr, port)) = self.remote {
            write!(f, " → {}:{}", addr, port)?;
        }
        Ok(())
    }
}
