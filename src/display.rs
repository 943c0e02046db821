use colored::Colorize;

use crate::registry::Registry;

/// Column labels of the tunnel table.
pub const HEADER: [&str; 7] = ["TYPE", "FORWARD", "SSHPID", "INPORT", "VIA", "TARGET", "OUTPORT"];

/// The tab-separated tunnel table, optionally with each tunnel's connections
/// listed beneath it.
pub fn tunnel_table(registry: &Registry, with_connections: bool) -> String {
    let mut lines = vec![HEADER.join("\t")];
    for tunnel in registry.tunnels() {
        let mut row = tunnel.to_string();
        if with_connections {
            for conn in &tunnel.connections {
                row.push_str(&format!("\n\t↳ {}", conn));
            }
        }
        lines.push(row);
    }
    lines.join("\n")
}

/// One `SSHPID<TAB>connection` line per connection of every tunnel.
pub fn connection_list(registry: &Registry) -> String {
    registry
        .tunnels()
        .iter()
        .flat_map(|t| t.connections.iter().map(move |c| format!("{}\t{}", t.ssh_pid, c)))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn print_tunnels(registry: &Registry, with_connections: bool) {
    println!("{}", tunnel_table(registry, with_connections));
}

pub fn print_connections(registry: &Registry, privileged: bool) {
    if !privileged {
        eprintln!(
            "{} {}",
            "⚠".yellow(),
            "not running as root: reverse tunnels and other users' connections are hidden".dimmed()
        );
    }
    let list = connection_list(registry);
    if !list.is_empty() {
        println!("{}", list);
    }
}
