use std::net::IpAddr;

use console::Alignment;
use ratatui::style::{Color, Style};
use ratatui::text::{Line, Span};

use crate::commands::ViewState;
use crate::display::HEADER;
use crate::registry::Registry;
use crate::tunnel::{Connection, ForwardKind, Tunnel, TunnelKind};

const HIGHLIGHT: Style = Style::new().fg(Color::White).bg(Color::Blue);

fn fg(color: Color) -> Style {
    Style::new().fg(color)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostClass {
    Loopback,
    Private,
    Public,
}

/// Classify a host name or address by network locality.
pub fn classify_host(host: &str) -> HostClass {
    let host = host.rsplit('@').next().unwrap_or(host);
    let host = host.trim_start_matches('[').trim_end_matches(']');

    if host.starts_with("localhost") {
        return HostClass::Loopback;
    }
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            let o = v4.octets();
            if v4.is_loopback() {
                HostClass::Loopback
            } else if v4.is_private() || (o[0] == 192 && o[1] == 0 && o[2] == 0 && o[3] < 8) {
                HostClass::Private
            } else {
                HostClass::Public
            }
        }
        Ok(IpAddr::V6(v6)) => {
            let s = v6.segments();
            if v6.is_loopback() {
                HostClass::Loopback
            } else if (s[0] & 0xfe00) == 0xfc00 || (s[0] == 0x64 && s[1] == 0xff9b && s[2] == 1) {
                // Unique local (fc00::/7) and local-use NAT64 (64:ff9b:1::/48).
                HostClass::Private
            } else {
                HostClass::Public
            }
        }
        Err(_) => HostClass::Public,
    }
}

pub fn is_privileged_port(port: u16) -> bool {
    port <= 1024
}

fn port_style(port: u16) -> Style {
    if is_privileged_port(port) {
        fg(Color::Red)
    } else {
        fg(Color::Yellow)
    }
}

fn host_style(host: &str) -> Style {
    match classify_host(host) {
        HostClass::Loopback => fg(Color::Blue),
        HostClass::Private => fg(Color::Cyan),
        HostClass::Public => fg(Color::Green),
    }
}

fn forward_style(forward: ForwardKind) -> Style {
    fg(match forward {
        ForwardKind::Local => Color::Blue,
        ForwardKind::Remote => Color::Cyan,
        ForwardKind::Dynamic => Color::Yellow,
        ForwardKind::Reverse => Color::Magenta,
        ForwardKind::Unknown => Color::White,
    })
}

fn kind_style(kind: TunnelKind) -> Style {
    match kind {
        TunnelKind::Auto { .. } => fg(Color::Cyan),
        TunnelKind::Raw => fg(Color::Blue),
    }
}

fn status_style(conn: &Connection) -> Style {
    if conn.status.is_healthy() {
        fg(Color::Cyan)
    } else {
        fg(Color::Red)
    }
}

/// Width of each table column: the widest of its header and every cell.
pub fn column_widths(tunnels: &[Tunnel]) -> [usize; 7] {
    let mut widths = HEADER.map(console::measure_text_width);
    for tunnel in tunnels {
        for (w, cell) in widths.iter_mut().zip(tunnel.cells()) {
            *w = (*w).max(console::measure_text_width(&cell));
        }
    }
    widths
}

/// Pad to a visible width, measuring wide characters correctly.
fn pad(s: &str, width: usize) -> String {
    console::pad_str(s, width, Alignment::Left, None).to_string()
}

/// Lay out the whole screen: help, totals, header, then one row per tunnel
/// with its connections beneath when detail is on.
pub fn render_lines(registry: &Registry, state: &ViewState, help: &str) -> Vec<Line<'static>> {
    let widths = column_widths(registry.tunnels());
    let mut lines = Vec::new();

    lines.push(Line::from(Span::styled(help.to_string(), fg(Color::Blue))));
    lines.push(Line::from(vec![
        Span::styled("Active tunnels: ", fg(Color::Cyan)),
        Span::styled(registry.len().to_string(), fg(Color::Red)),
        Span::styled(" / Active connections: ", fg(Color::Cyan)),
        Span::styled(registry.total_connections().to_string(), fg(Color::Red)),
    ]));

    let header_style = if state.selected().is_none() {
        HIGHLIGHT
    } else {
        Style::new()
    };
    let mut header: String = HEADER
        .iter()
        .zip(widths)
        .map(|(label, w)| pad(label, w))
        .collect::<Vec<_>>()
        .join(" ");
    header.push_str(" CONNECTIONS");
    lines.push(Line::from(Span::styled(header, header_style)));

    for (i, tunnel) in registry.tunnels().iter().enumerate() {
        lines.push(tunnel_line(tunnel, &widths, state.selected() == Some(i)));
        if state.show_connections() {
            lines.extend(connection_lines(tunnel));
        }
    }

    lines
}

fn tunnel_line(tunnel: &Tunnel, widths: &[usize; 7], selected: bool) -> Line<'static> {
    let styles = [
        kind_style(tunnel.kind),
        forward_style(tunnel.forward),
        fg(Color::White),
        port_style(tunnel.listen_port),
        host_style(&tunnel.via_host),
        host_style(&tunnel.target_host),
        port_style(tunnel.target_port),
    ];

    let mut spans: Vec<Span<'static>> = tunnel
        .cells()
        .iter()
        .zip(widths)
        .zip(styles)
        .map(|((cell, &w), style)| {
            let style = if selected { HIGHLIGHT } else { style };
            Span::styled(format!("{} ", pad(cell, w)), style)
        })
        .collect();

    if tunnel.connections.is_empty() {
        let style = if selected { HIGHLIGHT } else { fg(Color::Red) };
        spans.push(Span::styled("None", style));
    } else {
        for conn in &tunnel.connections {
            let style = if selected { HIGHLIGHT } else { status_style(conn) };
            spans.push(Span::styled("|", style));
        }
    }

    Line::from(spans)
}

/// Detail rows, grouped by status.
fn connection_lines(tunnel: &Tunnel) -> Vec<Line<'static>> {
    let mut conns: Vec<&Connection> = tunnel.connections.iter().collect();
    conns.sort_by_key(|c| c.status.as_str());

    conns
        .into_iter()
        .map(|conn| {
            let mut spans = vec![
                Span::raw("    + "),
                Span::styled(conn.status.to_string(), status_style(conn)),
                Span::raw("  "),
                Span::styled(conn.local_address.clone(), fg(Color::Blue)),
                Span::raw(":"),
                Span::styled(conn.local_port.to_string(), port_style(conn.local_port)),
            ];
            if let Some((ref addr, port)) = conn.remote {
                spans.push(Span::raw(" -> "));
                spans.push(Span::styled(addr.clone(), fg(Color::Green)));
                spans.push(Span::raw(":"));
                spans.push(Span::styled(port.to_string(), port_style(port)));
            }
            Line::from(spans)
        })
        .collect()
}
