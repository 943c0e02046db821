use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use tracing::{debug, error, info};

use crate::logging::LogPolicy;
use crate::process::{Signaller, TunnelSignal};
use crate::registry::Registry;
use crate::tunnel::{Tunnel, TunnelKind};

/// Whether the monitor loop keeps running after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Selection and display toggles of the interactive monitor.
#[derive(Debug, Default)]
pub struct ViewState {
    /// Position of the highlighted tunnel; `None` highlights the header.
    selected: Option<usize>,
    /// Signal target of the highlighted tunnel.
    controlling_pid: Option<u32>,
    show_connections: bool,
}

impl ViewState {
    pub fn new(show_connections: bool) -> Self {
        Self {
            show_connections,
            ..Self::default()
        }
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    pub fn controlling_pid(&self) -> Option<u32> {
        self.controlling_pid
    }

    pub fn show_connections(&self) -> bool {
        self.show_connections
    }

    pub fn toggle_connections(&mut self) {
        self.show_connections = !self.show_connections;
    }

    /// Highlight `pos` and track its controlling pid.
    pub fn select(&mut self, pos: Option<usize>, registry: &Registry) {
        self.selected = pos;
        self.controlling_pid = pos
            .and_then(|i| registry.get(i))
            .map(Tunnel::controlling_pid);
    }

    /// Keep the selection inside a registry that may have shrunk.
    ///
    /// A pid cleared by a close stays cleared until the user moves again.
    pub fn clamp(&mut self, registry: &Registry) {
        let pos = match (self.selected, registry.len()) {
            (_, 0) | (None, _) => None,
            (Some(i), len) => Some(i.min(len - 1)),
        };
        let armed = self.controlling_pid.is_some();
        self.select(pos, registry);
        if !armed {
            self.controlling_pid = None;
        }
    }

    /// The tunnel keyed by the tracked controlling pid.
    fn target<'a>(&self, registry: &'a Registry) -> Option<&'a Tunnel> {
        let pid = self.controlling_pid?;
        registry.tunnels().iter().find(|t| t.controlling_pid() == pid)
    }
}

/// What a command handler may touch besides the view state.
pub struct Context<'a> {
    pub registry: &'a Registry,
    pub signals: &'a dyn Signaller,
    pub log: LogPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// A letter, matched case-insensitively.
    Char(char),
    Key(KeyCode),
}

pub struct Command {
    pub binding: Binding,
    pub help: &'static str,
    pub run: fn(&mut ViewState, &Context) -> Flow,
}

pub const COMMANDS: &[Command] = &[
    Command {
        binding: Binding::Char('q'),
        help: "Quit",
        run: quit,
    },
    Command {
        binding: Binding::Char('r'),
        help: "Reload autossh tunnel",
        run: reload,
    },
    Command {
        binding: Binding::Char('c'),
        help: "Close tunnel",
        run: close,
    },
    Command {
        binding: Binding::Char('n'),
        help: "Show connections",
        run: toggle_connections,
    },
    Command {
        binding: Binding::Key(KeyCode::Down),
        help: "Move down",
        run: move_down,
    },
    Command {
        binding: Binding::Key(KeyCode::Up),
        help: "Move up",
        run: move_up,
    },
];

/// Help line listing the letter commands, e.g. `[Q] Quit, [R] ...`.
pub fn help_line() -> String {
    COMMANDS
        .iter()
        .filter_map(|cmd| match cmd.binding {
            Binding::Char(c) => Some(format!("[{}] {}", c.to_ascii_uppercase(), cmd.help)),
            Binding::Key(_) => None,
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Find the command bound to a key press. Control and Alt chords are not bound.
pub fn lookup(key: &KeyEvent) -> Option<&'static Command> {
    if key.kind != KeyEventKind::Press
        || key.modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::ALT)
    {
        return None;
    }
    COMMANDS.iter().find(|cmd| match (cmd.binding, key.code) {
        (Binding::Char(b), KeyCode::Char(c)) => b.eq_ignore_ascii_case(&c),
        (Binding::Key(b), code) => b == code,
        _ => false,
    })
}

/// Run the command bound to `key`; unbound keys change nothing.
pub fn dispatch(key: &KeyEvent, state: &mut ViewState, ctx: &Context) -> Flow {
    match lookup(key) {
        Some(cmd) => {
            debug!(command = cmd.help, "key pressed");
            (cmd.run)(state, ctx)
        }
        None => Flow::Continue,
    }
}

fn quit(_state: &mut ViewState, _ctx: &Context) -> Flow {
    Flow::Quit
}

fn send(ctx: &Context, pid: u32, signal: TunnelSignal) {
    match ctx.signals.send(pid, signal) {
        Ok(()) => debug!(pid = %ctx.log.show(pid), "sent {}", signal.name()),
        Err(e) => error!(pid = %ctx.log.show(pid), "failed to send {}: {}", signal.name(), e),
    }
}

/// autossh restarts its ssh child on SIGUSR1.
fn reload(state: &mut ViewState, ctx: &Context) -> Flow {
    if let Some(tunnel) = state.target(ctx.registry) {
        match tunnel.kind {
            TunnelKind::Auto { autossh_pid } => send(ctx, autossh_pid, TunnelSignal::Reload),
            TunnelKind::Raw => info!("cannot reload a raw ssh tunnel"),
        }
    }
    Flow::Continue
}

fn close(state: &mut ViewState, ctx: &Context) -> Flow {
    if let Some(tunnel) = state.target(ctx.registry) {
        // The supervisor goes first so it cannot respawn ssh.
        if let TunnelKind::Auto { autossh_pid } = tunnel.kind {
            send(ctx, autossh_pid, TunnelSignal::Kill);
        }
        send(ctx, tunnel.ssh_pid, TunnelSignal::Kill);
    }
    state.selected = state.selected.and_then(|i| i.checked_sub(1));
    state.controlling_pid = None;
    Flow::Continue
}

fn toggle_connections(state: &mut ViewState, _ctx: &Context) -> Flow {
    state.toggle_connections();
    Flow::Continue
}

fn move_down(state: &mut ViewState, ctx: &Context) -> Flow {
    let next = state.selected.map_or(0, |i| i + 1);
    if next < ctx.registry.len() {
        state.select(Some(next), ctx.registry);
    }
    Flow::Continue
}

fn move_up(state: &mut ViewState, ctx: &Context) -> Flow {
    if let Some(i) = state.selected {
        state.select(i.checked_sub(1), ctx.registry);
    }
    Flow::Continue
}
