use std::io::stdout;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use crossterm::cursor;
use crossterm::event::{self, Event};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::widgets::Paragraph;
use tracing::{debug, error, info};

use crate::commands::{self, Context, Flow, ViewState};
use crate::display;
use crate::logging::LogPolicy;
use crate::process::{ProcessSource, Signaller};
use crate::registry::Registry;
use crate::render;

/// Timing and initial toggles of an interactive session.
#[derive(Debug, Clone)]
pub struct Settings {
    pub ui_interval: Duration,
    pub refresh_interval: Duration,
    pub show_connections: bool,
}

/// Raw mode and the alternate screen, restored on drop.
struct TerminalGuard;

impl TerminalGuard {
    fn enter() -> Result<Self> {
        enable_raw_mode().context("failed enabling raw mode")?;
        let mut out = stdout();
        if let Err(e) = execute!(out, EnterAlternateScreen, cursor::Hide) {
            let _ = disable_raw_mode();
            return Err(e).context("failed entering alternate screen");
        }
        Ok(Self)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let mut out = stdout();
        let _ = execute!(out, cursor::Show, LeaveAlternateScreen);
    }
}

/// Tracks the rendered registry between refreshes to log state changes.
#[derive(Default)]
struct ChangeTracker {
    fingerprint: String,
    idle_ticks: u64,
}

impl ChangeTracker {
    /// Returns true when `current` differs from the previous refresh.
    fn observe(&mut self, current: String, log: LogPolicy) -> bool {
        if current == self.fingerprint {
            self.idle_ticks += 1;
            return false;
        }
        info!(ticks = self.idle_ticks, "state changed");
        debug!(state = %log.show(&current), "new state");
        self.fingerprint = current;
        self.idle_ticks = 0;
        true
    }
}

/// Run the interactive monitor until the quit command.
///
/// The terminal is restored before any error is returned.
pub fn run(
    registry: &mut Registry,
    source: &mut dyn ProcessSource,
    signals: &dyn Signaller,
    log: LogPolicy,
    settings: &Settings,
) -> Result<()> {
    let _guard = TerminalGuard::enter()?;
    let mut terminal =
        Terminal::new(CrosstermBackend::new(stdout())).context("failed to open terminal")?;
    terminal.clear()?;

    let help = commands::help_line();
    let mut state = ViewState::new(settings.show_connections);
    let mut tracker = ChangeTracker::default();
    let mut last_refresh: Option<Instant> = None;

    info!(
        ui_ms = settings.ui_interval.as_millis() as u64,
        refresh_ms = settings.refresh_interval.as_millis() as u64,
        "interactive monitor started"
    );

    loop {
        thread::sleep(settings.ui_interval);

        if last_refresh.is_none_or(|t| t.elapsed() >= settings.refresh_interval) {
            if let Err(e) = registry.refresh(source) {
                error!("refresh failed, keeping previous snapshot: {:#}", e);
            }
            last_refresh = Some(Instant::now());
            tracker.observe(display::tunnel_table(registry, true), log);
            state.clamp(registry);
        }

        let mut flow = Flow::Continue;
        if event::poll(Duration::ZERO).context("failed to poll terminal events")? {
            if let Event::Key(key) = event::read().context("failed to read terminal event")? {
                let ctx = Context {
                    registry,
                    signals,
                    log,
                };
                flow = commands::dispatch(&key, &mut state, &ctx);
                if let Some(pid) = state.controlling_pid() {
                    debug!(selected = ?state.selected(), pid = %log.show(pid), "selection");
                }
            }
        }

        terminal
            .draw(|frame| {
                let lines = render::render_lines(registry, &state, &help);
                frame.render_widget(Paragraph::new(lines), frame.area());
            })
            .context("failed to draw")?;

        if flow == Flow::Quit {
            info!("interactive monitor stopped");
            return Ok(());
        }
    }
}
