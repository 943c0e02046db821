mod classify;
mod cli;
mod commands;
mod config;
mod display;
mod logging;
mod monitor;
mod process;
mod registry;
mod render;
mod tunnel;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use tracing::{debug, error, info};

use cli::{Cli, Mode};
use config::{Config, Source};
use logging::LogPolicy;
use process::{OsSignaller, SystemProcesses};
use registry::Registry;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let (mut cfg, source) = Config::load(cli.config_file.as_deref());
    cfg.apply_cli(&cli);

    if cli.no_color {
        colored::control::set_override(false);
    }

    let mode = cli.mode();
    let quiet = mode == Mode::Interactive && cfg.log_file.is_none();
    if quiet && !cfg.log_level.eq_ignore_ascii_case("error") {
        eprintln!(
            "{} {}",
            "⚠".yellow(),
            "the interactive monitor needs --log-file to keep logs; they are discarded".dimmed()
        );
    }
    logging::init(&cfg.log_level, cfg.log_file.as_deref(), quiet)?;

    info!(version = env!("CARGO_PKG_VERSION"), "tunnelmon starting");
    match source {
        Source::File(ref path) => debug!(path = %path.display(), "config loaded"),
        Source::Defaults => debug!("no config file, using defaults"),
        Source::Invalid { ref path, ref reason } => {
            error!(path = %path.display(), "ignoring config file: {}", reason)
        }
    }
    debug!(?mode, "output mode");

    let log = LogPolicy::new(cfg.log_sensitive);
    debug!(sensitive = log.sensitive(), "log policy");
    let privileged = process::is_privileged();
    let mut processes = SystemProcesses::new();
    let mut registry = Registry::new(log, privileged);

    match mode {
        Mode::Interactive => {
            let settings = monitor::Settings {
                ui_interval: cfg.ui_interval(),
                refresh_interval: cfg.refresh_interval(),
                show_connections: cfg.show_connections,
            };
            monitor::run(&mut registry, &mut processes, &OsSignaller, log, &settings)
        }
        _ => {
            registry.refresh(&mut processes)?;
            if registry.is_empty() {
                info!("no tunnels found");
            }
            match mode {
                Mode::Connections => display::print_connections(&registry, privileged),
                Mode::Tunnels => display::print_tunnels(&registry, false),
                _ => display::print_tunnels(&registry, privileged),
            }
            Ok(())
        }
    }
}
