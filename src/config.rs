use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::Cli;

const MIN_UI_INTERVAL_MS: u64 = 10;
const MIN_REFRESH_INTERVAL_MS: u64 = 100;

fn default_path() -> Result<PathBuf> {
    let dir = dirs::home_dir()
        .context("cannot determine home directory")?
        .join(".tunnelmon");
    Ok(dir.join("config.toml"))
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Interval between process table scans, in milliseconds
    pub refresh_interval_ms: u64,
    /// Interval between screen redraws, in milliseconds
    pub ui_interval_ms: u64,
    /// error, warning, info, debug or trace
    pub log_level: String,
    /// Append logs here instead of stderr
    pub log_file: Option<PathBuf>,
    /// Log hosts, addresses, pids and command lines
    pub log_sensitive: bool,
    /// Start the interactive monitor with connection details shown
    pub show_connections: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 1000,
            ui_interval_ms: 50,
            log_level: "error".to_string(),
            log_file: None,
            log_sensitive: false,
            show_connections: false,
        }
    }
}

/// Where the configuration came from, reported once logging is up.
#[derive(Debug)]
pub enum Source {
    File(PathBuf),
    Defaults,
    /// The file exists but could not be used; defaults apply.
    Invalid { path: PathBuf, reason: String },
}

impl Config {
    /// Load `explicit`, or ~/.tunnelmon/config.toml, falling back to defaults.
    pub fn load(explicit: Option<&Path>) -> (Self, Source) {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => match default_path() {
                Ok(p) if p.exists() => p,
                _ => return (Self::default(), Source::Defaults),
            },
        };
        match Self::read(&path) {
            Ok(cfg) => (cfg, Source::File(path)),
            Err(e) => (
                Self::default(),
                Source::Invalid {
                    path,
                    reason: format!("{:#}", e),
                },
            ),
        }
    }

    fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Command line flags take precedence over file values.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(ref level) = cli.log_level {
            self.log_level = level.clone();
        }
        if let Some(ref file) = cli.log_file {
            self.log_file = Some(file.clone());
        }
        if cli.log_sensitive {
            self.log_sensitive = true;
        }
        if let Some(ms) = cli.refresh_ms {
            self.refresh_interval_ms = ms;
        }
    }

    pub fn ui_interval(&self) -> Duration {
        Duration::from_millis(self.ui_interval_ms.max(MIN_UI_INTERVAL_MS))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms.max(MIN_REFRESH_INTERVAL_MS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn temp_config(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("tunnelmon-test-{}.toml", name));
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.refresh_interval(), Duration::from_millis(1000));
        assert_eq!(cfg.ui_interval(), Duration::from_millis(50));
        assert_eq!(cfg.log_level, "error");
        assert!(cfg.log_file.is_none());
        assert!(!cfg.log_sensitive);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let path = temp_config("partial", "refresh_interval_ms = 2500\nlog_sensitive = true\n");
        let (cfg, source) = Config::load(Some(&path));
        assert!(matches!(source, Source::File(ref p) if p == &path));
        assert_eq!(cfg.refresh_interval_ms, 2500);
        assert!(cfg.log_sensitive);
        assert_eq!(cfg.ui_interval_ms, 50);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn invalid_file_falls_back() {
        let path = temp_config("invalid", "refresh_interval_ms = \"soon\"\n");
        let (cfg, source) = Config::load(Some(&path));
        assert!(matches!(source, Source::Invalid { .. }));
        assert_eq!(cfg.refresh_interval_ms, 1000);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn missing_explicit_file_is_invalid() {
        let path = std::env::temp_dir().join("tunnelmon-test-does-not-exist.toml");
        let (_, source) = Config::load(Some(&path));
        assert!(matches!(source, Source::Invalid { .. }));
    }

    #[test]
    fn intervals_are_clamped() {
        let cfg = Config {
            refresh_interval_ms: 5,
            ui_interval_ms: 0,
            ..Config::default()
        };
        assert_eq!(cfg.refresh_interval(), Duration::from_millis(100));
        assert_eq!(cfg.ui_interval(), Duration::from_millis(10));
    }

    #[test]
    fn cli_overrides_file() {
        let mut cfg = Config {
            log_level: "info".to_string(),
            ..Config::default()
        };
        let cli = Cli::parse_from(["tunnelmon", "-l", "debug", "-s", "--refresh-ms", "300"]);
        cfg.apply_cli(&cli);
        assert_eq!(cfg.log_level, "debug");
        assert!(cfg.log_sensitive);
        assert_eq!(cfg.refresh_interval_ms, 300);

        let quiet = Cli::parse_from(["tunnelmon"]);
        cfg.apply_cli(&quiet);
        assert_eq!(cfg.log_level, "debug");
    }
}
