use std::fmt;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt as tfmt, prelude::*};

/// Decides whether hosts, addresses, pids and command lines reach the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPolicy {
    sensitive: bool,
}

impl LogPolicy {
    pub fn new(sensitive: bool) -> Self {
        Self { sensitive }
    }

    pub fn sensitive(&self) -> bool {
        self.sensitive
    }

    /// Wrap a value so it formats as `<redacted>` unless sensitive logging is on.
    pub fn show<T: fmt::Display>(&self, value: T) -> Sensitive<T> {
        Sensitive {
            value,
            visible: self.sensitive,
        }
    }
}

pub struct Sensitive<T> {
    value: T,
    visible: bool,
}

impl<T: fmt::Display> fmt::Display for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.visible {
            self.value.fmt(f)
        } else {
            f.write_str("<redacted>")
        }
    }
}

/// Translate a user-facing level name into a filter directive.
fn level_directive(level: &str) -> Option<&'static str> {
    match level.to_ascii_lowercase().as_str() {
        "off" => Some("off"),
        "error" => Some("error"),
        "warning" | "warn" => Some("warn"),
        "info" => Some("info"),
        "debug" => Some("debug"),
        "trace" => Some("trace"),
        _ => None,
    }
}

/// Install the global subscriber.
///
/// Logs go to `log_file` when given, stderr otherwise. With `quiet` set and
/// no file, everything is discarded so nothing is written over a raw-mode
/// terminal.
pub fn init(level: &str, log_file: Option<&Path>, quiet: bool) -> Result<()> {
    let directive = level_directive(level)
        .with_context(|| format!("unknown log level '{}'", level))?;

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            tracing_subscriber::registry()
                .with(
                    tfmt::layer()
                        .with_writer(Mutex::new(file))
                        .with_ansi(false),
                )
                .with(EnvFilter::new(directive))
                .try_init()
                .context("failed to initialize logging")?;
        }
        None => {
            let filter = if quiet {
                EnvFilter::new("off")
            } else if directive == "error" {
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error"))
            } else {
                EnvFilter::new(directive)
            };
            tracing_subscriber::registry()
                .with(tfmt::layer().with_writer(std::io::stderr))
                .with(filter)
                .try_init()
                .context("failed to initialize logging")?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_by_default() {
        let policy = LogPolicy::default();
        assert!(!policy.sensitive());
        assert_eq!(policy.show("example.com").to_string(), "<redacted>");
        assert_eq!(policy.show(4242).to_string(), "<redacted>");
    }

    #[test]
    fn shows_when_sensitive() {
        let policy = LogPolicy::new(true);
        assert_eq!(policy.show("example.com").to_string(), "example.com");
        assert_eq!(policy.show(4242).to_string(), "4242");
    }

    #[test]
    fn level_names() {
        assert_eq!(level_directive("warning"), Some("warn"));
        assert_eq!(level_directive("DEBUG"), Some("debug"));
        assert_eq!(level_directive("error"), Some("error"));
        assert_eq!(level_directive("loud"), None);
    }
}
