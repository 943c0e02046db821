use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "tunnelmon",
    about = "Monitor SSH and autossh port-forwarding tunnels",
    version
)]
pub struct Cli {
    /// Interactive monitor
    #[arg(short = 'c', long, conflicts_with_all = ["connections", "tunnels"])]
    pub curses: bool,

    /// List the connections of every tunnel
    #[arg(short = 'n', long, conflicts_with = "tunnels")]
    pub connections: bool,

    /// List tunnels only
    #[arg(short = 'u', long)]
    pub tunnels: bool,

    /// Log level: error, warning, info, debug or trace
    #[arg(short = 'l', long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Append logs to this file instead of stderr
    #[arg(short = 'g', long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Include hosts, addresses, pids and command lines in logs
    #[arg(short = 's', long)]
    pub log_sensitive: bool,

    /// Configuration file (defaults to ~/.tunnelmon/config.toml)
    #[arg(short = 'f', long, value_name = "FILE")]
    pub config_file: Option<PathBuf>,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Interval between process table scans in the interactive monitor
    #[arg(long, value_name = "MS")]
    pub refresh_ms: Option<u64>,
}

/// What the program prints, chosen by the mode flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Interactive,
    Connections,
    Tunnels,
    Default,
}

impl Cli {
    pub fn mode(&self) -> Mode {
        if self.curses {
            Mode::Interactive
        } else if self.connections {
            Mode::Connections
        } else if self.tunnels {
            Mode::Tunnels
        } else {
            Mode::Default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("tunnelmon").chain(args.iter().copied()))
    }

    #[test]
    fn default_mode() {
        let cli = parse(&[]).unwrap();
        assert_eq!(cli.mode(), Mode::Default);
        assert!(cli.log_level.is_none());
        assert!(!cli.log_sensitive);
    }

    #[test]
    fn mode_flags() {
        assert_eq!(parse(&["-c"]).unwrap().mode(), Mode::Interactive);
        assert_eq!(parse(&["--connections"]).unwrap().mode(), Mode::Connections);
        assert_eq!(parse(&["-u"]).unwrap().mode(), Mode::Tunnels);
    }

    #[test]
    fn mode_flags_conflict() {
        assert!(parse(&["-c", "-n"]).is_err());
        assert!(parse(&["-c", "-u"]).is_err());
        assert!(parse(&["-n", "-u"]).is_err());
    }

    #[test]
    fn logging_options() {
        let cli = parse(&["-l", "debug", "-g", "/tmp/tunnelmon.log", "-s", "-c"]).unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert_eq!(cli.log_file, Some(PathBuf::from("/tmp/tunnelmon.log")));
        assert!(cli.log_sensitive);
    }

    #[test]
    fn config_and_refresh() {
        let cli = parse(&["-f", "alt.toml", "--refresh-ms", "250", "--no-color"]).unwrap();
        assert_eq!(cli.config_file, Some(PathBuf::from("alt.toml")));
        assert_eq!(cli.refresh_ms, Some(250));
        assert!(cli.no_color);
    }
}
