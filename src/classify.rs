use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::tunnel::{ForwardKind, UNKNOWN_HOST};

/// Single-letter ssh flags that never take an argument.
const NO_ARG_FLAGS: &str = "46AaCfGgKkMNnqsTtVvXxYy";

/// `-L 8080:host:80`, `-NR2222:host:22`, `-D 1080`. The option letter may be
/// bundled with other flags and the ports may be glued to the option.
static FORWARD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\s)-\w*?([LRD])\w*?\s*(\d+)(?::(\S+):(\d+))?")
        .expect("forward pattern is valid")
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("no port forwarding found")]
    NotATunnel,
    #[error("{0} port forwardings found, expected exactly one")]
    AmbiguousForward(usize),
}

/// Forwarding parameters extracted from an ssh command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardSpec {
    pub listen_port: u16,
    pub via_host: String,
    pub target_host: String,
    pub target_port: u16,
    pub forward: ForwardKind,
}

/// Classify an ssh argument vector as a tunnel.
pub fn classify(argv: &[String]) -> Result<ForwardSpec, ClassifyError> {
    let cmdline = argv.join(" ");

    let mut found = Vec::new();
    for caps in FORWARD_RE.captures_iter(&cmdline) {
        let code = caps[1].chars().next().unwrap_or('?');
        let Ok(listen_port) = caps[2].parse::<u16>() else {
            continue;
        };
        let target = match (caps.get(3), caps.get(4)) {
            (Some(host), Some(port)) => match port.as_str().parse::<u16>() {
                Ok(port) => Some((host.as_str().to_string(), port)),
                Err(_) => continue,
            },
            _ => None,
        };
        // Only dynamic forwards may omit the target.
        if target.is_none() && code != 'D' {
            continue;
        }
        let (target_host, target_port) =
            target.unwrap_or_else(|| (UNKNOWN_HOST.to_string(), 0));
        found.push((code, listen_port, target_host, target_port));
    }

    let (code, listen_port, target_host, target_port) = match found.len() {
        0 => return Err(ClassifyError::NotATunnel),
        1 => found.remove(0),
        n => return Err(ClassifyError::AmbiguousForward(n)),
    };

    Ok(ForwardSpec {
        listen_port,
        via_host: find_via_host(argv),
        target_host,
        target_port,
        forward: ForwardKind::from_code(code),
    })
}

/// Find the ssh server a command line connects to: the first positional
/// argument after the program name.
///
/// Only the no-argument flags are known; any other two-character flag is
/// assumed to consume the next token unless that token is itself a flag.
pub fn find_via_host(argv: &[String]) -> String {
    let mut i = 1;
    while i < argv.len() {
        let arg = &argv[i];
        if arg.is_empty() {
            i += 1;
            continue;
        }
        if !arg.starts_with('-') {
            return arg.clone();
        }
        let takes_arg = arg
            .chars()
            .nth(1)
            .is_some_and(|flag| !NO_ARG_FLAGS.contains(flag));
        if takes_arg
            && arg.chars().count() == 2
            && argv.get(i + 1).is_some_and(|next| !next.starts_with('-'))
        {
            i += 1;
        }
        i += 1;
    }
    UNKNOWN_HOST.to_string()
}
