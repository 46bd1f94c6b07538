//! Daemon output normalisation and readiness detection.

use std::sync::OnceLock;

use regex::Regex;

use crate::models::daemon::DaemonKind;

/// Lowest port accepted as a daemon listening port.
const MIN_PORT: u16 = 1024;

fn port_hint() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)listening|port").ok()).as_ref()
}

fn ready_hint() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)listening|started|ready").ok())
        .as_ref()
}

/// A pattern that failed to compile matches nothing.
fn hints(re: Option<&Regex>, line: &str) -> bool {
    re.is_some_and(|re| re.is_match(line))
}

/// Remove ANSI CSI escape sequences (`ESC [ params letter`) from `s`.
///
/// A lone `ESC` followed by anything other than `[` is dropped together with
/// that next character.
#[must_use]
pub fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\x1b' {
            out.push(c);
            continue;
        }
        if chars.next() == Some('[') {
            for c in chars.by_ref() {
                if c.is_ascii_alphabetic() {
                    break;
                }
            }
        }
    }
    out
}

/// Extract a listening port from a line such as
/// `Rojo server listening on port 34872` or `… at localhost:34872`.
#[must_use]
pub fn parse_port(line: &str) -> Option<u16> {
    if !hints(port_hint(), line) {
        return None;
    }
    line.split_whitespace().rev().find_map(|word| {
        let word = word.trim_end_matches(|c: char| !c.is_ascii_digit());
        let digits = word.rsplit_once(':').map_or(word, |(_, tail)| tail);
        digits.parse::<u16>().ok().filter(|port| *port >= MIN_PORT)
    })
}

/// Decide whether `line` announces that the daemon is ready.
///
/// Returns `Some(port)` when it does (the port is optional), `None` when the
/// line carries no readiness signal. The file-sync daemon is ready once it
/// reports a port; the runtime-sync daemon once it prints a readiness word.
#[must_use]
pub fn detect_ready(kind: DaemonKind, line: &str) -> Option<Option<u16>> {
    match kind {
        DaemonKind::FileSync => parse_port(line).map(Some),
        DaemonKind::RuntimeSync => hints(ready_hint(), line).then(|| parse_port(line)),
    }
}
