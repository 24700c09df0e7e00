//! Temporary names used by other mail programs.
//!
//! Exclusive creates of these names are part of someone else's own locking
//! scheme and are never emulated.

use regex::Regex;
use std::sync::LazyLock;

/// Prefixes: ours, qpopper, the liblockfile family, procmail.
const PEER_PREFIXES: [&str; 4] = [".nfs", ".locktmp", ".lk", "_"];

/// `.<name>.<hex>`, seen from spool-local delivery agents.
static SPOOL_TEMP_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\.[^.]*\.[0-9a-f]*$").expect("Invalid spool temp regex"));

/// Exim: `.<7 hex>.<9 hex>` at the end of the name.
static EXIM_TEMP_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.[0-9a-f]{7}\.[0-9a-f]{9}$").expect("Invalid Exim temp regex"));

/// Mutt: the last extension starts with a decimal pid.
static MUTT_TEMP_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.(\d+)[^.]*$").expect("Invalid Mutt temp regex"));

/// Whether `leaf` looks like another program's temporary lock name.
///
/// `pid` is the calling process; Mutt names carry it.
pub fn is_peer_temp_name(leaf: &str, pid: u32) -> bool {
    if PEER_PREFIXES.iter().any(|prefix| leaf.starts_with(prefix)) {
        return true;
    }

    if SPOOL_TEMP_REGEX.is_match(leaf) || EXIM_TEMP_REGEX.is_match(leaf) {
        return true;
    }

    MUTT_TEMP_REGEX
        .captures(leaf)
        .and_then(|caps| caps[1].parse::<u64>().ok())
        .is_some_and(|n| n == u64::from(pid))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PID: u32 = 4321;

    #[test]
    fn known_prefixes_are_peer_names() {
        for leaf in [".nfsmail01234a", ".locktmp.bob", ".lk01234ahost", "_12345.mail"] {
            assert!(is_peer_temp_name(leaf, PID), "{leaf}");
        }
    }

    #[test]
    fn spool_agent_names_are_peer_names() {
        assert!(is_peer_temp_name(".bob.3fa9", PID));
        assert!(is_peer_temp_name(".bob.", PID));
        assert!(!is_peer_temp_name(".bob.xyz", PID));
    }

    #[test]
    fn exim_names_are_peer_names() {
        assert!(is_peer_temp_name("bob.lock.0a1b2c3.456789abc", PID));
        assert!(!is_peer_temp_name("bob.lock.0a1b2c3.456789", PID));
    }

    #[test]
    fn mutt_names_match_only_our_pid() {
        assert!(is_peer_temp_name("inbox.4321", PID));
        assert!(is_peer_temp_name("inbox.4321host", PID));
        assert!(!is_peer_temp_name("inbox.4322", PID));
    }

    #[test]
    fn ordinary_names_are_not_peer_names() {
        for leaf in ["bob.lock", "bob", "mbox.lock", ".bob.lock"] {
            assert!(!is_peer_temp_name(leaf, PID), "{leaf}");
        }
    }
}
