//! Recovering block heights from node logs
//!
//! A stopped node cannot answer RPC, but its informant lines
//! (`Imported #N (0x…)`, `finalized #N (0x…)`) tell how far it got.

use crate::types::BlockRef;
use regex::Regex;
use std::sync::OnceLock;

fn finalized_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"finalized #(\d+)(?: \(([^)\s]+)\))?").expect("finalized pattern is valid")
    })
}

fn imported_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?:Imported|best:) #(\d+)(?: \(([^)\s]+)\))?").expect("imported pattern is valid")
    })
}

/// Highest finalized block mentioned in `log`
#[must_use]
pub fn highest_finalized(log: &str) -> Option<BlockRef> {
    highest_match(finalized_pattern(), log)
}

/// Highest imported block mentioned in `log`
#[must_use]
pub fn highest_imported(log: &str) -> Option<BlockRef> {
    highest_match(imported_pattern(), log)
}

fn highest_match(pattern: &Regex, log: &str) -> Option<BlockRef> {
    pattern
        .captures_iter(log)
        .filter_map(|caps| {
            let height = caps.get(1)?.as_str().parse::<u64>().ok()?;
            let hash = caps.get(2).map_or("", |m| m.as_str());
            Some(BlockRef::new(hash, height))
        })
        .max_by_key(|block| block.height)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = "\
2024-01-01 12:00:01 ✨ Imported #7 (0x1a2b…3c4d)
2024-01-01 12:00:02 💤 Idle (3 peers), best: #8 (0x5e6f…7a8b), finalized #5 (0x9c0d…1e2f), ⬇ 1.1kiB/s ⬆ 0.9kiB/s
2024-01-01 12:00:03 ✨ Imported #9 (0xaaaa…bbbb)
2024-01-01 12:00:04 💤 Idle (3 peers), best: #9 (0xaaaa…bbbb), finalized #7 (0x1a2b…3c4d), ⬇ 1.0kiB/s ⬆ 0.8kiB/s
";

    #[test]
    fn finds_highest_finalized_with_hash() {
        let block = highest_finalized(LOG).unwrap();
        assert_eq!(block.height, 7);
        assert_eq!(block.hash, "0x1a2b…3c4d");
    }

    #[test]
    fn finds_highest_imported() {
        assert_eq!(highest_imported(LOG).unwrap().height, 9);
    }

    #[test]
    fn empty_log_has_nothing() {
        assert!(highest_finalized("").is_none());
        assert!(highest_imported("starting node\n").is_none());
    }

    #[test]
    fn hash_is_optional() {
        let block = highest_finalized("finalized #12\n").unwrap();
        assert_eq!(block.height, 12);
        assert!(block.hash.is_empty());
    }
}
