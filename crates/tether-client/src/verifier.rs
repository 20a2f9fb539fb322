//! Per-path write-verifier table (the client's entire write buffer).
//!
//! Payload bytes never live on the client; the only epoch state is the set
//! of verifiers the server returned for each buffered WRITE. A healthy epoch
//! observes exactly one distinct verifier.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct VerifierTable {
    observed: Mutex<HashMap<String, HashSet<String>>>,
}

impl VerifierTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a verifier returned by a buffered WRITE for `path`.
    pub fn record(&self, path: &str, verifier: &str) {
        let mut observed = self.observed.lock().unwrap();
        observed
            .entry(path.to_string())
            .or_default()
            .insert(verifier.to_string());
    }

    /// Whether the current epoch buffered at least one write for `path`.
    pub fn has_pending(&self, path: &str) -> bool {
        self.observed.lock().unwrap().contains_key(path)
    }

    /// The verifiers observed for `path` this epoch, sorted for stable wire
    /// ordering. Empty when no buffered write occurred.
    pub fn snapshot(&self, path: &str) -> Vec<String> {
        let observed = self.observed.lock().unwrap();
        let mut verifiers: Vec<String> = observed
            .get(path)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        verifiers.sort();
        verifiers
    }

    /// Drop the epoch state for `path`. Called on release regardless of the
    /// COMMIT outcome: a failed epoch is reported once, never re-driven.
    pub fn forget(&self, path: &str) {
        self.observed.lock().unwrap().remove(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_path_has_no_pending_writes() {
        let table = VerifierTable::new();
        assert!(!table.has_pending("/f"));
        assert!(table.snapshot("/f").is_empty());
    }

    #[test]
    fn test_repeated_verifier_collapses_to_one() {
        let table = VerifierTable::new();
        table.record("/f", "100");
        table.record("/f", "100");
        table.record("/f", "100");
        assert_eq!(table.snapshot("/f"), vec!["100".to_string()]);
    }

    #[test]
    fn test_distinct_verifiers_are_both_kept() {
        let table = VerifierTable::new();
        table.record("/f", "200");
        table.record("/f", "100");
        assert_eq!(
            table.snapshot("/f"),
            vec!["100".to_string(), "200".to_string()]
        );
    }

    #[test]
    fn test_paths_are_independent() {
        let table = VerifierTable::new();
        table.record("/a", "100");
        assert!(table.has_pending("/a"));
        assert!(!table.has_pending("/b"));
    }

    #[test]
    fn test_forget_clears_the_epoch() {
        let table = VerifierTable::new();
        table.record("/f", "100");
        table.forget("/f");
        assert!(!table.has_pending("/f"));
        assert!(table.snapshot("/f").is_empty());
    }
}
