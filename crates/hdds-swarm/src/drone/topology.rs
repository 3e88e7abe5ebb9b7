// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Drone-local record of connected masters.

use crate::registry::MasterRecord;
use std::collections::{HashMap, HashSet};

/// Outcome of one topology refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshStats {
    pub added: usize,
    pub failed: usize,
    pub removed: usize,
    pub unchanged: usize,
}

/// Registry path of each connected master, with the endpoints it advertised.
#[derive(Debug, Default)]
pub struct TopologyBook {
    entries: HashMap<String, MasterRecord>,
}

impl TopologyBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<&MasterRecord> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub(crate) fn insert(&mut self, path: &str, record: MasterRecord) {
        self.entries.insert(path.to_string(), record);
    }

    pub(crate) fn remove(&mut self, path: &str) -> Option<MasterRecord> {
        self.entries.remove(path)
    }

    /// Diff against the current `/masters` listing.
    ///
    /// Returns `(gone, new, unchanged)`, sorted for stable logging.
    pub(crate) fn plan(&self, current: &HashSet<String>) -> (Vec<String>, Vec<String>, usize) {
        let mut gone: Vec<String> = self
            .entries
            .keys()
            .filter(|path| !current.contains(*path))
            .cloned()
            .collect();
        let mut new: Vec<String> = current
            .iter()
            .filter(|path| !self.entries.contains_key(*path))
            .cloned()
            .collect();
        gone.sort();
        new.sort();
        let unchanged = self.entries.len() - gone.len();
        (gone, new, unchanged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tag: &str) -> MasterRecord {
        MasterRecord {
            public_in: format!("inproc://{}.in", tag),
            public_out: format!("inproc://{}.out", tag),
        }
    }

    #[test]
    fn test_plan() {
        let mut book = TopologyBook::new();
        book.insert("/masters/a", record("a"));
        book.insert("/masters/b", record("b"));

        let current: HashSet<String> = ["/masters/b", "/masters/c"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let (gone, new, unchanged) = book.plan(&current);
        assert_eq!(gone, vec!["/masters/a".to_string()]);
        assert_eq!(new, vec!["/masters/c".to_string()]);
        assert_eq!(unchanged, 1);
    }

    #[test]
    fn test_plan_steady_state() {
        let mut book = TopologyBook::new();
        book.insert("/masters/a", record("a"));
        let current: HashSet<String> = std::iter::once("/masters/a".to_string()).collect();
        let (gone, new, unchanged) = book.plan(&current);
        assert!(gone.is_empty());
        assert!(new.is_empty());
        assert_eq!(unchanged, 1);
    }

    #[test]
    fn test_insert_remove() {
        let mut book = TopologyBook::new();
        assert!(book.is_empty());
        book.insert("/masters/a", record("a"));
        assert!(book.contains("/masters/a"));
        assert_eq!(book.get("/masters/a").map(|r| r.public_in.as_str()), Some("inproc://a.in"));
        assert!(book.remove("/masters/a").is_some());
        assert!(book.remove("/masters/a").is_none());
    }
}
