use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

static IPV4_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}$").unwrap());

static IPV6_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9a-fA-F]{0,4}:){7}[0-9a-fA-F]{0,4}$").unwrap());

/// Edit counts keyed by editor identity.
///
/// Identities are compared exactly as the replica returns them after row
/// normalization. The underscore-to-space rewrite is a display concern and
/// must never happen before aggregation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EditorTally(FxHashMap<String, u64>);

impl EditorTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, editor: &str, count: u64) {
        *self.0.entry(editor.to_string()).or_insert(0) += count;
    }

    /// Per-editor sum. Commutative and associative, so batch and language
    /// tallies can fold in any order.
    pub fn merge(&mut self, other: &EditorTally) {
        for (editor, count) in &other.0 {
            *self.0.entry(editor.clone()).or_insert(0) += count;
        }
    }

    pub fn get(&self, editor: &str) -> u64 {
        self.0.get(editor).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn total_edits(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(editor, count)| (editor.as_str(), *count))
    }

    /// Editors by count descending, ties broken by name for stable output.
    pub fn ranked(&self) -> Vec<(&str, u64)> {
        let mut entries: Vec<(&str, u64)> = self.iter().collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        entries
    }
}

/// Sums per-editor counts across all language tallies into one global tally.
pub fn aggregate_global(all: &BTreeMap<String, EditorTally>) -> EditorTally {
    let mut global = EditorTally::new();
    for tally in all.values() {
        global.merge(tally);
    }
    global
}

/// Each editor's single best-represented language and the count there,
/// independent of their global total. Ties resolve to the first language in
/// code order.
pub fn best_languages(all: &BTreeMap<String, EditorTally>) -> FxHashMap<String, (String, u64)> {
    let mut best: FxHashMap<String, (String, u64)> = FxHashMap::default();
    for (lang, tally) in all {
        for (editor, count) in tally.iter() {
            match best.get(editor) {
                Some((_, current)) if *current >= count => {}
                _ => {
                    best.insert(editor.to_string(), (lang.clone(), count));
                }
            }
        }
    }
    best
}

/// IPv4/IPv6 literals are anonymous edits and never appear in a tally.
pub fn is_ip_address(text: &str) -> bool {
    IPV4_REGEX.is_match(text) || IPV6_REGEX.is_match(text)
}

/// Second line of defense over the server-side bot exclusion: anything with
/// "bot" in the name stays out of the tallies.
pub fn is_bot_name(name: &str) -> bool {
    name.to_lowercase().contains("bot")
}

/// Display form only. Aggregation always uses the raw identity.
pub fn display_name(editor: &str) -> String {
    editor.replace('_', " ")
}
