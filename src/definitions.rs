//! Format-independent view of a definitions file.
//!
//! `acronyms` and `bibtex` each implement [`DefinitionFormat`]; everything
//! downstream (reconciliation, removal, console output) only sees this view.

use crate::scan::UsageScanner;
use serde::Serialize;
use std::collections::BTreeSet;

/// One definition as it appears in console listings.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct DefinitionSummary {
    pub key: String,
    /// Short form for acronyms, title for bibliography entries
    pub label: String,
    /// Long form for acronyms, author for bibliography entries
    pub detail: String,
}

/// Definitions found in a file, in file order.
#[derive(Debug, Clone, Default)]
pub struct Extracted {
    pub definitions: Vec<DefinitionSummary>,
    /// Lines that look like definitions but do not parse
    pub near_misses: usize,
}

impl Extracted {
    pub fn keys(&self) -> BTreeSet<String> {
        self.definitions.iter().map(|d| d.key.clone()).collect()
    }

    pub fn get(&self, key: &str) -> Option<&DefinitionSummary> {
        self.definitions.iter().find(|d| d.key == key)
    }
}

/// Result of dropping definitions from file content.
#[derive(Debug, Clone, PartialEq)]
pub struct Pruned {
    pub content: String,
    /// Keys that were actually removed, in file order
    pub removed: Vec<String>,
    /// Definitions present before pruning
    pub total: usize,
}

impl Pruned {
    pub fn remaining(&self) -> usize {
        self.total - self.removed.len()
    }
}

pub trait DefinitionFormat {
    /// Singular noun used in console output
    const NOUN: &'static str;

    fn extract(content: &str) -> Extracted;

    /// Remove every definition whose key is in `keys`, leaving all other text untouched.
    fn prune(content: &str, keys: &BTreeSet<String>) -> Pruned;

    /// Scanner for the reference commands that use this kind of definition.
    fn scanner() -> UsageScanner;

    /// One-line description for listings.
    fn describe(def: &DefinitionSummary) -> String;

    /// Skeleton definition suggested for a missing key.
    fn stub(key: &str) -> String;
}
