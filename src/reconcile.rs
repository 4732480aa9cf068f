use crate::definitions::{DefinitionFormat, Extracted};
use crate::error::{read_text, Result};
use crate::scan::{Occurrence, Usages};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Set comparison of defined and used keys.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub defined: BTreeSet<String>,
    pub used: BTreeSet<String>,
    /// Used but not defined
    pub missing: BTreeSet<String>,
    /// Defined but not used
    pub unused: BTreeSet<String>,
}

impl ReconciliationReport {
    pub fn is_consistent(&self) -> bool {
        self.missing.is_empty() && self.unused.is_empty()
    }
}

pub fn reconcile(
    defined: &BTreeSet<String>,
    used: &BTreeMap<String, Vec<Occurrence>>,
) -> ReconciliationReport {
    let used: BTreeSet<String> = used.keys().cloned().collect();

    ReconciliationReport {
        missing: used.difference(defined).cloned().collect(),
        unused: defined.difference(&used).cloned().collect(),
        defined: defined.clone(),
        used,
    }
}

/// Everything a check run produces.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub definitions: Extracted,
    pub usages: Usages,
    pub report: ReconciliationReport,
}

/// Extract definitions from `definitions_file`, scan `documents`, and reconcile.
pub fn analyze<F: DefinitionFormat>(definitions_file: &Path, documents: &[PathBuf]) -> Result<Analysis> {
    let content = read_text(definitions_file)?;
    let definitions = F::extract(&content);
    if definitions.near_misses > 0 {
        tracing::warn!(
            file = %definitions_file.display(),
            count = definitions.near_misses,
            "lines look like definitions but could not be parsed"
        );
    }

    let usages = F::scanner().scan_files(documents);
    let report = reconcile(&definitions.keys(), &usages.occurrences);

    Ok(Analysis {
        definitions,
        usages,
        report,
    })
}
