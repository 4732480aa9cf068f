use crate::annotate::UrlCheck;
use crate::definitions::{DefinitionFormat, Extracted};
use crate::reconcile::{Analysis, ReconciliationReport};
use crate::rewrite::RemovalResult;
use crate::scan::{Occurrence, SkippedFile, Usages};
use colored::Colorize;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Machine-readable form of a check run.
#[derive(Serialize, Debug)]
pub struct CheckOutput<'a> {
    pub definitions_file: &'a Path,
    #[serde(flatten)]
    pub report: &'a ReconciliationReport,
    pub missing_locations: BTreeMap<&'a str, &'a [Occurrence]>,
    pub near_misses: usize,
    pub files_scanned: usize,
    pub skipped: &'a [SkippedFile],
}

impl<'a> CheckOutput<'a> {
    pub fn new(definitions_file: &'a Path, analysis: &'a Analysis) -> Self {
        let missing_locations = analysis
            .report
            .missing
            .iter()
            .filter_map(|k| {
                analysis
                    .usages
                    .occurrences
                    .get(k)
                    .map(|o| (k.as_str(), o.as_slice()))
            })
            .collect();

        CheckOutput {
            definitions_file,
            report: &analysis.report,
            missing_locations,
            near_misses: analysis.definitions.near_misses,
            files_scanned: analysis.usages.files_scanned,
            skipped: &analysis.usages.skipped,
        }
    }
}

fn rule() {
    println!("{}", "=".repeat(40));
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        format!("{}...", text.chars().take(max).collect::<String>())
    } else {
        text.to_string()
    }
}

pub fn print_header(title: &str) {
    println!("{}", title.green().bold());
    rule();
}

pub fn print_inputs<F: DefinitionFormat>(file: &Path, definitions: &Extracted, documents: usize) {
    println!(
        "Found {} {} definitions in {}",
        definitions.definitions.len().to_string().cyan(),
        F::NOUN,
        file.display().to_string().cyan()
    );
    if definitions.near_misses > 0 {
        println!(
            "{} {} line(s) look like definitions but could not be parsed",
            "warning:".yellow().bold(),
            definitions.near_misses
        );
    }
    println!("Checking {} document(s)...", documents.to_string().cyan());
}

pub fn print_skipped(usages: &Usages) {
    if usages.skipped.is_empty() {
        return;
    }
    println!(
        "{} skipped {} unreadable document(s)",
        "warning:".yellow().bold(),
        usages.skipped.len()
    );
    for skipped in &usages.skipped {
        println!("  {} {} ({})", "-".dimmed(), skipped.path.display(), skipped.reason.dimmed());
    }
}

/// List definitions by key with their description.
pub fn print_definitions<F: DefinitionFormat>(keys: &BTreeSet<String>, definitions: &Extracted) {
    for key in keys {
        if let Some(def) = definitions.get(key) {
            println!("  '{}' {}", key.cyan(), F::describe(def));
        }
    }
}

pub fn print_check<F: DefinitionFormat>(analysis: &Analysis, definitions_file: &Path) {
    let report = &analysis.report;

    println!();
    print_header("Results");

    if report.missing.is_empty() {
        println!("{}", format!("All used {} keys are defined.", F::NOUN).green());
    } else {
        println!(
            "\n{} ({})",
            "Missing definitions".red().bold(),
            report.missing.len()
        );
        for key in &report.missing {
            println!("\n'{}' is used but not defined:", key.red());
            for occ in analysis.usages.occurrences.get(key).into_iter().flatten() {
                println!("  {} {}:{}", ">".dimmed(), occ.file.display(), occ.line);
            }
        }
    }

    if report.unused.is_empty() {
        println!("{}", format!("All defined {} keys are used.", F::NOUN).green());
    } else {
        println!("\n{} ({})", "Unused definitions".yellow().bold(), report.unused.len());
        print_definitions::<F>(&report.unused, &analysis.definitions);
    }

    print_summary(report);

    if !report.missing.is_empty() {
        println!();
        println!("Add the missing definitions to {}:", definitions_file.display().to_string().cyan());
        for key in &report.missing {
            println!("  {}", F::stub(key));
        }
    }
}

pub fn print_summary(report: &ReconciliationReport) {
    println!();
    println!("{}", "Summary".green().bold());
    println!("  Defined:   {}", report.defined.len().to_string().cyan());
    println!("  Used:      {}", report.used.len().to_string().cyan());
    println!("  Missing:   {}", report.missing.len().to_string().cyan());
    println!("  Unused:    {}", report.unused.len().to_string().cyan());
}

pub fn print_removal(file: &Path, result: &RemovalResult, dry_run: bool) {
    println!();
    if dry_run {
        println!(
            "{} {} definition(s) would be removed; {} left unchanged",
            "Dry run:".yellow().bold(),
            result.removed_count,
            file.display()
        );
        println!("Run without --dry-run to remove them.");
        return;
    }

    if let Some(backup) = &result.commit.backup {
        println!("{} {}", "Backup created:".green(), backup.display().to_string().cyan());
    }
    println!(
        "{} {} definition(s) from {}",
        "Removed".green().bold(),
        result.removed_count.to_string().cyan(),
        file.display()
    );
    for key in &result.removed {
        println!("  {} {}", "-".dimmed(), key);
    }
    println!(
        "  Original: {}  Removed: {}  Remaining: {}",
        result.removed_count + result.remaining_count,
        result.removed_count,
        result.remaining_count
    );
}

pub fn print_url_check(check: &UrlCheck) {
    println!("  Checking {}: {}", check.key.cyan(), truncate(&check.url, 60));
    if check.status.reachable {
        println!("    {} (status {})", "available".green(), check.status.status_code);
    } else {
        println!(
            "    {} ({})",
            "not available".red(),
            check.status.error.as_deref().unwrap_or("unknown error")
        );
    }
}

pub fn print_url_summary(checks: &[UrlCheck]) {
    let available = checks.iter().filter(|c| c.status.reachable).count();
    println!();
    println!("{}", "URL check summary".green().bold());
    println!("  Checked:       {}", checks.len().to_string().cyan());
    println!("  Available:     {}", available.to_string().cyan());
    println!("  Unavailable:   {}", (checks.len() - available).to_string().cyan());
}
