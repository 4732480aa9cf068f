mod acronyms;
mod annotate;
mod bibtex;
mod config;
mod definitions;
mod error;
mod reconcile;
mod report;
mod rewrite;
mod scan;

use acronyms::{sort_acronyms, Acronyms};
use annotate::{verify_file, HttpChecker, UrlChecker, Verification};
use bibtex::Bibliography;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use config::Config;
use definitions::DefinitionFormat;
use error::{read_text, Result};
use reconcile::analyze;
use report::CheckOutput;
use rewrite::{RemovalResult, WriteOptions};
use scan::{FileLister, WalkLister};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// texref - Keep LaTeX acronym and bibliography definitions in sync with their usages
#[derive(Parser)]
#[command(name = "texref")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true, default_value = ".texref.toml")]
    config: PathBuf,

    /// Quiet mode - suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log debug diagnostics to stderr (overridden by TEXREF_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sort, check and prune \acro definitions
    Acronyms {
        #[command(subcommand)]
        command: AcronymCommands,
    },

    /// Check, prune and verify BibTeX entries
    Bib {
        #[command(subcommand)]
        command: BibCommands,
    },
}

#[derive(Subcommand)]
enum AcronymCommands {
    /// Sort definitions alphabetically by short form
    Sort {
        /// File containing \acro definitions
        file: PathBuf,

        /// Write the sorted file here instead of rewriting the input
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        write: WriteArgs,
    },

    /// Report missing and unused acronym definitions
    Check {
        /// File containing \acro definitions
        file: PathBuf,

        #[command(flatten)]
        docs: DocumentArgs,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove acronym definitions that are never used
    Remove {
        /// File containing \acro definitions
        file: PathBuf,

        #[command(flatten)]
        docs: DocumentArgs,

        #[command(flatten)]
        write: WriteArgs,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum BibCommands {
    /// Report uncited entries and citations without an entry
    Check {
        /// BibTeX file
        file: PathBuf,

        #[command(flatten)]
        docs: DocumentArgs,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove entries that are never cited
    Remove {
        /// BibTeX file
        file: PathBuf,

        #[command(flatten)]
        docs: DocumentArgs,

        #[command(flatten)]
        write: WriteArgs,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check entry URLs and stamp reachable ones with an access date
    Verify {
        /// BibTeX file
        file: PathBuf,

        /// Only report reachability, do not touch note fields
        #[arg(long)]
        no_update_dates: bool,

        #[command(flatten)]
        write: WriteArgs,

        /// Per-URL timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove uncited entries, then verify URLs
    Clean {
        /// BibTeX file
        file: PathBuf,

        #[command(flatten)]
        docs: DocumentArgs,

        #[command(flatten)]
        clean: CleanArgs,
    },
}

#[derive(Args, Debug, Clone, Copy, Default)]
struct CleanArgs {
    /// Skip removing uncited entries
    #[arg(long)]
    no_remove_unused: bool,

    /// Skip URL verification
    #[arg(long)]
    no_verify_urls: bool,

    /// Do not create a backup before rewriting
    #[arg(long)]
    no_backup: bool,

    /// Per-URL timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
}

#[derive(Args, Debug, Clone)]
struct DocumentArgs {
    /// Specific LaTeX files to scan, in this order (skips directory search)
    #[arg(long, num_args = 1..)]
    files: Vec<PathBuf>,

    /// Directory to search for LaTeX files
    #[arg(short, long, default_value = ".")]
    directory: PathBuf,

    /// Do not search subdirectories
    #[arg(long)]
    no_recursive: bool,
}

#[derive(Args, Debug, Clone, Copy)]
struct WriteArgs {
    /// Show what would change without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Do not create a backup before rewriting
    #[arg(long)]
    no_backup: bool,
}

struct Context {
    config: Config,
    quiet: bool,
}

impl Context {
    fn write_options(&self, write: WriteArgs) -> WriteOptions {
        WriteOptions {
            backup: !write.no_backup,
            strict_backup: self.config.backup.strict,
            dry_run: write.dry_run,
        }
    }

    fn timeout(&self, flag: Option<u64>) -> Duration {
        Duration::from_secs(flag.unwrap_or(self.config.verify.timeout_secs))
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = Config::load(&cli.config).and_then(|config| {
        let ctx = Context {
            config,
            quiet: cli.quiet,
        };
        run(cli.command, &ctx)
    });

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            std::process::exit(2);
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("TEXREF_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Run a command. `Ok(false)` means a check found problems.
fn run(command: Commands, ctx: &Context) -> Result<bool> {
    match command {
        Commands::Acronyms { command } => match command {
            AcronymCommands::Sort {
                file,
                output,
                write,
            } => cmd_sort(&file, output.as_deref(), write, ctx).map(|_| true),
            AcronymCommands::Check { file, docs, json } => {
                cmd_check::<Acronyms>(&file, &docs, json, ctx)
            }
            AcronymCommands::Remove {
                file,
                docs,
                write,
                json,
            } => cmd_remove::<Acronyms>(&file, &docs, write, json, ctx).map(|_| true),
        },
        Commands::Bib { command } => match command {
            BibCommands::Check { file, docs, json } => {
                cmd_check::<Bibliography>(&file, &docs, json, ctx)
            }
            BibCommands::Remove {
                file,
                docs,
                write,
                json,
            } => cmd_remove::<Bibliography>(&file, &docs, write, json, ctx).map(|_| true),
            BibCommands::Verify {
                file,
                no_update_dates,
                write,
                timeout,
                json,
            } => {
                let checker = HttpChecker::new(&ctx.config.verify.user_agent)?;
                cmd_verify(&file, !no_update_dates, write, timeout, json, &checker, ctx).map(|_| true)
            }
            BibCommands::Clean { file, docs, clean } => {
                let checker = HttpChecker::new(&ctx.config.verify.user_agent)?;
                cmd_clean(&file, &docs, clean, &checker, ctx)
            }
        },
    }
}

/// Explicit `--files` in the given order, otherwise discovered documents.
fn collect_documents(docs: &DocumentArgs, config: &Config) -> Result<Vec<PathBuf>> {
    if !docs.files.is_empty() {
        if let Some(missing) = docs.files.iter().find(|f| !f.exists()) {
            return Err(error::Error::NotFound(missing.clone()));
        }
        return Ok(docs.files.clone());
    }

    let lister = WalkLister::new(&config.documents.extensions, &config.documents.exclude)?;
    let recursive = config.documents.recursive && !docs.no_recursive;
    let files = lister.list(&docs.directory, recursive)?;
    if files.is_empty() {
        tracing::warn!(directory = %docs.directory.display(), "no LaTeX files found");
    }
    Ok(files)
}

fn cmd_sort(file: &Path, output: Option<&Path>, write: WriteArgs, ctx: &Context) -> Result<()> {
    let content = read_text(file)?;
    let (sorted, order) = sort_acronyms(&content);

    if order.is_empty() {
        println!("{}", format!("No acronym definitions found in {}.", file.display()).yellow());
        return Ok(());
    }

    let target = output.unwrap_or(file);
    let written = if target == file {
        rewrite::commit(file, &content, &sorted, ctx.write_options(write))?.written
    } else if !write.dry_run {
        rewrite::write_atomic(target, &sorted)?;
        true
    } else {
        false
    };

    if ctx.quiet {
        return Ok(());
    }

    if write.dry_run {
        println!("{} sorted order of {} definitions:", "Dry run:".yellow().bold(), order.len());
    } else if written {
        println!(
            "{} {} definitions into {}",
            "Sorted".green().bold(),
            order.len().to_string().cyan(),
            target.display().to_string().cyan()
        );
    } else {
        println!("{}", "Definitions already sorted.".green());
    }
    for def in &order {
        println!("  {}: {}", def.short_form.cyan(), def.long_form);
    }

    Ok(())
}

fn cmd_check<F: DefinitionFormat>(
    file: &Path,
    docs: &DocumentArgs,
    json: bool,
    ctx: &Context,
) -> Result<bool> {
    let start = Instant::now();
    let documents = collect_documents(docs, &ctx.config)?;
    let analysis = analyze::<F>(file, &documents)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&CheckOutput::new(file, &analysis))?);
        return Ok(analysis.report.is_consistent());
    }

    if !ctx.quiet {
        report::print_header(&format!("LaTeX {} check", F::NOUN));
        report::print_inputs::<F>(file, &analysis.definitions, documents.len());
        report::print_skipped(&analysis.usages);
    }
    report::print_check::<F>(&analysis, file);
    tracing::debug!(elapsed = ?start.elapsed(), "check finished");

    Ok(analysis.report.is_consistent())
}

fn cmd_remove<F: DefinitionFormat>(
    file: &Path,
    docs: &DocumentArgs,
    write: WriteArgs,
    json: bool,
    ctx: &Context,
) -> Result<RemovalResult> {
    let documents = collect_documents(docs, &ctx.config)?;
    let analysis = analyze::<F>(file, &documents)?;
    let unused = &analysis.report.unused;

    let show = !json && !ctx.quiet;
    if show {
        report::print_header(&format!("LaTeX unused {} remover", F::NOUN));
        report::print_inputs::<F>(file, &analysis.definitions, documents.len());
        report::print_skipped(&analysis.usages);
        if unused.is_empty() {
            println!("\n{}", format!("No unused {} definitions found.", F::NOUN).green());
        } else {
            println!("\nFound {} unused definition(s):", unused.len().to_string().yellow());
            report::print_definitions::<F>(unused, &analysis.definitions);
        }
    }

    let result = rewrite::remove::<F>(file, unused, ctx.write_options(write))?;

    if json {
        let output = serde_json::json!({
            "report": &analysis.report,
            "dry_run": write.dry_run,
            "removal": &result,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if show {
        if !unused.is_empty() {
            report::print_removal(file, &result, write.dry_run);
        }
        report::print_summary(&analysis.report);
    }

    Ok(result)
}

fn cmd_verify(
    file: &Path,
    update_dates: bool,
    write: WriteArgs,
    timeout: Option<u64>,
    json: bool,
    checker: &dyn UrlChecker,
    ctx: &Context,
) -> Result<Verification> {
    let today = chrono::Local::now().date_naive();
    let show = !json && !ctx.quiet;

    if show {
        report::print_header("LaTeX bibliography URL verifier");
        println!("Checking URL availability...");
    }

    let verification = verify_file(
        file,
        checker,
        ctx.timeout(timeout),
        update_dates.then_some(today),
        ctx.write_options(write),
        |check| {
            if show {
                report::print_url_check(check);
            }
        },
    )?;

    if json {
        println!("{}", serde_json::to_string_pretty(&verification)?);
        return Ok(verification);
    }

    if show {
        if verification.checks.is_empty() {
            println!("{}", "No URLs found in bibliography entries.".yellow());
            return Ok(verification);
        }
        report::print_url_summary(&verification.checks);
        if let Some(backup) = &verification.commit.backup {
            println!("{} {}", "Backup created:".green(), backup.display().to_string().cyan());
        }
        if verification.updated > 0 {
            let verb = if write.dry_run { "Would update" } else { "Updated" };
            println!(
                "\n{} access dates for {} entries ({})",
                verb.green().bold(),
                verification.updated.to_string().cyan(),
                today.format("%Y-%m-%d")
            );
        }
    }

    Ok(verification)
}

fn cmd_clean(
    file: &Path,
    docs: &DocumentArgs,
    clean: CleanArgs,
    checker: &dyn UrlChecker,
    ctx: &Context,
) -> Result<bool> {
    let mut write = WriteArgs {
        dry_run: false,
        no_backup: clean.no_backup,
    };

    if !clean.no_remove_unused {
        if !ctx.quiet {
            println!("{}", "Step 1: removing uncited bibliography entries".bold());
        }
        let removal = cmd_remove::<Bibliography>(file, docs, write, false, ctx)?;
        // Keep the backup of the untouched original
        if removal.commit.backup.is_some() {
            write.no_backup = true;
        }
        if !ctx.quiet {
            println!();
        }
    }

    if !clean.no_verify_urls {
        if !ctx.quiet {
            println!("{}", "Step 2: verifying URLs".bold());
        }
        cmd_verify(file, true, write, clean.timeout, false, checker, ctx)?;
    }

    if !ctx.quiet {
        println!("\n{}", "Bibliography cleanup completed.".green().bold());
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use annotate::UrlStatus;
    use clap::CommandFactory;
    use std::fs;

    /// Every URL answers 200.
    struct Reachable;

    impl UrlChecker for Reachable {
        fn check(&self, _url: &str, _timeout: Duration) -> UrlStatus {
            UrlStatus::reachable(200)
        }
    }

    fn quiet() -> Context {
        Context {
            config: Config::default(),
            quiet: true,
        }
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_explicit_files_keep_order() {
        let dir = tempfile::tempdir().unwrap();
        let z = dir.path().join("z.tex");
        let a = dir.path().join("a.tex");
        std::fs::write(&z, "").unwrap();
        std::fs::write(&a, "").unwrap();

        let docs = DocumentArgs {
            files: vec![z.clone(), a.clone()],
            directory: PathBuf::from("/nonexistent"),
            no_recursive: false,
        };
        let files = collect_documents(&docs, &Config::default()).unwrap();
        assert_eq!(files, vec![z, a]);
    }

    #[test]
    fn test_explicit_missing_file_is_not_found() {
        let docs = DocumentArgs {
            files: vec![PathBuf::from("/nonexistent/main.tex")],
            directory: PathBuf::from("."),
            no_recursive: false,
        };
        let err = collect_documents(&docs, &Config::default()).unwrap_err();
        assert!(matches!(err, error::Error::NotFound(_)));
    }

    #[test]
    fn test_write_options_follow_config() {
        let mut config = Config::default();
        config.backup.strict = false;
        let ctx = Context { config, quiet: true };

        let opts = ctx.write_options(WriteArgs {
            dry_run: true,
            no_backup: false,
        });
        assert!(opts.backup);
        assert!(!opts.strict_backup);
        assert!(opts.dry_run);
        assert_eq!(ctx.timeout(None), Duration::from_secs(10));
        assert_eq!(ctx.timeout(Some(3)), Duration::from_secs(3));
    }

    #[test]
    fn test_clean_keeps_original_backup() {
        let dir = tempfile::tempdir().unwrap();
        let bib = dir.path().join("refs.bib");
        let paper = dir.path().join("paper.tex");
        let original = "@misc{web,\n  url = {https://example.com}\n}\n\n@book{orphan,\n  title = {Never Cited}\n}\n";
        fs::write(&bib, original).unwrap();
        fs::write(&paper, "\\cite{web}\n").unwrap();

        let docs = DocumentArgs {
            files: vec![paper],
            directory: dir.path().to_path_buf(),
            no_recursive: false,
        };
        let ok = cmd_clean(&bib, &docs, CleanArgs::default(), &Reachable, &quiet()).unwrap();
        assert!(ok);

        let cleaned = fs::read_to_string(&bib).unwrap();
        assert!(!cleaned.contains("orphan"));
        assert!(cleaned.contains("note = {Accessed: "));
        assert_eq!(fs::read_to_string(rewrite::backup_path(&bib)).unwrap(), original);
    }

    #[test]
    fn test_verify_dry_run_leaves_file() {
        let dir = tempfile::tempdir().unwrap();
        let bib = dir.path().join("refs.bib");
        let original = "@misc{web,\n  url = {https://example.com}\n}\n";
        fs::write(&bib, original).unwrap();

        let write = WriteArgs {
            dry_run: true,
            no_backup: false,
        };
        let v = cmd_verify(&bib, true, write, None, false, &Reachable, &quiet()).unwrap();
        assert_eq!(v.updated, 1);
        assert!(!v.commit.written);
        assert_eq!(fs::read_to_string(&bib).unwrap(), original);
    }
}
