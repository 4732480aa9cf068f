use crate::error::{Error, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

/// How the braced argument of a reference command maps to keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyArg {
    /// The whole argument is one key (`\ac{ml}`)
    Single,
    /// Comma-separated keys (`\cite{a, b}`)
    List,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefCommand {
    /// Command name without the backslash
    pub name: &'static str,
    pub arg: KeyArg,
}

const fn single(name: &'static str) -> RefCommand {
    RefCommand { name, arg: KeyArg::Single }
}

const fn list(name: &'static str) -> RefCommand {
    RefCommand { name, arg: KeyArg::List }
}

/// Usage commands of the `acronym` and `glossaries` packages.
pub const ACRONYM_COMMANDS: &[RefCommand] = &[
    single("ac"),
    single("acp"),
    single("acs"),
    single("acl"),
    single("acf"),
    single("acrshort"),
    single("acrlong"),
    single("acrfull"),
    single("Ac"),
    single("Acp"),
    single("Acs"),
    single("Acl"),
    single("Acf"),
    single("ACshort"),
    single("AClong"),
    single("ACfull"),
];

/// Citation commands of LaTeX, natbib and biblatex.
pub const CITATION_COMMANDS: &[RefCommand] = &[
    list("cite"),
    list("citep"),
    list("citet"),
    list("citealt"),
    list("citealp"),
    list("citeauthor"),
    list("citeyear"),
    list("citeyearpar"),
    list("Cite"),
    list("Citep"),
    list("Citet"),
    list("autocite"),
    list("textcite"),
    list("parencite"),
    list("footcite"),
    list("fullcite"),
];

/// A single place where a key is referenced.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub file: PathBuf,
    /// 1-based line number
    pub line: usize,
}

#[derive(Serialize, Debug, Clone)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Serialize, Debug, Clone, Default)]
pub struct Usages {
    /// key -> occurrences, in scan order
    pub occurrences: BTreeMap<String, Vec<Occurrence>>,
    pub files_scanned: usize,
    pub skipped: Vec<SkippedFile>,
}

impl Usages {
    fn record(&mut self, key: &str, file: &Path, line: usize) {
        self.occurrences
            .entry(key.to_string())
            .or_default()
            .push(Occurrence {
                file: file.to_path_buf(),
                line,
            });
    }
}

/// Finds reference commands from a command table in document text.
pub struct UsageScanner {
    commands: Vec<RefCommand>,
    pattern: Regex,
}

impl UsageScanner {
    pub fn new(commands: &[RefCommand]) -> Self {
        let names: Vec<String> = commands.iter().map(|c| regex::escape(c.name)).collect();
        // \name, optional star, up to two optional [..] arguments, then {keys}
        let pattern = format!(
            r"\\({})\*?(?:\[[^\]]*\]){{0,2}}\{{([^}}]+)\}}",
            names.join("|")
        );

        UsageScanner {
            commands: commands.to_vec(),
            pattern: Regex::new(&pattern).expect("command names are escaped"),
        }
    }

    fn arg_kind(&self, name: &str) -> KeyArg {
        self.commands
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.arg)
            .unwrap_or(KeyArg::Single)
    }

    /// Record every key referenced in `text` under `file`.
    pub fn scan_text(&self, file: &Path, text: &str, usages: &mut Usages) {
        for (i, line) in text.lines().enumerate() {
            for caps in self.pattern.captures_iter(line) {
                let argument = &caps[2];
                match self.arg_kind(&caps[1]) {
                    KeyArg::Single => usages.record(argument, file, i + 1),
                    KeyArg::List => {
                        for key in argument.split(',').map(str::trim).filter(|k| !k.is_empty()) {
                            usages.record(key, file, i + 1);
                        }
                    }
                }
            }
        }
    }

    /// Scan files in the given order. Unreadable files are skipped and reported.
    pub fn scan_files(&self, files: &[PathBuf]) -> Usages {
        let mut usages = Usages::default();

        for path in files {
            match fs::read_to_string(path) {
                Ok(text) => {
                    self.scan_text(path, &text, &mut usages);
                    usages.files_scanned += 1;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable document");
                    usages.skipped.push(SkippedFile {
                        path: path.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        usages
    }
}

/// Discovers the document files to scan.
pub trait FileLister {
    /// Matching files under `root`, sorted lexicographically.
    fn list(&self, root: &Path, recursive: bool) -> Result<Vec<PathBuf>>;
}

/// Directory walker honouring `.gitignore` and hidden-file rules.
pub struct WalkLister {
    extensions: HashSet<String>,
    exclude: GlobSet,
}

impl WalkLister {
    pub fn new(extensions: &[String], exclude: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in exclude {
            builder.add(Glob::new(pattern)?);
        }

        Ok(WalkLister {
            extensions: extensions
                .iter()
                .map(|e| e.trim().trim_start_matches('.').to_lowercase())
                .collect(),
            exclude: builder.build()?,
        })
    }
}

impl FileLister for WalkLister {
    fn list(&self, root: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
        if !root.is_dir() {
            return Err(Error::NotFound(root.to_path_buf()));
        }

        let mut builder = WalkBuilder::new(root);
        builder.hidden(true).git_ignore(true).git_global(true);
        if !recursive {
            builder.max_depth(Some(1));
        }

        let mut files = Vec::new();
        for entry in builder.build() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) if e.depth() == Some(0) => return Err(e.into()),
                Err(e) => {
                    tracing::debug!(error = %e, "walk error");
                    continue;
                }
            };
            let path = entry.path();
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }

            // Check extension
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_lowercase())
                .unwrap_or_default();
            if !self.extensions.contains(&ext) {
                continue;
            }

            let relative = path.strip_prefix(root).unwrap_or(path);
            if self.exclude.is_match(relative) {
                continue;
            }

            files.push(path.to_path_buf());
        }

        files.sort();
        Ok(files)
    }
}
