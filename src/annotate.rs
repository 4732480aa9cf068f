use crate::bibtex::{parse_bibliography, BibEntry, BibFile};
use crate::error::{read_text, Result};
use crate::rewrite::{self, Commit, WriteOptions};
use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

/// Outcome of probing one URL.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct UrlStatus {
    pub reachable: bool,
    /// HTTP status, 0 when no response was received
    pub status_code: u16,
    pub error: Option<String>,
}

impl UrlStatus {
    pub fn reachable(status_code: u16) -> Self {
        UrlStatus {
            reachable: true,
            status_code,
            error: None,
        }
    }

    pub fn unreachable(status_code: u16, error: impl Into<String>) -> Self {
        UrlStatus {
            reachable: false,
            status_code,
            error: Some(error.into()),
        }
    }
}

pub trait UrlChecker {
    fn check(&self, url: &str, timeout: Duration) -> UrlStatus;
}

/// Blocking HTTP GET probe.
pub struct HttpChecker {
    client: reqwest::blocking::Client,
}

impl HttpChecker {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(user_agent.to_string())
            .build()?;
        Ok(HttpChecker { client })
    }
}

impl UrlChecker for HttpChecker {
    fn check(&self, url: &str, timeout: Duration) -> UrlStatus {
        let url = if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("https://{}", url)
        };

        match self.client.get(&url).timeout(timeout).send() {
            Ok(resp) if resp.status().is_success() => UrlStatus::reachable(resp.status().as_u16()),
            Ok(resp) => {
                let status = resp.status();
                UrlStatus::unreachable(status.as_u16(), format!("HTTP {}", status))
            }
            Err(e) => UrlStatus::unreachable(e.status().map(|s| s.as_u16()).unwrap_or(0), e.to_string()),
        }
    }
}

fn embedded_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://[^\s}]+|www\.[^\s}]+").expect("valid regex"))
}

fn access_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:\s*[.,;])?\s*Accessed:\s*\d{4}-\d{2}-\d{2}\.?").expect("valid regex")
    })
}

/// URL of an entry: the `url` field, else the first URL inside `howpublished`.
pub fn entry_url(entry: &BibEntry) -> Option<String> {
    if let Some(url) = entry.field("url").filter(|u| !u.is_empty()) {
        return Some(url.to_string());
    }
    let howpublished = entry.field("howpublished")?;
    embedded_url_re()
        .find(howpublished)
        .map(|m| m.as_str().to_string())
}

#[derive(Serialize, Debug, Clone)]
pub struct UrlCheck {
    /// Index of the checked entry in `BibFile::entries`
    #[serde(skip)]
    pub entry: usize,
    pub key: String,
    pub url: String,
    #[serde(flatten)]
    pub status: UrlStatus,
}

/// Probe every entry URL sequentially, reporting each result as it arrives.
pub fn check_urls(
    bib: &BibFile,
    checker: &dyn UrlChecker,
    timeout: Duration,
    mut on_result: impl FnMut(&UrlCheck),
) -> Vec<UrlCheck> {
    let mut checks = Vec::new();

    for (index, entry) in bib.entries.iter().enumerate() {
        let Some(url) = entry_url(entry) else {
            continue;
        };
        let status = checker.check(&url, timeout);
        tracing::debug!(key = %entry.key, url = %url, reachable = status.reachable, code = status.status_code);

        let check = UrlCheck {
            entry: index,
            key: entry.key.clone(),
            url,
            status,
        };
        on_result(&check);
        checks.push(check);
    }

    checks
}

/// Note text with a single, current access marker.
pub fn access_note(existing: Option<&str>, date: NaiveDate) -> String {
    let marker = format!("Accessed: {}", date.format("%Y-%m-%d"));
    let stripped = access_marker_re().replace_all(existing.unwrap_or_default(), "");
    let rest = stripped.trim();

    if rest.is_empty() {
        marker
    } else if rest.ends_with('.') {
        format!("{} {}", rest, marker)
    } else {
        format!("{}. {}", rest, marker)
    }
}

/// A text replacement in the bibliography source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub at: std::ops::Range<usize>,
    pub text: String,
}

/// Stamps reachable entries with the date their URL was last seen working.
pub struct AccessAnnotator {
    date: NaiveDate,
}

impl AccessAnnotator {
    pub fn new(date: NaiveDate) -> Self {
        AccessAnnotator { date }
    }

    /// Edit for one entry of `content`; `None` when the URL was not reachable.
    pub fn edit(&self, content: &str, entry: &BibEntry, status: &UrlStatus) -> Option<Edit> {
        if !status.reachable {
            return None;
        }

        if let Some(note) = entry.field_entry("note") {
            let text = access_note(Some(&note.value), self.date);
            let quoted = content[note.value_span.clone()].starts_with('"');
            return Some(Edit {
                at: note.value_span.clone(),
                text: if quoted {
                    format!("\"{}\"", text)
                } else {
                    format!("{{{}}}", text)
                },
            });
        }

        // No note yet: append a field after the last one
        let body = &content[entry.body_start..entry.body_end];
        let insert_at = entry.body_start + body.trim_end().len();
        let needs_comma = !body.trim().is_empty() && !body.trim_end().ends_with(',');
        let indent = field_indent(body);

        Some(Edit {
            at: insert_at..insert_at,
            text: format!(
                "{}\n{}note = {{{}}}",
                if needs_comma { "," } else { "" },
                indent,
                access_note(None, self.date)
            ),
        })
    }

    /// Annotate all reachable entries. Returns the new content and the number of entries updated.
    pub fn annotate(&self, content: &str, bib: &BibFile, checks: &[UrlCheck]) -> (String, usize) {
        let mut edits: Vec<Edit> = checks
            .iter()
            .filter_map(|check| {
                let entry = bib.entries.get(check.entry).filter(|e| e.key == check.key)?;
                self.edit(content, entry, &check.status)
            })
            .collect();

        // Apply back to front so earlier offsets stay valid
        edits.sort_by(|a, b| b.at.start.cmp(&a.at.start));
        let mut out = content.to_string();
        let mut count = 0;
        let mut applied_from: Option<usize> = None;
        for edit in edits {
            if applied_from.is_some_and(|from| edit.at.end > from || edit.at.start == from) {
                tracing::warn!(offset = edit.at.start, "skipping overlapping note edit");
                continue;
            }
            applied_from = Some(edit.at.start);
            out.replace_range(edit.at, &edit.text);
            count += 1;
        }

        (out, count)
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct Verification {
    pub checks: Vec<UrlCheck>,
    /// Entries whose note was (or in dry-run would be) stamped
    pub updated: usize,
    #[serde(flatten)]
    pub commit: Commit,
}

/// Check every URL in a bibliography file and, when `stamp` is set, record
/// the access date on reachable entries.
pub fn verify_file(
    path: &Path,
    checker: &dyn UrlChecker,
    timeout: Duration,
    stamp: Option<NaiveDate>,
    opts: WriteOptions,
    on_result: impl FnMut(&UrlCheck),
) -> Result<Verification> {
    let content = read_text(path)?;
    let bib = parse_bibliography(&content);
    let checks = check_urls(&bib, checker, timeout, on_result);

    let (updated, commit) = match stamp {
        Some(date) if checks.iter().any(|c| c.status.reachable) => {
            let (annotated, updated) = AccessAnnotator::new(date).annotate(&content, &bib, &checks);
            (updated, rewrite::commit(path, &content, &annotated, opts)?)
        }
        _ => (0, Commit::default()),
    };

    Ok(Verification {
        checks,
        updated,
        commit,
    })
}

/// Indentation of the first field line, two spaces if there is none.
fn field_indent(body: &str) -> &str {
    body.lines()
        .skip(1)
        .find(|l| !l.trim().is_empty())
        .map(|l| &l[..l.len() - l.trim_start().len()])
        .unwrap_or("  ")
}
