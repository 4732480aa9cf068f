//! BibTeX entry extraction.
//!
//! Entries are located by their `@type{key,` header at the start of a line
//! and end at the first `}` that opens a line. Each entry is searched only up
//! to the next header, so an unterminated entry can never swallow the one
//! after it. Field values are read with brace counting instead of regexes.

use crate::definitions::{DefinitionFormat, DefinitionSummary, Extracted, Pruned};
use crate::scan::{UsageScanner, CITATION_COMMANDS};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::OnceLock;

/// Entry types that carry no citable key.
const PSEUDO_ENTRIES: &[&str] = &["comment", "string", "preamble"];

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct BibField {
    /// Lower-cased field name
    pub name: String,
    /// Value without its delimiters, trimmed
    pub value: String,
    /// Byte range of the raw value including `{}`/`""` delimiters
    pub value_span: Range<usize>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct BibEntry {
    /// Lower-cased entry type, e.g. `article`
    pub entry_type: String,
    pub key: String,
    pub fields: Vec<BibField>,
    /// From the start of the header line to the closing `}` (inclusive)
    pub span: Range<usize>,
    /// Byte offset right after the `key,` of the header
    pub body_start: usize,
    /// Byte offset of the newline preceding the closing `}`
    pub body_end: usize,
}

impl BibEntry {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }

    pub fn field_entry(&self, name: &str) -> Option<&BibField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct BibFile {
    pub entries: Vec<BibEntry>,
    /// Entry headers whose entry could not be read
    pub near_misses: usize,
}

impl BibFile {
    pub fn get(&self, key: &str) -> Option<&BibEntry> {
        self.entries.iter().find(|e| e.key == key)
    }
}

fn header_start_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^[ \t]*@(\w+)\s*\{").expect("valid regex"))
}

fn header_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\A\s*([^,\s{}]+)\s*,").expect("valid regex"))
}

pub fn parse_bibliography(content: &str) -> BibFile {
    let mut file = BibFile::default();
    let headers: Vec<_> = header_start_re().captures_iter(content).collect();

    for (i, caps) in headers.iter().enumerate() {
        let whole = caps.get(0).map(|m| m.range()).unwrap_or_default();
        let entry_type = caps[1].to_lowercase();
        if PSEUDO_ENTRIES.contains(&entry_type.as_str()) {
            continue;
        }

        let limit = headers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(content.len());

        match parse_entry(content, whole.clone(), entry_type, limit) {
            Some(entry) => file.entries.push(entry),
            None => {
                let line = content[..whole.start].matches('\n').count() + 1;
                tracing::debug!(line, "skipping malformed bibliography entry");
                file.near_misses += 1;
            }
        }
    }

    file
}

/// Parse the entry whose header spans `header`; nothing past `limit` is read.
fn parse_entry(
    content: &str,
    header: Range<usize>,
    entry_type: String,
    limit: usize,
) -> Option<BibEntry> {
    let region = &content[header.end..limit];
    let key_caps = header_key_re().captures(region)?;
    let body_start = header.end + key_caps.get(0)?.end();
    let key = key_caps[1].to_string();

    let body_end = body_start + content[body_start..limit].find("\n}")?;
    let fields = parse_fields(content, body_start, body_end)?;

    Some(BibEntry {
        entry_type,
        key,
        fields,
        span: header.start..body_end + 2,
        body_start,
        body_end,
    })
}

/// Read `name = value` pairs from `content[start..end]`.
fn parse_fields(content: &str, start: usize, end: usize) -> Option<Vec<BibField>> {
    let bytes = content.as_bytes();
    let mut fields = Vec::new();
    let mut pos = start;

    let skip_ws = |mut p: usize| {
        while p < end && bytes[p].is_ascii_whitespace() {
            p += 1;
        }
        p
    };

    loop {
        pos = skip_ws(pos);
        while pos < end && bytes[pos] == b',' {
            pos = skip_ws(pos + 1);
        }
        if pos >= end {
            return Some(fields);
        }

        let name_start = pos;
        while pos < end && (bytes[pos].is_ascii_alphanumeric() || b"_-:.".contains(&bytes[pos])) {
            pos += 1;
        }
        if pos == name_start {
            return None;
        }
        let name = content[name_start..pos].to_lowercase();

        pos = skip_ws(pos);
        if pos >= end || bytes[pos] != b'=' {
            return None;
        }
        pos = skip_ws(pos + 1);

        let value_end = value_end(bytes, pos, end)?;
        let raw = &content[pos..value_end];
        let value = match bytes[pos] {
            b'{' | b'"' => &raw[1..raw.len() - 1],
            _ => raw,
        };

        fields.push(BibField {
            name,
            value: value.trim().to_string(),
            value_span: pos..value_end,
        });
        pos = value_end;
    }
}

/// End (exclusive) of the value starting at `pos`, or `None` if it is unterminated.
fn value_end(bytes: &[u8], pos: usize, end: usize) -> Option<usize> {
    match *bytes.get(pos)? {
        b'{' => {
            let mut depth = 0usize;
            for (i, &b) in bytes[pos..end].iter().enumerate() {
                match b {
                    b'{' => depth += 1,
                    b'}' => {
                        depth -= 1;
                        if depth == 0 {
                            return Some(pos + i + 1);
                        }
                    }
                    _ => {}
                }
            }
            None
        }
        b'"' => {
            let mut depth = 0usize;
            for (i, &b) in bytes[pos + 1..end].iter().enumerate() {
                match b {
                    b'{' => depth += 1,
                    b'}' => depth = depth.checked_sub(1)?,
                    b'"' if depth == 0 => return Some(pos + i + 2),
                    _ => {}
                }
            }
            None
        }
        _ => {
            // Bare value such as `year = 2020`, running to the next comma
            let stop = bytes[pos..end]
                .iter()
                .position(|&b| b == b',')
                .map(|i| pos + i)
                .unwrap_or(end);
            let mut trimmed = stop;
            while trimmed > pos && bytes[trimmed - 1].is_ascii_whitespace() {
                trimmed -= 1;
            }
            (trimmed > pos).then_some(trimmed)
        }
    }
}

/// `.bib` bibliography file.
pub struct Bibliography;

impl DefinitionFormat for Bibliography {
    const NOUN: &'static str = "citation";

    fn extract(content: &str) -> Extracted {
        let file = parse_bibliography(content);
        Extracted {
            definitions: file
                .entries
                .iter()
                .map(|e| DefinitionSummary {
                    key: e.key.clone(),
                    label: e.field("title").unwrap_or("No title").to_string(),
                    detail: e.field("author").unwrap_or("No author").to_string(),
                })
                .collect(),
            near_misses: file.near_misses,
        }
    }

    fn prune(content: &str, keys: &BTreeSet<String>) -> Pruned {
        let file = parse_bibliography(content);
        let mut kept = String::with_capacity(content.len());
        let mut removed = Vec::new();
        let mut cursor = 0;

        for entry in &file.entries {
            if !keys.contains(&entry.key) {
                continue;
            }
            kept.push_str(&content[cursor..entry.span.start]);

            // Take the line break after the closing brace with the entry
            let rest = &content[entry.span.end..];
            let tail = if rest.starts_with("\r\n") {
                2
            } else if rest.starts_with('\n') {
                1
            } else {
                0
            };
            cursor = entry.span.end + tail;
            removed.push(entry.key.clone());
        }
        kept.push_str(&content[cursor..]);

        Pruned {
            content: kept,
            removed,
            total: file.entries.len(),
        }
    }

    fn scanner() -> UsageScanner {
        UsageScanner::new(CITATION_COMMANDS)
    }

    fn describe(def: &DefinitionSummary) -> String {
        let title = if def.label.chars().count() > 50 {
            format!("{}...", def.label.chars().take(50).collect::<String>())
        } else {
            def.label.clone()
        };
        format!("{} ({})", title, def.detail)
    }

    fn stub(key: &str) -> String {
        format!("@misc{{{},\n  title = {{???}}\n}}", key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"@Article{knuth84,
  Author = {Donald E. Knuth},
  title = {Literate {P}rogramming},
  journal = "The Computer Journal",
  year = 1984,
}

@misc{web,
  title = {A web page},
  url = {https://example.com},
  note = {Read later}
}
"#;

    #[test]
    fn test_parse_entries_and_fields() {
        let bib = parse_bibliography(SAMPLE);
        assert_eq!(bib.entries.len(), 2);
        assert_eq!(bib.near_misses, 0);

        let knuth = bib.get("knuth84").unwrap();
        assert_eq!(knuth.entry_type, "article");
        assert_eq!(knuth.field("author"), Some("Donald E. Knuth"));
        assert_eq!(knuth.field("title"), Some("Literate {P}rogramming"));
        assert_eq!(knuth.field("journal"), Some("The Computer Journal"));
        assert_eq!(knuth.field("year"), Some("1984"));
        assert!(SAMPLE[knuth.span.clone()].starts_with("@Article{knuth84,"));
        assert!(SAMPLE[knuth.span.clone()].ends_with("1984,\n}"));

        let web = bib.get("web").unwrap();
        assert_eq!(web.field("url"), Some("https://example.com"));
        assert_eq!(&SAMPLE[web.field_entry("note").unwrap().value_span.clone()], "{Read later}");
    }

    #[test]
    fn test_unterminated_entry_does_not_swallow_next() {
        let content = "@book{broken,\n  title = {No end\n\n@book{ok,\n  title = {Fine}\n}\n";
        let bib = parse_bibliography(content);
        assert_eq!(bib.entries.len(), 1);
        assert_eq!(bib.entries[0].key, "ok");
        assert_eq!(bib.near_misses, 1);
    }

    #[test]
    fn test_unterminated_value_skips_entry() {
        let content = "@book{bad,\n  title = {Open\n}\n@book{good,\n  title = \"Closed\"\n}\n";
        let bib = parse_bibliography(content);
        let keys: Vec<_> = bib.entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["good"]);
        assert_eq!(bib.near_misses, 1);
    }

    #[test]
    fn test_pseudo_entries_are_ignored() {
        let content = "@string{jcs = \"J. Comp. Sci.\"}\n@comment{note,\n  x = {y}\n}\n@misc{a,\n  title = {A}\n}\n";
        let bib = parse_bibliography(content);
        assert_eq!(bib.entries.len(), 1);
        assert_eq!(bib.entries[0].key, "a");
        assert_eq!(bib.near_misses, 0);
    }

    #[test]
    fn test_at_sign_inside_value_is_not_a_header() {
        let content = "@misc{a,\n  note = {mail me@example.org}\n}\n";
        let bib = parse_bibliography(content);
        assert_eq!(bib.entries.len(), 1);
        assert_eq!(bib.entries[0].field("note"), Some("mail me@example.org"));
    }

    #[test]
    fn test_empty_body() {
        let bib = parse_bibliography("@misc{bare,\n}\n");
        assert_eq!(bib.entries.len(), 1);
        assert!(bib.entries[0].fields.is_empty());
    }

    #[test]
    fn test_prune_removes_entry_spans() {
        let keys: BTreeSet<String> = ["knuth84".to_string()].into_iter().collect();
        let pruned = Bibliography::prune(SAMPLE, &keys);
        assert_eq!(pruned.removed, vec!["knuth84"]);
        assert_eq!(pruned.total, 2);
        assert!(pruned.content.starts_with("\n@misc{web,"));
        assert!(!pruned.content.contains("Knuth"));
        assert!(pruned.content.contains("note = {Read later}\n}\n"));

        let again = Bibliography::prune(&pruned.content, &keys);
        assert!(again.removed.is_empty());
        assert_eq!(again.content, pruned.content);
    }

    #[test]
    fn test_prune_keeps_unrelated_text() {
        let content = "% header\n@misc{a,\n  title = {A}\n}\n% between\n@misc{b,\n  title = {B}\n}";
        let keys: BTreeSet<String> = ["b".to_string()].into_iter().collect();
        let pruned = Bibliography::prune(content, &keys);
        assert_eq!(pruned.content, "% header\n@misc{a,\n  title = {A}\n}\n% between\n");
    }

    #[test]
    fn test_extract_summary_defaults() {
        let extracted = Bibliography::extract("@misc{a,\n  year = 2000\n}\n");
        let def = extracted.get("a").unwrap();
        assert_eq!(def.label, "No title");
        assert_eq!(def.detail, "No author");
        assert_eq!(Bibliography::describe(def), "No title (No author)");
    }
}
