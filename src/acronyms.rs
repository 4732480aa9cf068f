use crate::definitions::{DefinitionFormat, DefinitionSummary, Extracted, Pruned};
use crate::scan::{UsageScanner, ACRONYM_COMMANDS};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// A single `\acro{key}[short]{long}` line.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AcronymDef {
    pub key: String,
    pub short_form: String,
    pub long_form: String,
    /// Leading whitespace of the source line
    pub indent: String,
    /// Source line without indentation or line terminator
    pub body: String,
    /// 0-based line index in the source file
    pub line_index: usize,
}

#[derive(Debug, Clone, Default)]
pub struct AcronymFile {
    pub definitions: Vec<AcronymDef>,
    pub near_misses: usize,
}

fn definition_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([ \t]*)\\acro\{([^}]+)\}\[([^\]]+)\]\{([^}]+)\}").expect("valid regex")
    })
}

/// Split a line into content and terminator (`\n`, `\r\n` or nothing).
fn split_terminator(line: &str) -> (&str, &str) {
    let text = line.trim_end_matches(['\n', '\r']);
    (text, &line[text.len()..])
}

/// Parse one physical line. Returns `None` for anything that is not a definition.
pub fn parse_line(line: &str, line_index: usize) -> Option<AcronymDef> {
    let (text, _) = split_terminator(line);
    let caps = definition_re().captures(text)?;
    let indent = caps.get(1).map(|m| m.as_str()).unwrap_or_default();

    Some(AcronymDef {
        key: caps[2].to_string(),
        short_form: caps[3].to_string(),
        long_form: caps[4].to_string(),
        indent: indent.to_string(),
        body: text[indent.len()..].to_string(),
        line_index,
    })
}

/// `\acro` followed by a non-letter, i.e. an attempt at a definition rather than `\acronym`.
fn looks_like_definition(line: &str) -> bool {
    line.trim_start()
        .strip_prefix("\\acro")
        .is_some_and(|rest| !rest.starts_with(|c: char| c.is_ascii_alphabetic()))
}

pub fn parse_acronyms(content: &str) -> AcronymFile {
    let mut file = AcronymFile::default();

    for (i, line) in content.split_inclusive('\n').enumerate() {
        match parse_line(line, i) {
            Some(def) => file.definitions.push(def),
            None if looks_like_definition(line) => {
                tracing::debug!(line = i + 1, text = line.trim(), "unrecognised acronym definition");
                file.near_misses += 1;
            }
            None => {}
        }
    }

    file
}

/// Sort definitions by short form (case-insensitive, stable).
///
/// Definitions are permuted across the line slots they already occupy; each
/// slot keeps its own indentation and line terminator, all other lines stay
/// where they are. Returns the new content and the definitions in their new order.
pub fn sort_acronyms(content: &str) -> (String, Vec<AcronymDef>) {
    let mut lines: Vec<String> = content.split_inclusive('\n').map(str::to_string).collect();
    let parsed = parse_acronyms(content);

    let slots: Vec<usize> = parsed.definitions.iter().map(|d| d.line_index).collect();
    let mut sorted = parsed.definitions;
    sorted.sort_by_cached_key(|d| d.short_form.to_uppercase());

    for (slot, def) in slots.iter().zip(&sorted) {
        let (text, terminator) = split_terminator(&lines[*slot]);
        let indent = &text[..text.len() - text.trim_start().len()];
        let replaced = format!("{}{}{}", indent, def.body, terminator);
        lines[*slot] = replaced;
    }

    (lines.concat(), sorted)
}

/// Definitions file of `\acro` lines.
pub struct Acronyms;

impl DefinitionFormat for Acronyms {
    const NOUN: &'static str = "acronym";

    fn extract(content: &str) -> Extracted {
        let file = parse_acronyms(content);
        Extracted {
            definitions: file
                .definitions
                .into_iter()
                .map(|d| DefinitionSummary {
                    key: d.key,
                    label: d.short_form,
                    detail: d.long_form,
                })
                .collect(),
            near_misses: file.near_misses,
        }
    }

    fn prune(content: &str, keys: &BTreeSet<String>) -> Pruned {
        let mut kept = String::with_capacity(content.len());
        let mut removed = Vec::new();
        let mut total = 0;

        for (i, line) in content.split_inclusive('\n').enumerate() {
            if let Some(def) = parse_line(line, i) {
                total += 1;
                if keys.contains(&def.key) {
                    removed.push(def.key);
                    continue;
                }
            }
            kept.push_str(line);
        }

        Pruned {
            content: kept,
            removed,
            total,
        }
    }

    fn scanner() -> UsageScanner {
        UsageScanner::new(ACRONYM_COMMANDS)
    }

    fn describe(def: &DefinitionSummary) -> String {
        format!("[{}] {}", def.label, def.detail)
    }

    fn stub(key: &str) -> String {
        format!("\\acro{{{}}}[???]{{???}}", key)
    }
}
