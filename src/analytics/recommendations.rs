//! Turns free-form model replies into structured recommendations.
//!
//! Replies are not guaranteed to follow the requested format, so both
//! functions here are heuristics. List markers are preferred; plain prose
//! falls back to one recommendation per sentence.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::db::LedgerEntry;

/// Recommendation derived from one ledger response. Not stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub location_id: Option<String>,
    pub terms: Vec<String>,
    pub paragraph: String,
    pub recommendation_list: Vec<String>,
    pub ranking: u32,
}

fn numbered_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+\.").expect("valid regex"))
}

fn three_terms() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^(?:[^:\n]*:)?\s*([^,\n]+),\s*([^,\n]+),\s*([^,\n]+?)\.?\s*$")
            .expect("valid regex")
    })
}

/// Strip a list marker, returning `None` for lines that are not list items.
fn list_item(line: &str) -> Option<&str> {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix('-').or_else(|| line.strip_prefix('*')) {
        return Some(rest.trim());
    }
    numbered_marker()
        .find(line)
        .map(|m| line[m.end()..].trim())
}

/// Split a reply into individual recommendations.
pub fn parse(raw: &str) -> Vec<String> {
    let items: Vec<String> = raw
        .lines()
        .filter_map(list_item)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect();
    if !items.is_empty() {
        return items;
    }

    raw.split('.')
        .map(str::trim)
        .filter(|fragment| !fragment.is_empty())
        .map(|fragment| format!("{}.", fragment))
        .collect()
}

fn split_terms(candidate: &str) -> Option<Vec<String>> {
    let body = match candidate.split_once(':') {
        Some((_, rest)) => rest,
        None => candidate,
    };
    let terms: Vec<String> = body
        .trim()
        .trim_end_matches('.')
        .split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    (terms.len() == 3).then_some(terms)
}

/// The three evaluation terms of a reply, or an empty list.
///
/// The first line is tried first (an optional `label:` prefix is dropped);
/// otherwise the first line anywhere that is a three-item comma list.
pub fn extract_terms(raw: &str) -> Vec<String> {
    if let Some(first) = raw.lines().map(str::trim).find(|l| !l.is_empty()) {
        if (first.contains(',') || first.contains(':')) && list_item(first).is_none() {
            if let Some(terms) = split_terms(first) {
                return terms;
            }
        }
    }

    for caps in three_terms().captures_iter(raw) {
        let line = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        if list_item(line).is_some() {
            continue;
        }
        let terms: Vec<String> = (1..=3)
            .filter_map(|i| caps.get(i))
            .map(|m| m.as_str().trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if terms.len() == 3 {
            return terms;
        }
    }
    Vec::new()
}

/// The reply's prose: everything except the terms line and list items.
pub fn extract_paragraph(raw: &str, terms: &[String]) -> String {
    let mut skipped_terms = terms.is_empty();
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| list_item(line).is_none())
        .filter(|line| {
            if !skipped_terms && split_terms(line).as_deref() == Some(terms) {
                skipped_terms = true;
                return false;
            }
            true
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Build a recommendation from a ledger entry. The location is the source
/// whose image the entry was made from.
pub fn from_ledger_entry(entry: &LedgerEntry, ranking: u32) -> Recommendation {
    let terms = extract_terms(&entry.response);
    let paragraph = extract_paragraph(&entry.response, &terms);
    let list_lines: Vec<&str> = entry
        .response
        .lines()
        .filter_map(list_item)
        .filter(|l| !l.is_empty())
        .collect();
    let recommendation_list = if list_lines.is_empty() {
        parse(&paragraph)
    } else {
        list_lines.into_iter().map(str::to_string).collect()
    };

    Recommendation {
        location_id: entry.source_id.clone(),
        terms,
        paragraph,
        recommendation_list,
        ranking,
    }
}
