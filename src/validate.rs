//! Input normalization for statuses, field names and command names.
//!
//! Three-tier resolution: exact match → synonym lookup → error with the
//! closest suggestion (Levenshtein distance ≤ 3).

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

// ── Valid value sets ─────────────────────────────────────────

pub static VALID_STATUSES: LazyLock<HashSet<&str>> =
    LazyLock::new(|| ["open", "resolved", "closed"].into_iter().collect());

pub static EDITABLE_FIELDS: LazyLock<HashSet<&str>> = LazyLock::new(|| {
    ["title", "status", "assignee", "project", "area"]
        .into_iter()
        .collect()
});

// ── Synonym maps ─────────────────────────────────────────────

pub static STATUS_SYNONYMS: LazyLock<HashMap<&str, &str>> = LazyLock::new(|| {
    [
        ("active", "open"),
        ("new", "open"),
        ("todo", "open"),
        ("reopened", "open"),
        ("reactivated", "open"),
        ("fixed", "resolved"),
        ("resolve", "resolved"),
        ("wontfix", "resolved"),
        ("duplicate", "resolved"),
        ("done", "closed"),
        ("close", "closed"),
        ("finished", "closed"),
    ]
    .into_iter()
    .collect()
});

pub static FIELD_SYNONYMS: LazyLock<HashMap<&str, &str>> = LazyLock::new(|| {
    [
        ("assignedto", "assignee"),
        ("assigned", "assignee"),
        ("owner", "assignee"),
        ("stitle", "title"),
        ("summary", "title"),
        ("sstatus", "status"),
        ("state", "status"),
        ("sproject", "project"),
        ("sarea", "area"),
    ]
    .into_iter()
    .collect()
});

/// Normalize a status string via exact match or synonym lookup.
///
/// Returns the canonical status, or an error with the original input
/// and an optional suggestion.
pub fn normalize_status(input: &str) -> Result<String, (String, Option<String>)> {
    let lower = input.trim().to_lowercase();

    if VALID_STATUSES.contains(lower.as_str()) {
        return Ok(lower);
    }

    if let Some(&canonical) = STATUS_SYNONYMS.get(lower.as_str()) {
        return Ok(canonical.to_string());
    }

    let suggestion = find_closest_match(&lower, &VALID_STATUSES, &STATUS_SYNONYMS);
    Err((input.to_string(), suggestion))
}

/// Normalize an editable field name.
pub fn normalize_field(input: &str) -> Result<String, (String, Option<String>)> {
    let lower = input.trim().to_lowercase();

    if EDITABLE_FIELDS.contains(lower.as_str()) {
        return Ok(lower);
    }

    if let Some(&canonical) = FIELD_SYNONYMS.get(lower.as_str()) {
        return Ok(canonical.to_string());
    }

    let suggestion = find_closest_match(&lower, &EDITABLE_FIELDS, &FIELD_SYNONYMS);
    Err((input.to_string(), suggestion))
}

/// Map the service's free-form status label onto a canonical status.
///
/// The service reports statuses such as `Active`, `Resolved (Fixed)` or
/// `Closed (Won't Fix)`; only the leading word matters.
#[must_use]
pub fn status_from_remote(label: &str) -> &'static str {
    let lower = label.trim().to_lowercase();
    if lower.starts_with("closed") {
        "closed"
    } else if lower.starts_with("resolved") {
        "resolved"
    } else {
        "open"
    }
}

/// Find the closest matching value across valid set and synonyms.
fn find_closest_match(
    input: &str,
    valid: &HashSet<&str>,
    synonyms: &HashMap<&str, &str>,
) -> Option<String> {
    let mut best: Option<(&str, usize)> = None;

    for &v in valid.iter().chain(synonyms.keys()) {
        let dist = levenshtein_distance(input, v);
        if dist <= 3 && best.is_none_or(|(_, d)| dist < d) {
            let canonical = synonyms.get(v).copied().unwrap_or(v);
            best = Some((canonical, dist));
        }
    }

    best.map(|(v, _)| v.to_string())
}

// ── Levenshtein distance ─────────────────────────────────────

/// Compute the Levenshtein edit distance between two strings.
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let a_len = a.len();
    let b_len = b.len();

    if a_len == 0 {
        return b_len;
    }
    if b_len == 0 {
        return a_len;
    }

    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0; b_len + 1];

    for i in 1..=a_len {
        curr[0] = i;
        for j in 1..=b_len {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1) // deletion
                .min(curr[j - 1] + 1) // insertion
                .min(prev[j - 1] + cost); // substitution
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_len]
}

/// Find names similar to an unknown one.
///
/// Returns up to `max` suggestions with edit distance ≤ 2,
/// sorted by distance then alphabetically.
pub fn find_similar<'a>(
    searched: &str,
    existing: impl IntoIterator<Item = &'a str>,
    max: usize,
) -> Vec<String> {
    let mut candidates: Vec<(usize, &str)> = existing
        .into_iter()
        .map(|name| (levenshtein_distance(searched, name), name))
        .filter(|(dist, _)| *dist <= 2)
        .collect();

    candidates.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));
    candidates.dedup_by(|a, b| a.1 == b.1);

    candidates
        .into_iter()
        .take(max)
        .map(|(_, name)| name.to_string())
        .collect()
}
