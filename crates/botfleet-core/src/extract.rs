// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Schema-agnostic value extraction from telemetry documents.
//!
//! The telemetry source's schema is not fixed: field names drift, values
//! arrive as strings or numbers, and the payload nests arbitrarily. The
//! extractor is a pure visitor over a decoded [`serde_json::Value`] that
//! finds the best-effort scalar for a key-name pattern.
//!
//! The search is breadth-before-depth: at each level every key of the
//! current object is scanned for a pattern match before any nested value
//! is descended into, so a top-level match always wins over a deeper one.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// Generic value-holding keys probed when a matched key resolves to a
/// nested object rather than a string.
static GENERIC_VALUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(url|src|href|icon|img|image|link|pic|source)$").unwrap());

/// Minimum length for a qualifying string value. Filters out placeholder
/// values like "-", "n/a" and empty strings.
const MIN_VALUE_LEN: usize = 5;

/// Find the first string value whose key matches `pattern`.
///
/// With `penetrate` set, a matched key holding an object is additionally
/// probed one level deep for a generic value-holding key (no further
/// recursion within that probe). Arrays are treated as ordered candidate
/// lists. Returns `None` rather than failing on any well-formed document;
/// recursion is bounded by the document's structural depth.
pub fn find_value(doc: &Value, pattern: &Regex, penetrate: bool) -> Option<String> {
    match doc {
        Value::Array(items) => items
            .iter()
            .find_map(|item| find_value(item, pattern, penetrate)),
        Value::Object(map) => {
            // Phase 1: scan all keys at this level before descending.
            for (key, value) in map {
                if !pattern.is_match(key) {
                    continue;
                }
                if let Value::String(s) = value
                    && s.len() >= MIN_VALUE_LEN
                {
                    return Some(s.clone());
                }
                if penetrate && let Value::Object(inner) = value {
                    let probed = inner.iter().find_map(|(k, v)| match v {
                        Value::String(s) if s.len() >= MIN_VALUE_LEN && GENERIC_VALUE_RE.is_match(k) => {
                            Some(s.clone())
                        }
                        _ => None,
                    });
                    if probed.is_some() {
                        return probed;
                    }
                }
            }

            // Phase 2: descend into nested values.
            map.values()
                .filter(|v| matches!(v, Value::Object(_) | Value::Array(_)))
                .find_map(|v| find_value(v, pattern, penetrate))
        }
        _ => None,
    }
}

/// Direct field lookup by candidate key names, case-insensitive.
///
/// Returns the first candidate present with a non-null, non-empty value.
/// Unlike [`find_value`] this does not recurse; it is used where the
/// schema's top level is known well enough to name the variants.
pub fn field<'a>(doc: &'a Value, candidates: &[&str]) -> Option<&'a Value> {
    let map = doc.as_object()?;
    for candidate in candidates {
        let found = map
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(candidate))
            .map(|(_, v)| v);
        if let Some(value) = found {
            match value {
                Value::Null => continue,
                Value::String(s) if s.is_empty() => continue,
                _ => return Some(value),
            }
        }
    }
    None
}

/// Parse a cumulative metric out of a loosely-typed value.
///
/// Numbers are taken as-is; strings are stripped of everything but ASCII
/// digits first, so thousands separators ("1,200", "1.200") and unit
/// suffixes do not break parsing. Returns `None` when no digits remain.
pub fn parse_metric(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.floor() as i64)),
        Value::String(s) => {
            let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
            if digits.is_empty() {
                None
            } else {
                digits.parse().ok()
            }
        }
        _ => None,
    }
}

/// Parse a percent value, tolerating a trailing `%` and string encoding.
pub fn parse_percent(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').parse().ok(),
        _ => None,
    }
}
