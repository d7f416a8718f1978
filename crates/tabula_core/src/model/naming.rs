//! Aspect naming rules.
//!
//! # Invariants
//! - Names are non-blank and never contain the path separator.
//! - `unique_name` always returns a name not present in `taken`.

use crate::error::StructuralError;
use crate::model::aspect::{AspectType, PATH_SEPARATOR};
use once_cell::sync::Lazy;
use regex::Regex;

/// Name given to aspects created or loaded with a blank name.
pub const DEFAULT_ASPECT_NAME: &str = "Unnamed";

static NUMBERED_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*\S) (\d+)$").expect("valid numbered name regex"));

/// Name that was requested and the sibling-unique name actually assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameDiversion {
    pub requested: String,
    pub assigned: String,
}

/// Checks a user-supplied name; returns the trimmed form.
pub fn validate(name: &str) -> Result<String, StructuralError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(StructuralError::EmptyName);
    }
    if trimmed.contains(PATH_SEPARATOR) || trimmed.chars().any(char::is_control) {
        return Err(StructuralError::InvalidName(trimmed.to_string()));
    }
    Ok(trimmed.to_string())
}

/// Makes a stored name usable without rejecting it: blanks become the
/// default name and separators become `-`. Returns `None` when unchanged.
pub fn sanitize(name: &str) -> Option<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Some(DEFAULT_ASPECT_NAME.to_string());
    }
    let cleaned: String = trimmed
        .chars()
        .map(|c| {
            if c == PATH_SEPARATOR || c.is_control() {
                '-'
            } else {
                c
            }
        })
        .collect();
    (cleaned != name).then_some(cleaned)
}

/// Tables and matrices are referenced by name from formulas, which reserve
/// `_`; it becomes `-`.
pub fn escape_for(aspect_type: AspectType, name: &str) -> String {
    match aspect_type {
        AspectType::Table | AspectType::Matrix => name.replace('_', "-"),
        _ => name.to_string(),
    }
}

/// Returns `requested` if free, otherwise the first free `"<base> <n>"`.
///
/// A trailing ` <n>` on the request is treated as a counter, so asking for
/// `"T1 2"` when taken yields `"T1 3"`.
pub fn unique_name<'a, I>(requested: &str, taken: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let taken: Vec<&str> = taken.into_iter().collect();
    if !taken.contains(&requested) {
        return requested.to_string();
    }
    let (base, mut counter) = match NUMBERED_NAME_RE.captures(requested) {
        Some(captures) => {
            let base = captures.get(1).map_or(requested, |m| m.as_str());
            let counter = captures
                .get(2)
                .and_then(|m| m.as_str().parse::<u64>().ok())
                .unwrap_or(1);
            (base, counter.saturating_add(1))
        }
        None => (requested, 2),
    };
    loop {
        let candidate = format!("{base} {counter}");
        if !taken.contains(&candidate.as_str()) {
            return candidate;
        }
        counter = counter.saturating_add(1);
    }
}
