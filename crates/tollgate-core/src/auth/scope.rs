//! Scope matching.
//!
//! Scopes are colon-separated paths such as `ai:analyze`. A granted scope satisfies a required
//! scope when:
//!
//! - they are equal,
//! - the granted scope is `*`,
//! - the granted scope is a proper ancestor of the required one: `ai` and `ai:*` both grant
//!   `ai:analyze` and `ai:analyze:deep`, but `ai:*` does not grant bare `ai`.

use super::AuthError;
use std::collections::BTreeSet;

pub const WILDCARD: &str = "*";
const SEPARATOR: char = ':';
const MAX_SCOPE_LENGTH: usize = 128;

/// Returns whether a single granted scope satisfies `required`.
#[must_use]
pub fn grants(granted: &str, required: &str) -> bool {
    if granted == WILDCARD || granted == required {
        return true;
    }

    let parent = granted.strip_suffix(":*").unwrap_or(granted);
    required.len() > parent.len()
        && required.starts_with(parent)
        && required[parent.len()..].starts_with(SEPARATOR)
}

/// Returns whether any scope in `scopes` satisfies `required`.
#[must_use]
pub fn check_scope(scopes: &BTreeSet<String>, required: &str) -> bool {
    scopes.iter().any(|granted| grants(granted, required))
}

/// Validates and canonicalizes requested scopes.
///
/// Scopes are trimmed; each segment must be non-empty and made of lowercase ASCII letters,
/// digits, `_` or `-`, except that the final segment may be `*`.
///
/// # Errors
///
/// Returns [`AuthError::InvalidScope`] naming the first offending scope.
pub fn normalize_scopes<I, S>(scopes: I) -> Result<BTreeSet<String>, AuthError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    scopes
        .into_iter()
        .map(|scope| {
            let scope = scope.as_ref().trim();
            if is_valid_scope(scope) {
                Ok(scope.to_string())
            } else {
                Err(AuthError::InvalidScope(scope.to_string()))
            }
        })
        .collect()
}

fn is_valid_scope(scope: &str) -> bool {
    if scope.is_empty() || scope.len() > MAX_SCOPE_LENGTH {
        return false;
    }
    if scope == WILDCARD {
        return true;
    }

    let segments: Vec<&str> = scope.split(SEPARATOR).collect();
    let last = segments.len() - 1;
    segments.iter().enumerate().all(|(i, segment)| {
        (i == last && i > 0 && *segment == WILDCARD)
            || (!segment.is_empty()
                && segment.chars().all(|c| {
                    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-'
                }))
    })
}
