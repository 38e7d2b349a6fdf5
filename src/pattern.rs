//! Declarative string patterns used by header and query rules.
//!
//! | pattern             | matches when                          |
//! |---------------------|---------------------------------------|
//! | `regex:<r>`         | the whole value matches `<r>`         |
//! | `contains:<s>`      | the value contains `<s>`              |
//! | `startsWith:<s>`    | the value begins with `<s>`           |
//! | `endsWith:<s>`      | the value ends with `<s>`             |
//! | anything else       | the value equals the pattern exactly  |

use crate::error::{MockError, Result};
use regex::Regex;

/// A parsed pattern.
#[derive(Debug, Clone)]
pub enum Pattern {
    Exact(String),
    Regex(Regex),
    Contains(String),
    StartsWith(String),
    EndsWith(String),
}

impl Pattern {
    /// Parse a declared pattern string.
    ///
    /// Fails only for a `regex:` pattern that does not compile.
    pub fn parse(pattern: &str) -> Result<Self> {
        if let Some(expr) = pattern.strip_prefix("regex:") {
            let anchored = format!("^(?:{})$", expr);
            let regex = Regex::new(&anchored).map_err(|e| {
                MockError::MatchEvaluation(format!("Invalid regex '{}': {}", expr, e))
            })?;
            return Ok(Self::Regex(regex));
        }
        if let Some(s) = pattern.strip_prefix("contains:") {
            return Ok(Self::Contains(s.to_string()));
        }
        if let Some(s) = pattern.strip_prefix("startsWith:") {
            return Ok(Self::StartsWith(s.to_string()));
        }
        if let Some(s) = pattern.strip_prefix("endsWith:") {
            return Ok(Self::EndsWith(s.to_string()));
        }
        Ok(Self::Exact(pattern.to_string()))
    }

    pub fn is_match(&self, actual: &str) -> bool {
        match self {
            Self::Exact(expected) => actual == expected,
            Self::Regex(regex) => regex.is_match(actual),
            Self::Contains(s) => actual.contains(s.as_str()),
            Self::StartsWith(s) => actual.starts_with(s.as_str()),
            Self::EndsWith(s) => actual.ends_with(s.as_str()),
        }
    }
}

/// Whether `actual` satisfies `pattern`. An uncompilable regex never matches.
pub fn matches(actual: &str, pattern: &str) -> bool {
    Pattern::parse(pattern)
        .map(|p| p.is_match(actual))
        .unwrap_or(false)
}
