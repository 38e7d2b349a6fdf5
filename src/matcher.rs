//! Request matching logic.
//!
//! Picks the single best mock among the candidates stored for an
//! (owner, path, method) key, given the live request.

use crate::error::{MockError, Result};
use crate::model::{MockDefinition, OwnerId};
use crate::pattern::Pattern;
use bytes::Bytes;
use std::collections::HashMap;
use tracing::debug;

/// Per-call overrides supplied through request headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub delay_ms: Option<u64>,
    pub status: Option<u16>,
    pub method: Option<String>,
}

/// Everything known about one inbound call.
#[derive(Debug, Clone, Default)]
pub struct MatchContext {
    pub owner: OwnerId,
    /// Effective (possibly overridden) uppercased method
    pub method: String,
    /// Normalized path
    pub path: String,
    /// Raw query string, without the leading `?`
    pub query_string: String,
    /// Headers keyed by lowercased name; first value wins
    pub headers: HashMap<String, String>,
    /// Decoded query parameters, every value kept
    pub query: HashMap<String, Vec<String>>,
    pub body: Bytes,
    pub remote_addr: Option<String>,
    pub overrides: Overrides,
}

impl MatchContext {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// First value bound to a query parameter.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }
}

/// Select the best candidate for the request.
///
/// Inactive candidates and those whose declared header or query rules are
/// not satisfied are dropped. Among the rest the highest priority wins;
/// ties go to the highest version, then the highest id.
pub fn select_best<'a>(
    candidates: &'a [MockDefinition],
    ctx: &MatchContext,
) -> Option<&'a MockDefinition> {
    candidates
        .iter()
        .filter(|mock| mock.active)
        .filter(|mock| match matches_request(mock, ctx) {
            Ok(matched) => matched,
            Err(e) => {
                debug!(id = %mock.id, error = %e, "Candidate rules could not be evaluated");
                false
            }
        })
        .max_by_key(|mock| (mock.priority, mock.version, mock.id))
}

/// Evaluate one candidate's declared rules against the request.
pub fn matches_request(mock: &MockDefinition, ctx: &MatchContext) -> Result<bool> {
    Ok(matches_headers(mock, ctx)? && matches_query(mock, ctx)? && matches_body(mock)?)
}

fn matches_headers(mock: &MockDefinition, ctx: &MatchContext) -> Result<bool> {
    let Some(rules) = parse_rules(mock.request_headers.as_deref(), "header")? else {
        return Ok(true);
    };

    for (name, pattern) in &rules {
        match ctx.header(name) {
            Some(actual) if pattern.is_match(actual) => {}
            _ => return Ok(false),
        }
    }
    Ok(true)
}

fn matches_query(mock: &MockDefinition, ctx: &MatchContext) -> Result<bool> {
    let Some(rules) = parse_rules(mock.query_parameters.as_deref(), "query")? else {
        return Ok(true);
    };

    for (name, pattern) in &rules {
        let satisfied = ctx
            .query
            .get(name)
            .is_some_and(|values| values.iter().any(|v| pattern.is_match(v)));
        if !satisfied {
            return Ok(false);
        }
    }
    Ok(true)
}

/// The body pattern must be a well-formed JSON object. It is not compared
/// against the request body.
fn matches_body(mock: &MockDefinition) -> Result<bool> {
    let Some(raw) = declared(mock.request_body_pattern.as_deref()) else {
        return Ok(true);
    };
    serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(raw).map_err(|e| {
        MockError::MatchEvaluation(format!("body pattern is not a JSON object: {}", e))
    })?;
    Ok(true)
}

fn declared(raw: Option<&str>) -> Option<&str> {
    raw.filter(|r| !r.trim().is_empty())
}

/// Parse a JSON object of name -> pattern. `None` when nothing is declared.
fn parse_rules(raw: Option<&str>, kind: &str) -> Result<Option<Vec<(String, Pattern)>>> {
    let Some(raw) = declared(raw) else {
        return Ok(None);
    };

    let map: HashMap<String, String> = serde_json::from_str(raw).map_err(|e| {
        MockError::MatchEvaluation(format!("{} rules are not a JSON string map: {}", kind, e))
    })?;

    map.into_iter()
        .map(|(name, pattern)| Ok((name, Pattern::parse(&pattern)?)))
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

/// Parse a query string into a multi-map of decoded values.
pub fn parse_query_string(query: &str) -> HashMap<String, Vec<String>> {
    let mut params: HashMap<String, Vec<String>> = HashMap::new();

    for part in query.split('&') {
        if part.is_empty() {
            continue;
        }
        let (key, value) = part.split_once('=').unwrap_or((part, ""));
        params
            .entry(url_decode(key))
            .or_default()
            .push(url_decode(value));
    }

    params
}

/// Percent-decode a query component, treating `+` as a space.
fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                match std::str::from_utf8(&bytes[i + 1..i + 3])
                    .ok()
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}
