//! Mock definition data model.
//!
//! A [`MockDefinition`] is one immutable version of an endpoint behavior.
//! Edits never mutate a stored definition; they append a new version.

use crate::error::{MockError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Literal prefix that dispatch URIs carry and stored paths never do.
const MOCK_PREFIX: &str = "/mock/";

/// Identifier of a stored mock definition row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MockId(pub u64);

impl fmt::Display for MockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the owner a mock belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub u64);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single stored endpoint behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockDefinition {
    pub id: MockId,
    pub owner: OwnerId,
    /// Normalized path (see [`normalize_path`])
    pub path: String,
    /// Uppercased HTTP method
    pub method: String,
    /// Response body, possibly containing template tokens
    pub response_body: String,
    pub status_code: u16,
    pub delay_ms: u64,
    /// Starts at 1, one more than the previous version of the same key
    pub version: u32,
    /// JSON object of header name -> pattern
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_headers: Option<String>,
    /// JSON object of query parameter name -> pattern
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_parameters: Option<String>,
    /// JSON object, checked for well-formedness only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body_pattern: Option<String>,
    /// Higher wins
    pub priority: i32,
    pub active: bool,
}

/// A mock about to be appended to the store; the store assigns `id` and `version`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMock {
    pub owner: OwnerId,
    pub path: String,
    pub method: String,
    pub response_body: String,
    pub status_code: u16,
    pub delay_ms: u64,
    pub request_headers: Option<String>,
    pub query_parameters: Option<String>,
    pub request_body_pattern: Option<String>,
    pub priority: i32,
    pub active: bool,
}

impl NewMock {
    /// Materialize the stored row.
    pub fn into_definition(self, id: MockId, version: u32) -> MockDefinition {
        MockDefinition {
            id,
            owner: self.owner,
            path: self.path,
            method: self.method,
            response_body: self.response_body,
            status_code: self.status_code,
            delay_ms: self.delay_ms,
            version,
            request_headers: self.request_headers,
            query_parameters: self.query_parameters,
            request_body_pattern: self.request_body_pattern,
            priority: self.priority,
            active: self.active,
        }
    }
}

/// Create or partial-update input.
///
/// On create, `path`, `method` and `response_body` are required. On update,
/// every absent field is copied from the version being superseded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MockDraft {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub response_body: Option<String>,
    #[serde(default)]
    pub status_code: Option<i32>,
    #[serde(default)]
    pub delay_ms: Option<i64>,
    #[serde(default)]
    pub request_headers: Option<String>,
    #[serde(default)]
    pub query_parameters: Option<String>,
    #[serde(default)]
    pub request_body_pattern: Option<String>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub active: Option<bool>,
}

impl MockDraft {
    /// Draft with the three required fields set.
    pub fn new(
        path: impl Into<String>,
        method: impl Into<String>,
        response_body: impl Into<String>,
    ) -> Self {
        Self {
            path: Some(path.into()),
            method: Some(method.into()),
            response_body: Some(response_body.into()),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: i32) -> Self {
        self.status_code = Some(status);
        self
    }

    pub fn with_delay(mut self, delay_ms: i64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = Some(active);
        self
    }

    pub fn with_header_rules(mut self, rules: impl Into<String>) -> Self {
        self.request_headers = Some(rules.into());
        self
    }

    pub fn with_query_rules(mut self, rules: impl Into<String>) -> Self {
        self.query_parameters = Some(rules.into());
        self
    }

    pub fn with_body_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.request_body_pattern = Some(pattern.into());
        self
    }

    /// Build a fresh mock for `owner`, applying defaults and validation.
    pub fn into_new_mock(self, owner: OwnerId) -> Result<NewMock> {
        let path = required(self.path, "path")?;
        let method = required(self.method, "method")?;
        let response_body = required(self.response_body, "response body")?;

        Ok(NewMock {
            owner,
            path: normalize_path(&path),
            method: normalize_method(&method),
            response_body,
            status_code: validate_status(self.status_code.unwrap_or(200))?,
            delay_ms: validate_delay(self.delay_ms.unwrap_or(0))?,
            request_headers: self.request_headers,
            query_parameters: self.query_parameters,
            request_body_pattern: self.request_body_pattern,
            priority: self.priority.unwrap_or(0),
            active: self.active.unwrap_or(true),
        })
    }

    /// Overlay this draft on `base`; fields absent here keep their prior value.
    pub fn overlay(self, base: &MockDefinition) -> Result<NewMock> {
        let path = match self.path {
            Some(p) => normalize_path(&required(Some(p), "path")?),
            None => base.path.clone(),
        };
        let method = match self.method {
            Some(m) => normalize_method(&required(Some(m), "method")?),
            None => base.method.clone(),
        };
        let response_body = match self.response_body {
            Some(b) => required(Some(b), "response body")?,
            None => base.response_body.clone(),
        };
        let status_code = match self.status_code {
            Some(s) => validate_status(s)?,
            None => base.status_code,
        };
        let delay_ms = match self.delay_ms {
            Some(d) => validate_delay(d)?,
            None => base.delay_ms,
        };

        Ok(NewMock {
            owner: base.owner,
            path,
            method,
            response_body,
            status_code,
            delay_ms,
            request_headers: self.request_headers.or_else(|| base.request_headers.clone()),
            query_parameters: self
                .query_parameters
                .or_else(|| base.query_parameters.clone()),
            request_body_pattern: self
                .request_body_pattern
                .or_else(|| base.request_body_pattern.clone()),
            priority: self.priority.unwrap_or(base.priority),
            active: self.active.unwrap_or(base.active),
        })
    }
}

fn required(value: Option<String>, field: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(MockError::validation(format!("{} must not be empty", field))),
    }
}

fn validate_status(status: i32) -> Result<u16> {
    if !(100..=599).contains(&status) {
        return Err(MockError::validation(format!(
            "Invalid status code: {}",
            status
        )));
    }
    Ok(status as u16)
}

fn validate_delay(delay_ms: i64) -> Result<u64> {
    u64::try_from(delay_ms)
        .map_err(|_| MockError::validation(format!("Invalid delay: {}ms", delay_ms)))
}

/// Normalize a path: leading `/`, no duplicate slashes, no `/mock/` prefix.
///
/// A blank path normalizes to `/`.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return "/".to_string();
    }

    let mut normalized = String::with_capacity(trimmed.len() + 1);
    if !trimmed.starts_with('/') {
        normalized.push('/');
    }
    for ch in trimmed.chars() {
        if ch == '/' && normalized.ends_with('/') {
            continue;
        }
        normalized.push(ch);
    }

    while normalized.starts_with(MOCK_PREFIX) {
        normalized.replace_range(..MOCK_PREFIX.len() - 1, "");
    }
    normalized
}

/// Uppercase and trim an HTTP method.
pub fn normalize_method(method: &str) -> String {
    method.trim().to_uppercase()
}
