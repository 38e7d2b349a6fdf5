//! Configuration for the mock server.
//!
//! Defines the listen address, dispatch header names, rate-limit budgets,
//! known owners and mocks seeded at startup.

use crate::identity::Owner;
use crate::model::{normalize_path, MockDraft};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;

/// Main configuration for the mock server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MockServerConfig {
    /// Address the dispatch endpoint listens on
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Dispatch header and prefix settings
    #[serde(default)]
    pub dispatch: DispatchSettings,

    /// Request throttling
    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    /// Identities that may own mocks
    #[serde(default)]
    pub owners: Vec<Owner>,

    /// Mocks created at startup
    #[serde(default)]
    pub mocks: Vec<SeedMock>,

    /// Global settings
    #[serde(default)]
    pub settings: GlobalSettings,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            dispatch: DispatchSettings::default(),
            rate_limit: RateLimitSettings::default(),
            owners: Vec::new(),
            mocks: Vec::new(),
            settings: GlobalSettings::default(),
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

impl MockServerConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.dispatch.validate()?;
        self.rate_limit.validate()?;

        let mut ids = HashSet::new();
        let mut usernames = HashSet::new();
        for owner in &self.owners {
            if owner.username.trim().is_empty() {
                anyhow::bail!("Owner {}: username cannot be empty", owner.id);
            }
            if !ids.insert(owner.id) {
                anyhow::bail!("Duplicate owner id: {}", owner.id);
            }
            if !usernames.insert(owner.username.as_str()) {
                anyhow::bail!("Duplicate owner username: {}", owner.username);
            }
            if owner.rate_limit_per_minute == Some(0) {
                anyhow::bail!("Owner {}: rate_limit_per_minute must be positive", owner.username);
            }
        }

        for (i, mock) in self.mocks.iter().enumerate() {
            if !usernames.contains(mock.owner.as_str()) {
                anyhow::bail!("Mock {}: unknown owner '{}'", i, mock.owner);
            }
            mock.draft()
                .into_new_mock(Default::default())
                .map_err(|e| anyhow::anyhow!("Mock {}: {}", i, e))?;
        }
        Ok(())
    }
}

/// Names of the headers and URI prefix recognized by the dispatch endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchSettings {
    /// Prefix stripped from the request URI before lookup
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,

    /// Selects the owner by username, ahead of the ambient identity
    #[serde(default = "default_owner_header")]
    pub owner_header: String,

    #[serde(default = "default_delay_override_header")]
    pub delay_override_header: String,

    #[serde(default = "default_status_override_header")]
    pub status_override_header: String,

    #[serde(default = "default_method_override_header")]
    pub method_override_header: String,

    /// Header carrying the authenticated username, set by a fronting auth layer
    #[serde(default = "default_identity_header")]
    pub identity_header: Option<String>,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            path_prefix: default_path_prefix(),
            owner_header: default_owner_header(),
            delay_override_header: default_delay_override_header(),
            status_override_header: default_status_override_header(),
            method_override_header: default_method_override_header(),
            identity_header: default_identity_header(),
        }
    }
}

impl DispatchSettings {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.path_prefix.is_empty() && !self.path_prefix.starts_with('/') {
            anyhow::bail!("path_prefix must start with '/': {}", self.path_prefix);
        }
        let headers = [
            &self.owner_header,
            &self.delay_override_header,
            &self.status_override_header,
            &self.method_override_header,
        ];
        for name in headers.into_iter().chain(self.identity_header.as_ref()) {
            hyper::header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| anyhow::anyhow!("Invalid header name '{}': {}", name, e))?;
        }
        Ok(())
    }

    /// Strip the dispatch prefix from a request path and normalize it.
    pub fn route_path(&self, uri_path: &str) -> String {
        let prefix = self.path_prefix.trim_end_matches('/');
        let stripped = match uri_path.strip_prefix(prefix) {
            Some(rest) if !prefix.is_empty() && (rest.is_empty() || rest.starts_with('/')) => rest,
            _ => uri_path,
        };
        normalize_path(stripped)
    }
}

fn default_path_prefix() -> String {
    "/mock".to_string()
}

fn default_owner_header() -> String {
    "X-Mock-User".to_string()
}

fn default_delay_override_header() -> String {
    "X-Delay-Override".to_string()
}

fn default_status_override_header() -> String {
    "X-Status-Override".to_string()
}

fn default_method_override_header() -> String {
    "X-HTTP-Method-Override".to_string()
}

fn default_identity_header() -> Option<String> {
    Some("X-Authenticated-User".to_string())
}

/// Request throttling budgets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Budget for callers identified only by address
    #[serde(default = "default_ip_rpm")]
    pub ip_requests_per_minute: u32,

    /// Budget for owners without their own `rate_limit_per_minute`
    #[serde(default = "default_user_rpm")]
    pub default_user_requests_per_minute: u32,

    /// Value of the retry hint on 429 responses
    #[serde(default = "default_retry_after")]
    pub retry_after_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ip_requests_per_minute: default_ip_rpm(),
            default_user_requests_per_minute: default_user_rpm(),
            retry_after_secs: default_retry_after(),
        }
    }
}

impl RateLimitSettings {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.enabled
            && (self.ip_requests_per_minute == 0 || self.default_user_requests_per_minute == 0)
        {
            anyhow::bail!("Rate limits must be positive when rate limiting is enabled");
        }
        Ok(())
    }
}

fn default_ip_rpm() -> u32 {
    60
}

fn default_user_rpm() -> u32 {
    100
}

fn default_retry_after() -> u64 {
    60
}

/// A mock to create at startup on behalf of `owner`.
///
/// Carries the same fields as a create request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedMock {
    /// Owner username
    pub owner: String,
    pub path: String,
    pub method: String,
    pub response_body: String,
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

impl SeedMock {
    /// Create input for the registry.
    pub fn draft(&self) -> MockDraft {
        MockDraft {
            path: Some(self.path.clone()),
            method: Some(self.method.clone()),
            response_body: Some(self.response_body.clone()),
            status_code: self.status_code,
            delay_ms: self.delay_ms,
            request_headers: self.request_headers.clone(),
            query_parameters: self.query_parameters.clone(),
            request_body_pattern: self.request_body_pattern.clone(),
            priority: self.priority,
            active: self.active,
        }
    }
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalSettings {
    /// Log matched mocks
    #[serde(default = "default_true")]
    pub log_matches: bool,

    /// Log calls that matched nothing
    #[serde(default = "default_true")]
    pub log_unmatched: bool,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            log_matches: true,
            log_unmatched: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Configuration printed by `--print-config`.
pub const DEFAULT_CONFIG_YAML: &str = r#"listen: 127.0.0.1:8080
dispatch:
  path_prefix: /mock
  owner_header: X-Mock-User
  delay_override_header: X-Delay-Override
  status_override_header: X-Status-Override
  method_override_header: X-HTTP-Method-Override
  identity_header: X-Authenticated-User
rate_limit:
  enabled: true
  ip_requests_per_minute: 60
  default_user_requests_per_minute: 100
  retry_after_secs: 60
owners:
  - id: 1
    username: demo
    rate_limit_per_minute: 120
mocks:
  - owner: demo
    path: /hello
    method: GET
    response_body: '{"message":"Hello, World!","id":"{{uuid}}"}'
settings:
  log_matches: true
  log_unmatched: true
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OwnerId;
    use std::io::Write;

    #[test]
    fn test_default_config_parses() {
        let config: MockServerConfig = serde_yaml::from_str(DEFAULT_CONFIG_YAML).unwrap();
        config.validate().unwrap();
        assert_eq!(config.owners.len(), 1);
        assert_eq!(config.owners[0].id, OwnerId(1));
        assert_eq!(config.mocks.len(), 1);
        assert_eq!(config.mocks[0].path, "/hello");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: MockServerConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.listen, default_listen());
        assert_eq!(config.dispatch.owner_header, "X-Mock-User");
        assert_eq!(config.rate_limit.ip_requests_per_minute, 60);
        assert_eq!(config.rate_limit.retry_after_secs, 60);
        assert!(config.settings.log_matches);
    }

    #[test]
    fn test_parse_seed_mock_with_rules() {
        let yaml = r#"
owners:
  - id: 7
    username: alice
mocks:
  - owner: alice
    path: /orders
    method: post
    response_body: '{"ok":true}'
    status_code: 201
    delay_ms: 250
    priority: 5
    request_headers: '{"X-Key":"secret"}'
    active: false
"#;
        let config: MockServerConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        let draft = config.mocks[0].draft();
        assert_eq!(draft.status_code, Some(201));
        assert_eq!(draft.delay_ms, Some(250));
        assert_eq!(draft.priority, Some(5));
        assert_eq!(draft.active, Some(false));
        assert_eq!(draft.request_headers.as_deref(), Some(r#"{"X-Key":"secret"}"#));
    }

    #[test]
    fn test_validation_errors() {
        let unknown_owner = r#"
mocks:
  - owner: ghost
    path: /x
    method: GET
    response_body: '{}'
"#;
        let config: MockServerConfig = serde_yaml::from_str(unknown_owner).unwrap();
        assert!(config.validate().is_err());

        let bad_status = r#"
owners:
  - id: 1
    username: a
mocks:
  - owner: a
    path: /x
    method: GET
    response_body: '{}'
    status_code: 700
"#;
        let config: MockServerConfig = serde_yaml::from_str(bad_status).unwrap();
        assert!(config.validate().is_err());

        let duplicate = r#"
owners:
  - id: 1
    username: a
  - id: 1
    username: b
"#;
        let config: MockServerConfig = serde_yaml::from_str(duplicate).unwrap();
        assert!(config.validate().is_err());

        let zero_rate = r#"
rate_limit:
  ip_requests_per_minute: 0
"#;
        let config: MockServerConfig = serde_yaml::from_str(zero_rate).unwrap();
        assert!(config.validate().is_err());

        let bad_header = r#"
dispatch:
  owner_header: "bad header"
"#;
        let config: MockServerConfig = serde_yaml::from_str(bad_header).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        assert!(serde_yaml::from_str::<MockServerConfig>("bogus: 1").is_err());

        let misspelled_seed_key = r#"
owners:
  - id: 1
    username: a
mocks:
  - owner: a
    path: /x
    method: GET
    response_body: '{}'
    priorty: 5
"#;
        let err = serde_yaml::from_str::<MockServerConfig>(misspelled_seed_key).unwrap_err();
        assert!(err.to_string().contains("priorty"));
    }

    #[test]
    fn test_route_path() {
        let dispatch = DispatchSettings::default();
        assert_eq!(dispatch.route_path("/mock/users"), "/users");
        assert_eq!(dispatch.route_path("/mock"), "/");
        assert_eq!(dispatch.route_path("/mock//a//b"), "/a/b");
        assert_eq!(dispatch.route_path("/mockery"), "/mockery");
        assert_eq!(dispatch.route_path("/other"), "/other");

        let bare = DispatchSettings {
            path_prefix: String::new(),
            ..DispatchSettings::default()
        };
        assert_eq!(bare.route_path("/users"), "/users");
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(DEFAULT_CONFIG_YAML.as_bytes()).unwrap();

        let config = MockServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.listen.port(), 8080);

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        bad.write_all(b"listen: [not an address").unwrap();
        assert!(MockServerConfig::from_file(bad.path()).is_err());
    }
}
