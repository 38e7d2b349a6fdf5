//! Dynamic mock dispatch.
//!
//! Every inbound call runs through the same steps:
//! resolve owner -> fetch candidates -> match -> rate limit -> apply
//! overrides -> delay -> expand template -> respond. Each step that cannot
//! proceed ends the call with a well-formed JSON response.

use crate::config::{DispatchSettings, GlobalSettings, MockServerConfig, RateLimitSettings};
use crate::error::{MockError, Result};
use crate::identity::{CallerIdentity, Owner, OwnerDirectory, StaticOwnerDirectory};
use crate::matcher::{parse_query_string, select_best, MatchContext, Overrides};
use crate::model::{normalize_method, MockDefinition, MockId};
use crate::ratelimit::{client_address, RateLimitPolicy};
use crate::registry::MockRegistry;
use crate::store::{InMemoryMockStore, MockStore};
use crate::template::{has_tokens, TemplateEngine};
use bytes::Bytes;
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const JSON_CONTENT_TYPE: &str = "application/json";
const UTF8_BOM: char = '\u{feff}';

/// A live call, as seen by the dispatcher.
#[derive(Debug, Clone, Default)]
pub struct DispatchRequest {
    pub method: String,
    /// URI path, including the dispatch prefix
    pub uri_path: String,
    pub query_string: Option<String>,
    /// Lowercased header names; first value wins
    pub headers: HashMap<String, String>,
    pub body: Bytes,
    pub peer: Option<SocketAddr>,
    /// Identity established by the auth layer
    pub identity: CallerIdentity,
}

impl DispatchRequest {
    pub fn new(method: impl Into<String>, uri_path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            uri_path: uri_path.into(),
            ..Self::default()
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers
            .entry(name.to_ascii_lowercase())
            .or_insert_with(|| value.into());
        self
    }

    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query_string = Some(query.into());
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn identity(mut self, identity: CallerIdentity) -> Self {
        self.identity = identity;
        self
    }

    fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

/// How the response body was produced from the stored/expanded body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyOutcome {
    /// Already valid JSON, sent unchanged
    Json,
    /// Parsed after cleanup and re-serialized
    Reserialized,
    /// Not JSON; raw text sent with the JSON content type
    Passthrough,
}

/// Why a call ended the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Served {
        mock: MockId,
        version: u32,
        /// Template expansion failed and the stored body was served
        template_fallback: bool,
        body: BodyOutcome,
    },
    OwnerNotFound,
    NoMock,
    RateLimited,
    StoreUnavailable,
}

/// Response produced for one call.
#[derive(Debug, Clone)]
pub struct DispatchResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub outcome: DispatchOutcome,
}

impl DispatchResponse {
    fn json(status: u16, body: String, outcome: DispatchOutcome) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".to_string(), JSON_CONTENT_TYPE.to_string())],
            body,
            outcome,
        }
    }

    fn error(status: u16, message: &str, outcome: DispatchOutcome) -> Self {
        Self::json(status, json!({ "error": message }).to_string(), outcome)
    }

    fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Counters since startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub requests_total: u64,
    pub requests_matched: u64,
    pub requests_unmatched: u64,
    pub requests_rate_limited: u64,
}

/// Dispatches live calls to the best matching mock.
pub struct Dispatcher {
    registry: MockRegistry,
    owners: Arc<dyn OwnerDirectory>,
    rate_limit: RateLimitPolicy,
    templates: TemplateEngine,
    dispatch: DispatchSettings,
    settings: GlobalSettings,
    requests_total: AtomicU64,
    requests_matched: AtomicU64,
    requests_unmatched: AtomicU64,
    requests_rate_limited: AtomicU64,
}

impl Dispatcher {
    pub fn new(
        registry: MockRegistry,
        owners: Arc<dyn OwnerDirectory>,
        rate_limit: RateLimitSettings,
        dispatch: DispatchSettings,
        settings: GlobalSettings,
    ) -> Self {
        Self {
            registry,
            owners,
            rate_limit: RateLimitPolicy::new(rate_limit),
            templates: TemplateEngine::new(),
            dispatch,
            settings,
            requests_total: AtomicU64::new(0),
            requests_matched: AtomicU64::new(0),
            requests_unmatched: AtomicU64::new(0),
            requests_rate_limited: AtomicU64::new(0),
        }
    }

    /// Build an in-memory dispatcher and create the configured seed mocks.
    pub async fn from_config(config: &MockServerConfig) -> Result<Self> {
        let store: Arc<dyn MockStore> = Arc::new(InMemoryMockStore::new());
        let directory = StaticOwnerDirectory::new(config.owners.iter().cloned());
        let dispatcher = Self::new(
            MockRegistry::new(store),
            Arc::new(directory),
            config.rate_limit.clone(),
            config.dispatch.clone(),
            config.settings.clone(),
        );

        for seed in &config.mocks {
            let owner = dispatcher.owners.find_by_username(&seed.owner).ok_or_else(|| {
                MockError::validation(format!("unknown owner '{}'", seed.owner))
            })?;
            dispatcher.registry.create(owner.id, seed.draft()).await?;
        }

        info!(
            owners = config.owners.len(),
            seeded = config.mocks.len(),
            "Mock dispatcher initialized"
        );
        Ok(dispatcher)
    }

    pub fn registry(&self) -> &MockRegistry {
        &self.registry
    }

    pub fn rate_limits(&self) -> &RateLimitPolicy {
        &self.rate_limit
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_matched: self.requests_matched.load(Ordering::Relaxed),
            requests_unmatched: self.requests_unmatched.load(Ordering::Relaxed),
            requests_rate_limited: self.requests_rate_limited.load(Ordering::Relaxed),
        }
    }

    /// Handle one call end to end.
    pub async fn dispatch(&self, request: DispatchRequest) -> DispatchResponse {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        let overrides = self.parse_overrides(&request);
        let method = overrides
            .method
            .clone()
            .unwrap_or_else(|| normalize_method(&request.method));
        let path = self.dispatch.route_path(&request.uri_path);

        let Some(owner) = self.resolve_owner(&request) else {
            return self.unmatched(
                &method,
                &path,
                DispatchResponse::error(
                    404,
                    "No user found for the given username or authentication",
                    DispatchOutcome::OwnerNotFound,
                ),
            );
        };

        let candidates = match self.registry.list_candidates(owner.id, &path, &method).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(owner = %owner.id, error = %e, "Candidate lookup failed");
                return DispatchResponse::error(
                    500,
                    "Mock store unavailable",
                    DispatchOutcome::StoreUnavailable,
                );
            }
        };
        if candidates.is_empty() {
            return self.unmatched(&method, &path, no_mock_response());
        }

        let ctx = MatchContext {
            owner: owner.id,
            method: method.clone(),
            path: path.clone(),
            query_string: request.query_string.clone().unwrap_or_default(),
            headers: request.headers.clone(),
            query: parse_query_string(request.query_string.as_deref().unwrap_or("")),
            body: request.body.clone(),
            remote_addr: request.peer.map(|p| p.ip().to_string()),
            overrides,
        };

        let Some(mock) = select_best(&candidates, &ctx) else {
            return self.unmatched(&method, &path, no_mock_response());
        };

        if !self.check_rate_limit(&request) {
            self.requests_rate_limited.fetch_add(1, Ordering::Relaxed);
            return self.rate_limited_response();
        }

        self.requests_matched.fetch_add(1, Ordering::Relaxed);
        if self.settings.log_matches {
            info!(
                owner = %owner.id,
                mock_id = %mock.id,
                version = mock.version,
                method = %method,
                path = %path,
                "Request matched mock"
            );
        }

        self.respond(mock, &ctx).await
    }

    /// Owner header first, then the ambient identity.
    fn resolve_owner(&self, request: &DispatchRequest) -> Option<Owner> {
        if let Some(username) = request.header_value(&self.dispatch.owner_header) {
            return self.owners.find_by_username(username);
        }
        request
            .identity
            .username()
            .and_then(|username| self.owners.find_by_username(username))
    }

    /// Charge the ambient owner's bucket, falling back to the client address.
    fn check_rate_limit(&self, request: &DispatchRequest) -> bool {
        let ambient = request
            .identity
            .username()
            .and_then(|username| self.owners.find_by_username(username));
        let client = client_address(request.header_value("x-forwarded-for"), request.peer);
        self.rate_limit.check(ambient.as_ref(), &client)
    }

    fn parse_overrides(&self, request: &DispatchRequest) -> Overrides {
        let delay_ms = request
            .header_value(&self.dispatch.delay_override_header)
            .and_then(|raw| match raw.parse::<u64>() {
                Ok(delay) => Some(delay),
                Err(_) => {
                    warn!(value = %raw, "Ignoring invalid delay override");
                    None
                }
            });

        let status = request
            .header_value(&self.dispatch.status_override_header)
            .and_then(|raw| match raw.parse::<u16>() {
                Ok(status) if (100..=599).contains(&status) => Some(status),
                _ => {
                    warn!(value = %raw, "Ignoring invalid status override");
                    None
                }
            });

        let method = request
            .header_value(&self.dispatch.method_override_header)
            .map(normalize_method);

        Overrides {
            delay_ms,
            status,
            method,
        }
    }

    async fn respond(&self, mock: &MockDefinition, ctx: &MatchContext) -> DispatchResponse {
        let status = ctx.overrides.status.unwrap_or(mock.status_code);
        let delay_ms = ctx.overrides.delay_ms.unwrap_or(mock.delay_ms);

        if delay_ms > 0 {
            debug!(mock_id = %mock.id, delay_ms, "Applying delay");
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        let (body, template_fallback) = self.render_body(&mock.response_body, ctx);
        let (body, body_outcome) = finalize_json(body);

        DispatchResponse::json(
            status,
            body,
            DispatchOutcome::Served {
                mock: mock.id,
                version: mock.version,
                template_fallback,
                body: body_outcome,
            },
        )
        .with_header("X-Mock-Id", mock.id.to_string())
        .with_header("X-Mock-Version", mock.version.to_string())
    }

    /// Expand tokens, or fall back to the stored body when expansion fails.
    fn render_body(&self, stored: &str, ctx: &MatchContext) -> (String, bool) {
        if !has_tokens(stored) {
            return (stored.to_string(), false);
        }
        match self.templates.try_expand(stored, ctx) {
            Ok(expanded) => (expanded, false),
            Err(e) => {
                debug!(error = %e, "Template expansion failed, serving stored body");
                (stored.to_string(), true)
            }
        }
    }

    fn rate_limited_response(&self) -> DispatchResponse {
        let retry_after = self.rate_limit.settings().retry_after_secs;
        let body = json!({
            "error": "Rate limit exceeded",
            "message": "Too many requests. Please try again later.",
            "retryAfter": retry_after,
        });
        DispatchResponse::json(429, body.to_string(), DispatchOutcome::RateLimited)
            .with_header("Retry-After", retry_after.to_string())
    }

    fn unmatched(&self, method: &str, path: &str, response: DispatchResponse) -> DispatchResponse {
        self.requests_unmatched.fetch_add(1, Ordering::Relaxed);
        if self.settings.log_unmatched {
            warn!(
                method = %method,
                path = %path,
                outcome = ?response.outcome,
                "No matching mock found"
            );
        }
        response
    }
}

fn no_mock_response() -> DispatchResponse {
    DispatchResponse::error(
        404,
        "No mock configured for this route",
        DispatchOutcome::NoMock,
    )
}

/// Make sure the body is JSON text where possible.
///
/// Valid JSON is sent unchanged. Otherwise a leading byte-order mark is
/// dropped and the rest parsed and re-serialized. If that fails too, the raw
/// text is sent as is.
pub fn finalize_json(body: String) -> (String, BodyOutcome) {
    if serde_json::from_str::<serde::de::IgnoredAny>(&body).is_ok() {
        return (body, BodyOutcome::Json);
    }

    let cleaned = body.trim_start_matches(UTF8_BOM);
    match serde_json::from_str::<serde_json::Value>(cleaned) {
        Ok(value) => (value.to_string(), BodyOutcome::Reserialized),
        Err(_) => {
            debug!("Response body is not JSON, passing it through");
            (body, BodyOutcome::Passthrough)
        }
    }
}
