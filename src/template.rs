//! Response body templating.
//!
//! Expands `{{...}}` tokens in a single left-to-right pass. Every token is
//! evaluated independently, so `{{uuid}}` twice yields two different ids.
//!
//! # Tokens
//!
//! - `{{random A B}}` - integer drawn uniformly from `[A, B]`
//! - `{{randomString N}}` - `N` random alphanumeric characters
//! - `{{uuid}}` - random v4 UUID
//! - `{{timestamp}}` - current epoch milliseconds
//! - `{{date}}` - current instant, ISO-8601 (`2024-05-01T12:00:00.000Z`)
//! - `{{request.method}}`, `{{request.path}}`, `{{request.query}}`,
//!   `{{request.remoteAddr}}`, `{{request.userAgent}}`, `{{request.contentType}}`
//! - `{{headers.<name>}}` - request header, case-insensitive
//! - `{{query.<name>}}` - first value of a query parameter
//!
//! Anything else, including a request field that is absent, is left as is.
//! Malformed arguments to `random`/`randomString` fail the whole expansion;
//! [`TemplateEngine::expand`] then returns the template untouched.

use crate::error::{MockError, Result};
use crate::matcher::MatchContext;
use chrono::{SecondsFormat, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

/// Upper bound for `{{randomString N}}`.
const MAX_RANDOM_STRING_LEN: usize = 65_536;

static TOKEN_REGEX: OnceLock<Regex> = OnceLock::new();

fn token_regex() -> &'static Regex {
    TOKEN_REGEX.get_or_init(|| {
        Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").expect("token pattern is a valid regex")
    })
}

/// Whether `body` contains something that looks like a token.
pub fn has_tokens(body: &str) -> bool {
    body.find("{{")
        .is_some_and(|start| body[start + 2..].contains("}}"))
}

/// Template engine for dynamic response bodies.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateEngine;

impl TemplateEngine {
    pub fn new() -> Self {
        Self
    }

    /// Expand `template`, or return it unchanged if any token is malformed.
    ///
    /// Library entry point for callers that only want the body. The
    /// dispatcher calls [`TemplateEngine::try_expand`] instead so it can
    /// report the fallback on the response outcome.
    pub fn expand(&self, template: &str, ctx: &MatchContext) -> String {
        match self.try_expand(template, ctx) {
            Ok(expanded) => expanded,
            Err(e) => {
                debug!(error = %e, "Template expansion failed, serving template as is");
                template.to_string()
            }
        }
    }

    /// Expand `template`, surfacing malformed tokens as [`MockError::Template`].
    pub fn try_expand(&self, template: &str, ctx: &MatchContext) -> Result<String> {
        let mut out = String::with_capacity(template.len());
        let mut last = 0;

        for caps in token_regex().captures_iter(template) {
            let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            out.push_str(&template[last..whole.start()]);
            match render_token(inner.as_str(), ctx)? {
                Some(value) => out.push_str(&value),
                None => out.push_str(whole.as_str()),
            }
            last = whole.end();
        }

        out.push_str(&template[last..]);
        Ok(out)
    }
}

/// Render one token. `Ok(None)` leaves it verbatim.
fn render_token(token: &str, ctx: &MatchContext) -> Result<Option<String>> {
    let mut parts = token.split_whitespace();
    let Some(name) = parts.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = parts.collect();

    let value = match (name, args.as_slice()) {
        ("uuid", []) => Some(uuid::Uuid::new_v4().to_string()),
        ("timestamp", []) => Some(Utc::now().timestamp_millis().to_string()),
        ("date", []) => Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        ("random", args) => Some(random_between(args)?.to_string()),
        ("randomString", args) => Some(random_string(args)?),
        (field, []) => lookup_field(field, ctx),
        _ => None,
    };
    Ok(value)
}

fn random_between(args: &[&str]) -> Result<i64> {
    let [min, max] = args else {
        return Err(MockError::Template(format!(
            "random expects 2 arguments, got {}",
            args.len()
        )));
    };
    let min = parse_arg::<i64>("random", min)?;
    let max = parse_arg::<i64>("random", max)?;
    if min > max {
        return Err(MockError::Template(format!(
            "random lower bound {} exceeds upper bound {}",
            min, max
        )));
    }
    Ok(rand::thread_rng().gen_range(min..=max))
}

fn random_string(args: &[&str]) -> Result<String> {
    let [len] = args else {
        return Err(MockError::Template(format!(
            "randomString expects 1 argument, got {}",
            args.len()
        )));
    };
    let len = parse_arg::<usize>("randomString", len)?;
    if len > MAX_RANDOM_STRING_LEN {
        return Err(MockError::Template(format!(
            "randomString length {} exceeds {}",
            len, MAX_RANDOM_STRING_LEN
        )));
    }
    Ok(rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect())
}

fn parse_arg<T: std::str::FromStr>(token: &str, arg: &str) -> Result<T> {
    arg.parse()
        .map_err(|_| MockError::Template(format!("{}: invalid argument '{}'", token, arg)))
}

fn lookup_field(field: &str, ctx: &MatchContext) -> Option<String> {
    let (scope, name) = field.split_once('.')?;
    match (scope, name) {
        ("request", "method") => Some(ctx.method.clone()),
        ("request", "path") => Some(ctx.path.clone()),
        ("request", "query") => Some(ctx.query_string.clone()),
        ("request", "remoteAddr") => ctx.remote_addr.clone(),
        ("request", "userAgent") => ctx.header("user-agent").map(str::to_string),
        ("request", "contentType") => ctx.header("content-type").map(str::to_string),
        ("headers", name) => ctx.header(name).map(str::to_string),
        ("query", name) => ctx.query_param(name).map(str::to_string),
        _ => None,
    }
}
