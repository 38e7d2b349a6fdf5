//! HTTP front end.
//!
//! Accepts HTTP/1 connections, turns each request into a
//! [`DispatchRequest`] and writes back the dispatcher's response.

use crate::dispatcher::{DispatchRequest, DispatchResponse, Dispatcher};
use crate::identity::CallerIdentity;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Serves the dispatcher over HTTP.
pub struct MockServer {
    dispatcher: Arc<Dispatcher>,
    identity_header: Option<String>,
}

impl MockServer {
    /// `identity_header` names the header an upstream auth layer uses to
    /// pass the authenticated username; `None` treats every caller as
    /// anonymous.
    pub fn new(dispatcher: Arc<Dispatcher>, identity_header: Option<String>) -> Self {
        Self {
            dispatcher,
            identity_header,
        }
    }

    /// Serve connections from `listener` until `shutdown` resolves.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> anyhow::Result<()> {
        info!(addr = %listener.local_addr()?, "Mock server listening");
        let handler = Arc::new(self);
        tokio::pin!(shutdown);

        loop {
            let (stream, peer) = tokio::select! {
                accepted = listener.accept() => accepted?,
                _ = &mut shutdown => {
                    info!("Mock server shutting down");
                    return Ok(());
                }
            };
            let io = TokioIo::new(stream);
            let handler = Arc::clone(&handler);

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let handler = Arc::clone(&handler);
                    async move { handler.handle(req, peer).await }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    debug!(peer = %peer, error = %e, "Connection error");
                }
            });
        }
    }

    async fn handle(
        &self,
        req: Request<Incoming>,
        peer: SocketAddr,
    ) -> Result<Response<Full<Bytes>>, Infallible> {
        let (parts, body) = req.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!(peer = %peer, error = %e, "Failed to read request body");
                return Ok(build_response(
                    StatusCode::BAD_REQUEST,
                    [("Content-Type", "application/json")],
                    r#"{"error":"Failed to read request body"}"#,
                ));
            }
        };

        let mut request = DispatchRequest::new(parts.method.as_str(), parts.uri.path()).body(body);
        if let Some(query) = parts.uri.query() {
            request = request.query(query);
        }
        for (name, value) in &parts.headers {
            if let Ok(value) = value.to_str() {
                request = request.header(name.as_str(), value);
            }
        }
        request = request.peer(peer);
        request.identity = self.caller_identity(&request);

        let response = self.dispatcher.dispatch(request).await;
        Ok(into_http_response(response))
    }

    fn caller_identity(&self, request: &DispatchRequest) -> CallerIdentity {
        self.identity_header
            .as_deref()
            .and_then(|name| request.headers.get(&name.to_ascii_lowercase()))
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(|value| CallerIdentity::User(value.to_string()))
            .unwrap_or_default()
    }
}

fn into_http_response(response: DispatchResponse) -> Response<Full<Bytes>> {
    let status = StatusCode::from_u16(response.status).unwrap_or_else(|_| {
        warn!(status = response.status, "Invalid response status, using 500");
        StatusCode::INTERNAL_SERVER_ERROR
    });
    build_response(status, response.headers, response.body)
}

fn build_response(
    status: StatusCode,
    headers: impl IntoIterator<Item = (impl AsRef<str>, impl AsRef<str>)>,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut builder = Response::builder().status(status);
    for (key, value) in headers {
        builder = builder.header(key.as_ref(), value.as_ref());
    }
    builder.body(Full::new(body.into())).unwrap_or_else(|_| {
        let mut fallback = Response::new(Full::new(Bytes::from_static(
            br#"{"error":"Internal Server Error"}"#,
        )));
        *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        fallback
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::DispatchOutcome;

    #[test]
    fn test_into_http_response_copies_headers() {
        let response = DispatchResponse {
            status: 429,
            headers: vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                ("Retry-After".to_string(), "60".to_string()),
            ],
            body: "{}".to_string(),
            outcome: DispatchOutcome::RateLimited,
        };

        let http = into_http_response(response);
        assert_eq!(http.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(http.headers()["retry-after"], "60");
        assert_eq!(http.headers()["content-type"], "application/json");
    }

    #[test]
    fn test_invalid_status_becomes_500() {
        let response = DispatchResponse {
            status: 1000,
            headers: vec![],
            body: "{}".to_string(),
            outcome: DispatchOutcome::NoMock,
        };
        assert_eq!(
            into_http_response(response).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
