//! Request handling and transformation.
//!
//! # Responsibilities
//! - Assign a request ID (UUID v4) or keep a well-formed inbound one
//! - Expose the ID to handlers and echo it on the response
//! - Buffer the inbound request into an [`IncomingRequest`]
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - The ID stays in the request headers, so it reaches the origin

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Request, Response};
use tower::{Layer, Service};
use uuid::Uuid;

use crate::error::{ProxyError, ProxyResult};
use crate::idempotency::IncomingRequest;

/// Header carrying the request ID.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Longest inbound request ID that is kept.
const MAX_REQUEST_ID_LEN: usize = 128;

/// Request ID stored in request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// Access to the request ID set by [`RequestIdLayer`].
pub trait RequestIdExt {
    fn request_id(&self) -> Option<&str>;
}

impl<B> RequestIdExt for Request<B> {
    fn request_id(&self) -> Option<&str> {
        self.extensions().get::<RequestId>().map(|id| id.0.as_str())
    }
}

/// Layer that tags every request and response with an `x-request-id`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestIdLayer;

impl<S> Layer<S> for RequestIdLayer {
    type Service = RequestIdService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestIdService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct RequestIdService<S> {
    inner: S,
}

impl<S, B, ResBody> Service<Request<B>> for RequestIdService<S>
where
    S: Service<Request<B>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        let header = HeaderName::from_static(X_REQUEST_ID);
        let value = req
            .headers()
            .get(&header)
            .filter(|v| !v.is_empty() && v.len() <= MAX_REQUEST_ID_LEN && v.to_str().is_ok())
            .cloned()
            .unwrap_or_else(|| {
                HeaderValue::from_str(&Uuid::new_v4().to_string())
                    .unwrap_or_else(|_| HeaderValue::from_static("unknown"))
            });

        let id = value.to_str().unwrap_or("unknown").to_string();
        req.headers_mut().insert(header.clone(), value.clone());
        req.extensions_mut().insert(RequestId(id));

        let future = self.inner.call(req);
        Box::pin(async move {
            let mut response = future.await?;
            response.headers_mut().insert(header, value);
            Ok(response)
        })
    }
}

/// Buffer an axum request into the orchestrator's input.
///
/// Bodies over `max_body_bytes` are rejected as invalid.
pub async fn buffer_request(
    request: Request<Body>,
    key_header: &HeaderName,
    max_body_bytes: usize,
) -> ProxyResult<IncomingRequest> {
    let (parts, body) = request.into_parts();

    let idempotency_key = match parts.headers.get(key_header) {
        Some(value) => Some(
            value
                .to_str()
                .map_err(|_| {
                    ProxyError::InvalidRequest("idempotency key must be visible ASCII".to_string())
                })?
                .to_string(),
        ),
        None => None,
    };

    let body = axum::body::to_bytes(body, max_body_bytes)
        .await
        .map_err(|e| ProxyError::InvalidRequest(format!("unreadable request body: {}", e)))?;

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    Ok(IncomingRequest {
        method: parts.method,
        path_and_query,
        headers: parts.headers,
        idempotency_key,
        body,
    })
}
