//! Origin client.
//!
//! # Responsibilities
//! - Define the [`Origin`] seam the orchestrator forwards through
//! - Forward signed requests to the HTTP origin and buffer the full response
//!
//! The per-call deadline is applied by the caller, not here, so a timeout is
//! reported the same way for every origin implementation.

use std::future::Future;
use std::time::Duration;

use axum::http::{HeaderMap, Method, Request, StatusCode, Uri};
use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;
use url::Url;

/// Errors talking to the origin.
#[derive(Debug, Error)]
pub enum OriginError {
    #[error("invalid origin uri: {0}")]
    InvalidUri(String),

    #[error("origin request failed: {0}")]
    Request(String),

    #[error("origin response body failed: {0}")]
    Body(String),
}

/// A fully buffered request bound for the origin.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    /// Normalized path plus query, starting with `/`.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// A fully buffered origin response.
#[derive(Debug, Clone)]
pub struct OriginResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Something that answers outbound requests.
pub trait Origin: Send + Sync + Clone + 'static {
    fn send(
        &self,
        request: OutboundRequest,
    ) -> impl Future<Output = Result<OriginResponse, OriginError>> + Send;
}

/// Plain HTTP origin reached through the hyper-util pooled client.
#[derive(Clone)]
pub struct HttpOrigin {
    client: Client<HttpConnector, Full<Bytes>>,
    base_url: Url,
    max_response_bytes: usize,
}

impl HttpOrigin {
    pub fn new(base_url: Url, connect_timeout: Duration, max_response_bytes: usize) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            client,
            base_url,
            max_response_bytes,
        }
    }

    /// Join the base URL (which may carry a path prefix) with a request path.
    fn target_uri(&self, path_and_query: &str) -> Result<Uri, OriginError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{}{}", base, path_and_query)
            .parse::<Uri>()
            .map_err(|e| OriginError::InvalidUri(e.to_string()))
    }
}

impl Origin for HttpOrigin {
    async fn send(&self, request: OutboundRequest) -> Result<OriginResponse, OriginError> {
        let uri = self.target_uri(&request.path_and_query)?;

        let mut builder = Request::builder().method(request.method).uri(uri);
        if let Some(headers) = builder.headers_mut() {
            headers.extend(request.headers);
        }
        let outbound = builder
            .body(Full::new(request.body))
            .map_err(|e| OriginError::Request(e.to_string()))?;

        let response = self
            .client
            .request(outbound)
            .await
            .map_err(|e| OriginError::Request(e.to_string()))?;

        let (parts, body) = response.into_parts();
        let body = Limited::new(body, self.max_response_bytes)
            .collect()
            .await
            .map_err(|e| OriginError::Body(e.to_string()))?
            .to_bytes();

        Ok(OriginResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }
}
