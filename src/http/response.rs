//! Response construction.
//!
//! # Responsibilities
//! - Render a [`Replay`] with its stored status, headers and body
//! - Mark replays with `idempotency-replayed: true`
//! - Render [`ProxyError`] as a JSON error body with a stable code

use axum::body::Body;
use axum::http::{header, HeaderValue, Response, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::error::ProxyError;
use crate::idempotency::Replay;

/// Set on responses served from a stored entry.
pub const REPLAYED_HEADER: &str = "idempotency-replayed";

impl IntoResponse for Replay {
    fn into_response(self) -> axum::response::Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        if self.replayed {
            response
                .headers_mut()
                .insert(REPLAYED_HEADER, HeaderValue::from_static("true"));
        }
        response
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    retryable: bool,
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::IdempotencyConflict => StatusCode::CONFLICT,
            ProxyError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ProxyError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            ProxyError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let retryable = self.is_retryable();
        let body = ErrorBody {
            error: self.code(),
            message: self.to_string(),
            retryable,
        };

        let mut response = (status, Json(body)).into_response();
        if retryable {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}
