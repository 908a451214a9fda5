//! Header hygiene between caller, proxy and origin.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers (RFC 9110 §7.6.1), including any named in `Connection`
//! - Drop inbound headers the proxy owns before forwarding (signing, auth, host)
//!
//! # Design Decisions
//! - Callers cannot smuggle signature headers to the origin
//! - Cached responses never carry connection-scoped headers

use axum::http::header::{self, HeaderMap, HeaderName};

use crate::signing::envelope::{SIGNATURE_HEADER, SIGNER_HEADER, TIMESTAMP_HEADER};

/// Hop-by-hop headers that never cross the proxy.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Remove hop-by-hop headers in place.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
    headers.remove("proxy-connection");
}

/// Inbound headers prepared for the origin.
///
/// `host` and `content-length` are recomputed by the client; signature
/// headers are set by the proxy after this runs.
pub fn forwardable_request_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = inbound.clone();
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);
    headers.remove(SIGNER_HEADER);
    headers.remove(TIMESTAMP_HEADER);
    headers.remove(SIGNATURE_HEADER);
    headers
}

/// Origin response headers as they are cached and replayed.
pub fn cacheable_response_headers(origin: &HeaderMap) -> HeaderMap {
    let mut headers = origin.clone();
    strip_hop_by_hop(&mut headers);
    headers.remove(header::CONTENT_LENGTH);
    headers
}
