//! Proxy-token middleware.
//! Rejects inbound requests without a token from a trusted agent.

use std::sync::Arc;

use alloy::primitives::Address;
use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::clock::unix_secs;
use crate::config::schema::AuthConfig;
use crate::error::ProxyError;
use crate::signing::verify_token;

/// Which agents may use the proxy. Swapped on config reload.
#[derive(Debug, Clone, Default)]
pub struct AuthPolicy {
    pub enabled: bool,
    pub trusted_agents: Vec<Address>,
}

impl AuthPolicy {
    /// Addresses that fail to parse are skipped; validation rejects them earlier.
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            enabled: config.enabled,
            trusted_agents: config
                .trusted_agents
                .iter()
                .filter_map(|agent| agent.parse().ok())
                .collect(),
        }
    }
}

/// Agent name attached to authenticated requests.
#[derive(Clone, Debug)]
pub struct AgentContext {
    pub agent: String,
    pub expire_at: u64,
}

pub async fn proxy_token_middleware(
    State(policy): State<Arc<ArcSwap<AuthPolicy>>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let policy = policy.load_full();
    if !policy.enabled {
        return next.run(req).await;
    }

    let token = match req
        .headers()
        .get(header::PROXY_AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        Some(token) => token,
        None => {
            return ProxyError::Unauthorized("missing proxy token".to_string()).into_response();
        }
    };

    match verify_token(&policy.trusted_agents, token, unix_secs()) {
        Ok(token) => {
            tracing::debug!(agent = %token.agent(), "Proxy token accepted");
            req.extensions_mut().insert(AgentContext {
                agent: token.agent().to_string(),
                expire_at: token.expire_at(),
            });
            next.run(req).await
        }
        Err(e) => {
            tracing::warn!(error = %e, "Proxy token rejected");
            ProxyError::Unauthorized(e.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, middleware, routing::get, Router};
    use tower::ServiceExt;

    use crate::signing::issue_token;
    use crate::signing::signer::tests::{OTHER_PRIVATE_KEY, TEST_PRIVATE_KEY};
    use crate::signing::RequestSigner;

    async fn whoami(req: Request<Body>) -> String {
        req.extensions()
            .get::<AgentContext>()
            .map(|a| a.agent.clone())
            .unwrap_or_default()
    }

    fn app(policy: AuthPolicy) -> Router {
        let policy = Arc::new(ArcSwap::from_pointee(policy));
        Router::new()
            .route("/", get(whoami))
            .layer(middleware::from_fn_with_state(policy, proxy_token_middleware))
    }

    fn trusted() -> AuthPolicy {
        AuthPolicy {
            enabled: true,
            trusted_agents: vec![RequestSigner::from_private_key(TEST_PRIVATE_KEY).unwrap().address()],
        }
    }

    fn request(token: Option<String>) -> Request<Body> {
        let mut builder = Request::builder().uri("/");
        if let Some(token) = token {
            builder = builder.header(header::PROXY_AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_disabled_policy_lets_everything_through() {
        let response = app(AuthPolicy::default()).oneshot(request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_token_is_rejected() {
        let response = app(trusted()).oneshot(request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_trusted_token_attaches_agent() {
        let signer = RequestSigner::from_private_key(TEST_PRIVATE_KEY).unwrap();
        let token = issue_token(&signer, unix_secs() + 60, "billing").unwrap();

        let response = app(trusted()).oneshot(request(Some(token))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(body.as_ref(), b"billing");
    }

    #[tokio::test]
    async fn test_untrusted_token_is_rejected() {
        let signer = RequestSigner::from_private_key(OTHER_PRIVATE_KEY).unwrap();
        let token = issue_token(&signer, unix_secs() + 60, "intruder").unwrap();

        let response = app(trusted()).oneshot(request(Some(token))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_policy_skips_unparseable_agents() {
        let config = AuthConfig {
            enabled: true,
            trusted_agents: vec![
                "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266".to_string(),
                "not-an-address".to_string(),
            ],
        };
        assert_eq!(AuthPolicy::from_config(&config).trusted_agents.len(), 1);
    }
}
