//! Idempotency orchestrator.
//!
//! # Flow
//! ```text
//! request ─▶ fingerprint ─▶ store lookup ──hit──▶ replay (or conflict)
//!                               │ miss
//!                               ▼
//!                         single-flight join
//!                     leader │          │ follower
//!                            ▼          ▼
//!            re-read store, sign,     wait for the leader's outcome
//!            forward, persist
//! ```
//!
//! # Design Decisions
//! - The leader's work runs on a spawned task, so a caller that goes away
//!   does not cancel an origin call other callers are waiting on
//! - Only definitive origin responses are persisted; everything else is
//!   reported as retryable and leaves no trace
//! - `put_if_absent` decides between contexts; a leader that loses the race
//!   replays the winner's entry instead of its own response

use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::http::{HeaderMap, Method, StatusCode};
use bytes::Bytes;

use crate::clock::unix_ms;
use crate::error::{ProxyError, ProxyResult};
use crate::idempotency::coordinator::{
    FlightOutcome, FlightResult, Join, Resolution, SingleFlight,
};
use crate::idempotency::entry::CacheEntry;
use crate::idempotency::fingerprint::{
    fingerprint, normalize_path, Fingerprint, IdempotencyKey, RequestClass,
};
use crate::idempotency::policy::OrchestratorPolicy;
use crate::observability::metrics;
use crate::origin::{Origin, OriginResponse, OutboundRequest};
use crate::security::headers::{cacheable_response_headers, forwardable_request_headers};
use crate::signing::envelope::outbound_payload;
use crate::store::{CacheStore, KvStore, PutOutcome};

/// Times a request may try to lead after earlier leaders vanished.
pub const MAX_LEADERSHIP_ATTEMPTS: u32 = 3;

/// A buffered inbound request.
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    pub method: Method,
    pub path_and_query: String,
    pub headers: HeaderMap,
    /// Raw value of the idempotency key header, if present.
    pub idempotency_key: Option<String>,
    pub body: Bytes,
}

/// The response handed back to the caller.
#[derive(Debug, Clone)]
pub struct Replay {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Served from an entry an earlier operation stored.
    pub replayed: bool,
}

impl Replay {
    fn from_entry(entry: &CacheEntry, replayed: bool) -> Self {
        Self {
            status: entry.status_code(),
            headers: entry.header_map(),
            body: entry.body.clone(),
            replayed,
        }
    }

    fn passthrough(response: OriginResponse) -> Self {
        Self {
            status: response.status,
            headers: cacheable_response_headers(&response.headers),
            body: response.body,
            replayed: false,
        }
    }
}

/// A keyed request after fingerprinting, shared with the leader task.
struct PreparedRequest {
    method: Method,
    path: String,
    key: IdempotencyKey,
    headers: HeaderMap,
    body: Bytes,
    fingerprint: Fingerprint,
}

/// Runs the idempotency state machine for one proxy instance.
pub struct Orchestrator<S, O> {
    store: CacheStore<S>,
    flights: SingleFlight,
    origin: O,
    policy: Arc<ArcSwap<OrchestratorPolicy>>,
}

impl<S: Clone, O: Clone> Clone for Orchestrator<S, O> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            flights: self.flights.clone(),
            origin: self.origin.clone(),
            policy: self.policy.clone(),
        }
    }
}

impl<S: KvStore, O: Origin> Orchestrator<S, O> {
    pub fn new(kv: S, origin: O, policy: OrchestratorPolicy) -> Self {
        Self {
            store: CacheStore::new(kv),
            flights: SingleFlight::new(),
            origin,
            policy: Arc::new(ArcSwap::from_pointee(policy)),
        }
    }

    pub fn store(&self) -> &CacheStore<S> {
        &self.store
    }

    pub fn policy(&self) -> Arc<OrchestratorPolicy> {
        self.policy.load_full()
    }

    /// Replace the policy. Requests already past lookup keep the old one.
    pub fn update_policy(&self, policy: OrchestratorPolicy) {
        tracing::info!(signer = %policy.signer.address(), "Orchestrator policy updated");
        self.policy.store(Arc::new(policy));
    }

    /// Flights currently in progress in this instance.
    pub fn in_flight(&self) -> usize {
        self.flights.in_flight()
    }

    /// Handle one inbound request end to end.
    pub async fn handle(&self, request: IncomingRequest) -> ProxyResult<Replay> {
        let policy = self.policy.load_full();
        let class = RequestClass::from_method(&request.method);
        let key = IdempotencyKey::from_request(
            class,
            request.idempotency_key.as_deref(),
            policy.require_key_for_safe_methods,
        )?;

        let Some(key) = key else {
            return self.pass_through(request, &policy).await;
        };

        let path = normalize_path(&request.path_and_query);
        let fingerprint = fingerprint(&request.method, &path, &key, &request.body);
        let prepared = Arc::new(PreparedRequest {
            method: request.method,
            path,
            key,
            headers: request.headers,
            body: request.body,
            fingerprint,
        });

        for attempt in 1..=MAX_LEADERSHIP_ATTEMPTS {
            if let Some(replay) = self.lookup(&fingerprint, &policy).await? {
                return Ok(replay);
            }

            let handle = match self.flights.join(fingerprint.entry_key()) {
                Join::Leader(guard, handle) => {
                    metrics::record_flight("leader");
                    tracing::debug!(entry_key = %fingerprint.entry_key(), attempt, role = "leader", "Joined flight");

                    let this = self.clone();
                    let prepared = prepared.clone();
                    let policy = policy.clone();
                    tokio::spawn(async move {
                        let outcome = this.lead(&prepared, &policy).await;
                        guard.complete(outcome);
                    });
                    handle
                }
                Join::Follower(handle) => {
                    metrics::record_flight("follower");
                    tracing::debug!(entry_key = %fingerprint.entry_key(), attempt, role = "follower", "Joined flight");
                    handle
                }
            };

            match handle.wait().await {
                FlightResult::Completed(outcome) => return settle(outcome, &fingerprint),
                FlightResult::LeaderAborted => {
                    tracing::warn!(
                        entry_key = %fingerprint.entry_key(),
                        attempt,
                        "Flight leader aborted, re-attempting"
                    );
                }
            }
        }

        Err(ProxyError::UpstreamUnavailable(format!(
            "flight leader aborted {} times",
            MAX_LEADERSHIP_ATTEMPTS
        )))
    }

    async fn lookup(
        &self,
        fingerprint: &Fingerprint,
        policy: &OrchestratorPolicy,
    ) -> ProxyResult<Option<Replay>> {
        let key = fingerprint.entry_key();
        let Some(entry) = self.store.get(key).await? else {
            metrics::record_cache_lookup("miss");
            return Ok(None);
        };

        if !entry.matches(fingerprint) {
            metrics::record_cache_lookup("conflict");
            tracing::info!(entry_key = %key, "Idempotency key reused with a different payload");
            return Err(ProxyError::IdempotencyConflict);
        }

        metrics::record_cache_lookup("hit");
        if policy.refresh_on_replay {
            if let Err(e) = self.store.refresh(key, policy.entry_ttl).await {
                tracing::warn!(entry_key = %key, error = %e, "Failed to refresh replayed entry");
            }
        }
        Ok(Some(Replay::from_entry(&entry, true)))
    }

    /// Leader work: re-check, forward, persist.
    async fn lead(&self, request: &PreparedRequest, policy: &OrchestratorPolicy) -> FlightOutcome {
        let key = request.fingerprint.entry_key();

        // Another context may have finished between our lookup and join.
        if let Some(entry) = self.store.get(key).await? {
            return Ok(Resolution {
                entry,
                fresh: false,
            });
        }

        let response = self
            .forward(
                &request.method,
                &request.path,
                Some(&request.key),
                &request.headers,
                &request.body,
                policy,
            )
            .await?;
        classify(response.status, policy)?;

        let now = unix_ms();
        let expires_at = now.saturating_add(policy.entry_ttl.as_millis() as u64);
        let entry = CacheEntry::new(
            &request.fingerprint,
            response.status,
            &cacheable_response_headers(&response.headers),
            response.body,
            now,
            expires_at,
        );

        match self.store.put_if_absent(key, entry).await? {
            PutOutcome::Stored(entry) => {
                tracing::info!(entry_key = %key, status = entry.status, "Stored origin result");
                Ok(Resolution { entry, fresh: true })
            }
            PutOutcome::AlreadyExists(entry) => {
                tracing::info!(entry_key = %key, "Lost persist race, replaying stored result");
                Ok(Resolution {
                    entry,
                    fresh: false,
                })
            }
        }
    }

    /// Keyless safe request: sign and forward, never cache.
    async fn pass_through(
        &self,
        request: IncomingRequest,
        policy: &OrchestratorPolicy,
    ) -> ProxyResult<Replay> {
        let path = normalize_path(&request.path_and_query);
        let response = self
            .forward(&request.method, &path, None, &request.headers, &request.body, policy)
            .await?;
        Ok(Replay::passthrough(response))
    }

    async fn forward(
        &self,
        method: &Method,
        path: &str,
        key: Option<&IdempotencyKey>,
        headers: &HeaderMap,
        body: &Bytes,
        policy: &OrchestratorPolicy,
    ) -> ProxyResult<OriginResponse> {
        let payload = outbound_payload(method, path, key.map(IdempotencyKey::as_str), body)
            .map_err(|e| ProxyError::UpstreamUnavailable(format!("signing failed: {}", e)))?;
        let envelope = policy
            .signer
            .sign(payload)
            .map_err(|e| ProxyError::UpstreamUnavailable(format!("signing failed: {}", e)))?;

        let mut headers = forwardable_request_headers(headers);
        envelope
            .apply_headers(&mut headers)
            .map_err(|e| ProxyError::UpstreamUnavailable(format!("signing failed: {}", e)))?;

        let outbound = OutboundRequest {
            method: method.clone(),
            path_and_query: path.to_string(),
            headers,
            body: body.clone(),
        };

        let timeout = policy.origin_timeout;
        match tokio::time::timeout(timeout, self.origin.send(outbound)).await {
            Ok(Ok(response)) => {
                metrics::record_origin_call(response.status.as_u16().to_string());
                tracing::debug!(status = %response.status, path = %path, "Origin responded");
                Ok(response)
            }
            Ok(Err(e)) => {
                metrics::record_origin_call("error".to_string());
                tracing::warn!(error = %e, path = %path, "Origin call failed");
                Err(e.into())
            }
            Err(_) => {
                metrics::record_origin_call("timeout".to_string());
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, path = %path, "Origin call timed out");
                Err(ProxyError::UpstreamTimeout(timeout.as_millis() as u64))
            }
        }
    }
}

/// Decide whether an origin status may be persisted.
fn classify(status: StatusCode, policy: &OrchestratorPolicy) -> ProxyResult<()> {
    if policy.definitive.contains(status) {
        return Ok(());
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ProxyError::Unauthorized(format!(
            "origin rejected the proxy with {}",
            status
        ))),
        _ => Err(ProxyError::UpstreamUnavailable(format!(
            "origin answered non-final status {}",
            status
        ))),
    }
}

/// Turn a flight outcome into this caller's reply.
fn settle(outcome: FlightOutcome, fingerprint: &Fingerprint) -> ProxyResult<Replay> {
    let resolution = outcome?;
    if !resolution.entry.matches(fingerprint) {
        return Err(ProxyError::IdempotencyConflict);
    }
    Ok(Replay::from_entry(&resolution.entry, !resolution.fresh))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::origin::testing::{response, ScriptedOrigin};
    use crate::origin::OriginError;
    use crate::signing::signer::tests::TEST_PRIVATE_KEY;
    use crate::signing::{RequestSigner, Verifier};
    use crate::store::{KvPut, KvSwap, MemoryKv, StoreError, StoreResult, Versioned};
    use crate::idempotency::fingerprint::EntryKey;

    fn signer() -> RequestSigner {
        RequestSigner::from_private_key(TEST_PRIVATE_KEY).unwrap()
    }

    fn policy() -> OrchestratorPolicy {
        OrchestratorPolicy::new(signer()).with_origin_timeout(Duration::from_secs(2))
    }

    fn post(key: Option<&str>, body: &'static str) -> IncomingRequest {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "application/json".parse().unwrap());
        if let Some(key) = key {
            headers.insert("idempotency-key", key.parse().unwrap());
        }
        IncomingRequest {
            method: Method::POST,
            path_and_query: "/payments".to_string(),
            headers,
            idempotency_key: key.map(str::to_string),
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    fn get(path: &str) -> IncomingRequest {
        IncomingRequest {
            method: Method::GET,
            path_and_query: path.to_string(),
            headers: HeaderMap::new(),
            idempotency_key: None,
            body: Bytes::new(),
        }
    }

    #[tokio::test]
    async fn test_payment_scenario() {
        let origin = ScriptedOrigin::fixed(201, r#"{"id":"x1"}"#);
        let orchestrator = Orchestrator::new(MemoryKv::new(), origin.clone(), policy());

        let first = orchestrator.handle(post(Some("abc"), r#"{"amount":10}"#)).await.unwrap();
        assert_eq!(first.status, StatusCode::CREATED);
        assert_eq!(first.body, Bytes::from_static(br#"{"id":"x1"}"#));
        assert!(!first.replayed);
        assert_eq!(origin.calls(), 1);

        let replay = orchestrator.handle(post(Some("abc"), r#"{"amount":10}"#)).await.unwrap();
        assert_eq!(replay.status, StatusCode::CREATED);
        assert_eq!(replay.body, first.body);
        assert_eq!(replay.headers.get("content-type").unwrap(), "application/json");
        assert!(replay.replayed);
        assert_eq!(origin.calls(), 1);

        let conflict = orchestrator.handle(post(Some("abc"), r#"{"amount":20}"#)).await;
        assert_eq!(conflict.unwrap_err(), ProxyError::IdempotencyConflict);

        let missing = orchestrator.handle(post(None, r#"{"amount":10}"#)).await;
        assert!(matches!(missing, Err(ProxyError::InvalidRequest(_))));
        assert_eq!(origin.calls(), 1);
    }

    #[tokio::test]
    async fn test_key_reused_on_other_endpoint_is_conflict() {
        let origin = ScriptedOrigin::fixed(201, r#"{"id":"x1"}"#);
        let kv = MemoryKv::new();
        let orchestrator = Orchestrator::new(kv.clone(), origin.clone(), policy());

        orchestrator.handle(post(Some("abc"), r#"{"amount":10}"#)).await.unwrap();

        let mut refund = post(Some("abc"), r#"{"amount":10}"#);
        refund.path_and_query = "/refunds".to_string();
        let err = orchestrator.handle(refund).await.unwrap_err();
        assert_eq!(err, ProxyError::IdempotencyConflict);

        let mut put = post(Some("abc"), r#"{"amount":10}"#);
        put.method = Method::PUT;
        let err = orchestrator.handle(put).await.unwrap_err();
        assert_eq!(err, ProxyError::IdempotencyConflict);

        assert_eq!(origin.calls(), 1);
        assert_eq!(kv.len(), 1);
    }

    #[tokio::test]
    async fn test_caller_going_away_does_not_cancel_origin_call() {
        let origin = ScriptedOrigin::fixed(201, r#"{"id":"x1"}"#).with_delay(Duration::from_millis(100));
        let orchestrator = Orchestrator::new(MemoryKv::new(), origin.clone(), policy());

        let caller = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.handle(post(Some("abc"), r#"{"amount":10}"#)).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());

        tokio::time::sleep(Duration::from_millis(150)).await;
        let replay = orchestrator.handle(post(Some("abc"), r#"{"amount":10}"#)).await.unwrap();
        assert!(replay.replayed);
        assert_eq!(replay.body, Bytes::from_static(br#"{"id":"x1"}"#));
        assert_eq!(origin.calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_identical_requests_call_origin_once() {
        let origin = ScriptedOrigin::fixed(201, r#"{"id":"x1"}"#).with_delay(Duration::from_millis(100));
        let orchestrator = Orchestrator::new(MemoryKv::new(), origin.clone(), policy());

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let orchestrator = orchestrator.clone();
            tasks.push(tokio::spawn(async move {
                orchestrator.handle(post(Some("abc"), r#"{"amount":10}"#)).await
            }));
        }

        for task in tasks {
            let replay = task.await.unwrap().unwrap();
            assert_eq!(replay.status, StatusCode::CREATED);
            assert_eq!(replay.body, Bytes::from_static(br#"{"id":"x1"}"#));
        }
        assert_eq!(origin.calls(), 1);
        assert_eq!(orchestrator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_two_contexts_agree_on_one_entry() {
        let origin = ScriptedOrigin::new(|_, call| {
            Ok(if call == 0 {
                response(201, r#"{"id":"first"}"#)
            } else {
                response(201, r#"{"id":"second"}"#)
            })
        })
        .with_delay(Duration::from_millis(50));
        let kv = MemoryKv::new();
        let a = Orchestrator::new(kv.clone(), origin.clone(), policy());
        let b = Orchestrator::new(kv.clone(), origin.clone(), policy());

        let (ra, rb) = tokio::join!(
            a.handle(post(Some("abc"), r#"{"amount":10}"#)),
            b.handle(post(Some("abc"), r#"{"amount":10}"#)),
        );
        let (ra, rb) = (ra.unwrap(), rb.unwrap());

        assert_eq!(ra.body, rb.body);
        assert_eq!(kv.len(), 1);
        assert!(origin.calls() <= 2);

        let stored = a.store().get(fingerprint_of("abc", r#"{"amount":10}"#)).await.unwrap().unwrap();
        assert_eq!(stored.body, ra.body);
    }

    fn fingerprint_of(key: &str, body: &str) -> EntryKey {
        let key = IdempotencyKey::parse(key).unwrap();
        fingerprint(&Method::POST, "/payments", &key, body.as_bytes()).entry_key()
    }

    #[tokio::test]
    async fn test_timeout_is_retryable_and_leaves_no_entry() {
        let origin = ScriptedOrigin::fixed(201, r#"{"id":"x1"}"#).with_delay(Duration::from_millis(100));
        let orchestrator = Orchestrator::new(
            MemoryKv::new(),
            origin.clone(),
            policy().with_origin_timeout(Duration::from_millis(20)),
        );

        let err = orchestrator
            .handle(post(Some("abc"), r#"{"amount":10}"#))
            .await
            .unwrap_err();
        assert_eq!(err, ProxyError::UpstreamTimeout(20));
        assert!(err.is_retryable());
        assert!(orchestrator
            .store()
            .get(fingerprint_of("abc", r#"{"amount":10}"#))
            .await
            .unwrap()
            .is_none());

        orchestrator.update_policy(policy());
        let retry = orchestrator.handle(post(Some("abc"), r#"{"amount":10}"#)).await.unwrap();
        assert_eq!(retry.status, StatusCode::CREATED);
        assert!(!retry.replayed);
        assert_eq!(origin.calls(), 2);
    }

    #[tokio::test]
    async fn test_timeout_reaches_every_waiter() {
        let origin = ScriptedOrigin::fixed(201, "{}").with_delay(Duration::from_millis(200));
        let orchestrator = Orchestrator::new(
            MemoryKv::new(),
            origin.clone(),
            policy().with_origin_timeout(Duration::from_millis(30)),
        );

        let (a, b, c) = tokio::join!(
            orchestrator.handle(post(Some("k"), "{}")),
            orchestrator.handle(post(Some("k"), "{}")),
            orchestrator.handle(post(Some("k"), "{}")),
        );
        for result in [a, b, c] {
            assert_eq!(result.unwrap_err(), ProxyError::UpstreamTimeout(30));
        }
        assert_eq!(origin.calls(), 1);
        assert_eq!(orchestrator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_non_definitive_status_is_not_persisted() {
        let origin = ScriptedOrigin::new(|_, call| {
            Ok(if call == 0 {
                response(503, r#"{"error":"busy"}"#)
            } else {
                response(200, r#"{"ok":true}"#)
            })
        });
        let orchestrator = Orchestrator::new(MemoryKv::new(), origin.clone(), policy());

        let err = orchestrator.handle(post(Some("abc"), "{}")).await.unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamUnavailable(_)));

        let ok = orchestrator.handle(post(Some("abc"), "{}")).await.unwrap();
        assert_eq!(ok.status, StatusCode::OK);
        assert_eq!(origin.calls(), 2);
    }

    #[tokio::test]
    async fn test_origin_auth_failure_maps_to_unauthorized() {
        let origin = ScriptedOrigin::fixed(403, "{}");
        let orchestrator = Orchestrator::new(MemoryKv::new(), origin, policy());

        let err = orchestrator.handle(post(Some("abc"), "{}")).await.unwrap_err();
        assert!(matches!(err, ProxyError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_definitive_client_error_is_replayed() {
        let origin = ScriptedOrigin::fixed(422, r#"{"error":"amount"}"#);
        let orchestrator = Orchestrator::new(MemoryKv::new(), origin.clone(), policy());

        orchestrator.handle(post(Some("abc"), "{}")).await.unwrap();
        let replay = orchestrator.handle(post(Some("abc"), "{}")).await.unwrap();
        assert_eq!(replay.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(replay.replayed);
        assert_eq!(origin.calls(), 1);
    }

    #[tokio::test]
    async fn test_transport_error_is_upstream_unavailable() {
        let origin = ScriptedOrigin::new(|_, _| Err(OriginError::Request("connection refused".into())));
        let orchestrator = Orchestrator::new(MemoryKv::new(), origin, policy());

        let err = orchestrator.handle(post(Some("abc"), "{}")).await.unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamUnavailable(_)));
    }

    #[derive(Clone)]
    struct DownKv;

    impl KvStore for DownKv {
        async fn get(&self, _key: EntryKey) -> StoreResult<Option<Versioned>> {
            Err(StoreError::Backend("connection refused".into()))
        }

        async fn put_if_absent(&self, _key: EntryKey, _value: Bytes, _exp: u64) -> StoreResult<KvPut> {
            Err(StoreError::Backend("connection refused".into()))
        }

        async fn compare_and_swap(
            &self,
            _key: EntryKey,
            _expected_version: u64,
            _value: Bytes,
            _exp: u64,
        ) -> StoreResult<KvSwap> {
            Err(StoreError::Backend("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_store_failure_never_reaches_origin() {
        let origin = ScriptedOrigin::fixed(201, "{}");
        let orchestrator = Orchestrator::new(DownKv, origin.clone(), policy());

        let err = orchestrator.handle(post(Some("abc"), "{}")).await.unwrap_err();
        assert!(matches!(err, ProxyError::StoreUnavailable(_)));
        assert_eq!(origin.calls(), 0);
    }

    #[tokio::test]
    async fn test_aborted_leader_is_replaced() {
        let origin = ScriptedOrigin::new(|_, call| {
            if call == 0 {
                panic!("origin client crashed");
            }
            Ok(response(201, r#"{"id":"x1"}"#))
        });
        let orchestrator = Orchestrator::new(MemoryKv::new(), origin.clone(), policy());

        let replay = orchestrator.handle(post(Some("abc"), "{}")).await.unwrap();
        assert_eq!(replay.status, StatusCode::CREATED);
        assert_eq!(origin.calls(), 2);
    }

    #[tokio::test]
    async fn test_repeated_aborts_give_up() {
        let origin = ScriptedOrigin::new(|_, _| -> Result<OriginResponse, OriginError> {
            panic!("origin client crashed")
        });
        let orchestrator = Orchestrator::new(MemoryKv::new(), origin.clone(), policy());

        let err = orchestrator.handle(post(Some("abc"), "{}")).await.unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamUnavailable(_)));
        assert_eq!(origin.calls(), MAX_LEADERSHIP_ATTEMPTS as usize);
    }

    #[tokio::test]
    async fn test_concurrent_different_body_is_conflict() {
        let origin = ScriptedOrigin::fixed(201, "{}").with_delay(Duration::from_millis(50));
        let orchestrator = Orchestrator::new(MemoryKv::new(), origin.clone(), policy());

        let leader = orchestrator.clone();
        let first = tokio::spawn(async move { leader.handle(post(Some("abc"), r#"{"amount":10}"#)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = orchestrator.handle(post(Some("abc"), r#"{"amount":20}"#)).await;

        assert!(first.await.unwrap().is_ok());
        assert_eq!(second.unwrap_err(), ProxyError::IdempotencyConflict);
        assert_eq!(origin.calls(), 1);
    }

    #[tokio::test]
    async fn test_keyless_get_is_forwarded_without_caching() {
        let origin = ScriptedOrigin::fixed(200, r#"{"balance":5}"#);
        let orchestrator = Orchestrator::new(MemoryKv::new(), origin.clone(), policy());

        orchestrator.handle(get("/balance")).await.unwrap();
        let second = orchestrator.handle(get("/balance")).await.unwrap();
        assert!(!second.replayed);
        assert_eq!(origin.calls(), 2);
    }

    #[tokio::test]
    async fn test_keyless_get_rejected_when_keys_required() {
        let origin = ScriptedOrigin::fixed(200, "{}");
        let orchestrator = Orchestrator::new(MemoryKv::new(), origin, policy().with_required_keys(true));

        let err = orchestrator.handle(get("/balance")).await.unwrap_err();
        assert!(matches!(err, ProxyError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_outbound_request_is_signed() {
        let origin = ScriptedOrigin::fixed(201, "{}");
        let orchestrator = Orchestrator::new(MemoryKv::new(), origin.clone(), policy());

        let mut request = post(Some("abc"), r#"{"amount":10}"#);
        request.path_and_query = "//payments/".to_string();
        request.headers.insert("x-proxy-signature", "0xforged".parse().unwrap());
        orchestrator.handle(request).await.unwrap();

        let seen = origin.requests();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].path_and_query, "/payments");

        let verifier = Verifier::new(signer().address(), Duration::from_secs(60));
        verifier
            .verify_request(
                &seen[0].method,
                &seen[0].path_and_query,
                Some("abc"),
                &seen[0].headers,
                &seen[0].body,
            )
            .unwrap();
    }

    #[tokio::test]
    async fn test_refresh_on_replay_extends_expiry() {
        let origin = ScriptedOrigin::fixed(201, "{}");
        let orchestrator = Orchestrator::new(
            MemoryKv::new(),
            origin,
            policy()
                .with_entry_ttl(Duration::from_secs(60))
                .with_refresh_on_replay(true),
        );
        let key = fingerprint_of("abc", "{}");

        orchestrator.handle(post(Some("abc"), "{}")).await.unwrap();
        let before = orchestrator.store().get(key).await.unwrap().unwrap().expires_at_ms;

        orchestrator.update_policy(
            policy()
                .with_entry_ttl(Duration::from_secs(3600))
                .with_refresh_on_replay(true),
        );
        orchestrator.handle(post(Some("abc"), "{}")).await.unwrap();
        let after = orchestrator.store().get(key).await.unwrap().unwrap();

        assert!(after.expires_at_ms > before);
        assert_eq!(after.body, Bytes::from_static(b"{}"));
    }

    #[tokio::test]
    async fn test_expired_entry_starts_fresh_operation() {
        let origin = ScriptedOrigin::new(|_, call| {
            Ok(if call == 0 {
                response(201, r#"{"id":"old"}"#)
            } else {
                response(201, r#"{"id":"new"}"#)
            })
        });
        let orchestrator = Orchestrator::new(
            MemoryKv::new(),
            origin.clone(),
            policy().with_entry_ttl(Duration::from_millis(30)),
        );

        orchestrator.handle(post(Some("abc"), "{}")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let fresh = orchestrator.handle(post(Some("abc"), "{}")).await.unwrap();
        assert_eq!(fresh.body, Bytes::from_static(br#"{"id":"new"}"#));
        assert!(!fresh.replayed);
        assert_eq!(origin.calls(), 2);
    }
}
