//! Integrity router.
//!
//! Returns a composable `Router` that can be mounted on any axum server.
//!
//! Middleware stack (outermost → innermost):
//! 1. Correlation → 2. Device proof → 3. Idempotency → Handler

use axum::routing::{get, post};
use axum::Router;

use crate::api::endpoints;
use crate::api::middleware;
use crate::api::types::ApiContext;

/// Build the router for the hot business routes and the health check.
///
/// Middleware reads `ApiContext` from the `Extension` layer (outermost).
/// Handlers use `State<ApiContext>` via `with_state`.
pub fn integrity_router(ctx: ApiContext) -> Router {
    Router::new()
        .route("/health", get(endpoints::health::check))
        .route("/stamps/claim", post(endpoints::stamps::claim))
        .route("/rewards/redeem", post(endpoints::rewards::redeem))
        .with_state(ctx.clone())
        .layer(axum::middleware::from_fn(middleware::idempotency::enforce_idempotency))
        .layer(axum::middleware::from_fn(middleware::device_proof::verify_device_proof))
        .layer(axum::middleware::from_fn(middleware::correlation::assign_correlation))
        .layer(axum::Extension(ctx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use base64::Engine;
    use chrono::{Duration, TimeZone, Utc};
    use ed25519_dalek::{Signer, SigningKey};
    use tower::ServiceExt;

    use crate::api::error::PROBLEM_CONTENT_TYPE;
    use crate::audit::{actions, verify_chain, SqliteWormWriter};
    use crate::clock::{Clock, FixedClock};
    use crate::config::GuardConfig;
    use crate::db::Database;
    use crate::device::{canonical_message, SqliteDeviceRegistry};

    const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

    struct Harness {
        app: Router,
        ctx: ApiContext,
        db: Arc<Database>,
        clock: FixedClock,
        signing: SigningKey,
    }

    fn harness(trust_proxy: bool) -> Harness {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap());
        let signing = SigningKey::from_bytes(&[9u8; 32]);
        SqliteDeviceRegistry::new(db.clone())
            .register("t1", "dev-1", &B64.encode(signing.verifying_key().as_bytes()))
            .unwrap();

        let config = GuardConfig {
            db_path: ":memory:".into(),
            skew_secs: 30,
            trust_proxy,
        };
        let ctx = ApiContext::from_database(db.clone(), Arc::new(clock.clone()), &config);
        Harness {
            app: integrity_router(ctx.clone()),
            ctx,
            db,
            clock,
            signing,
        }
    }

    struct Call<'a> {
        path: &'a str,
        signed_path: &'a str,
        nonce: &'a str,
        key: Option<&'a str>,
        body: String,
        sign: bool,
    }

    impl<'a> Call<'a> {
        fn claim(nonce: &'a str, key: &'a str, jti: &str, h: &Harness) -> Self {
            Self {
                path: "/stamps/claim",
                signed_path: "/stamps/claim",
                nonce,
                key: Some(key),
                body: claim_body(jti, h),
                sign: true,
            }
        }
    }

    fn claim_body(jti: &str, h: &Harness) -> String {
        let exp = (h.clock.now() + Duration::minutes(5)).timestamp();
        format!(r#"{{"jti":"{jti}","expires_at":{exp}}}"#)
    }

    fn make_request(h: &Harness, call: &Call<'_>) -> Request<Body> {
        let timestamp = h.clock.now().timestamp().to_string();
        let mut builder = Request::builder()
            .method("POST")
            .uri(call.path)
            .header("content-type", "application/json")
            .header("x-card-id", "card-1");

        if call.sign {
            let message = canonical_message("POST", call.signed_path, &timestamp, call.nonce);
            let signature = B64.encode(h.signing.sign(message.as_bytes()).to_bytes());
            builder = builder
                .header("x-device-id", "dev-1")
                .header("x-tenant-id", "t1")
                .header("x-device-timestamp", &timestamp)
                .header("x-device-nonce", call.nonce)
                .header("x-device-signature", signature);
        }
        if let Some(key) = call.key {
            builder = builder.header("idempotency-key", key);
        }
        builder.body(Body::from(call.body.clone())).unwrap()
    }

    async fn json(response: axum::response::Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn worm_rows(h: &Harness) -> Vec<crate::db::repository::WormRow> {
        SqliteWormWriter::new(h.db.clone()).rows("t1", 1, 1000).unwrap()
    }

    #[tokio::test]
    async fn health_needs_no_proof() {
        let h = harness(false);
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = h.app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-correlation-id"));
        assert_eq!(json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn signed_claim_succeeds_and_is_audited() {
        let h = harness(false);
        let req = make_request(&h, &Call::claim("nonce-1", "key-00000001", "jti-1", &h));
        let response = h.app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["card_id"], "card-1");
        assert_eq!(body["stamps"], 1);

        let rows = worm_rows(&h);
        let seen: Vec<&str> = rows.iter().map(|r| r.action.as_str()).collect();
        assert_eq!(seen, vec![actions::DEVICE_PROOF_ACCEPTED, actions::TOKEN_REDEEMED]);
        assert_eq!(rows[0].correlation_id, rows[1].correlation_id);
        verify_chain(&rows, Some("")).unwrap();
    }

    #[tokio::test]
    async fn missing_proof_is_401_problem() {
        let h = harness(false);
        let mut call = Call::claim("nonce-1", "key-00000001", "jti-1", &h);
        call.sign = false;
        let req = make_request(&h, &call);
        let response = h.app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()["content-type"], PROBLEM_CONTENT_TYPE);
        let header_id = response.headers()["x-correlation-id"].to_str().unwrap().to_string();
        let body = json(response).await;
        assert_eq!(body["error_code"], "DEVICE_PROOF_REQUIRED");
        assert_eq!(body["instance"], "/stamps/claim");
        assert_eq!(body["correlation_id"], header_id.as_str());
    }

    #[tokio::test]
    async fn inbound_correlation_id_is_kept() {
        let h = harness(false);
        let mut req = make_request(&h, &Call::claim("nonce-1", "key-00000001", "jti-1", &h));
        req.headers_mut().insert("x-correlation-id", "req-abc.1".parse().unwrap());
        let response = h.app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.headers()["x-correlation-id"], "req-abc.1");
        assert_eq!(worm_rows(&h)[0].correlation_id.as_deref(), Some("req-abc.1"));
    }

    #[tokio::test]
    async fn bad_signature_is_403_and_audited() {
        let h = harness(false);
        let mut call = Call::claim("nonce-1", "key-00000001", "jti-1", &h);
        call.signed_path = "/rewards/redeem";
        let response = h.app.clone().oneshot(make_request(&h, &call)).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(json(response).await["error_code"], "DEVICE_PROOF_INVALID");

        let rows = worm_rows(&h);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].action, actions::DEVICE_PROOF_REJECTED);
        assert_eq!(rows[0].device_id.as_deref(), Some("dev-1"));
    }

    #[tokio::test]
    async fn unknown_device_rejection_is_not_written_to_claimed_tenant() {
        let h = harness(false);
        let mut req = make_request(&h, &Call::claim("nonce-1", "key-00000001", "jti-1", &h));
        req.headers_mut().insert("x-tenant-id", "invented-tenant".parse().unwrap());
        req.headers_mut().insert("x-device-id", "dev-404".parse().unwrap());
        let response = h.app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let tenants = h.db.with_conn(crate::db::repository::list_audit_tenants).unwrap();
        assert!(tenants.is_empty());
    }

    #[tokio::test]
    async fn replayed_nonce_is_409() {
        let h = harness(false);
        let first = make_request(&h, &Call::claim("nonce-1", "key-00000001", "jti-1", &h));
        assert_eq!(h.app.clone().oneshot(first).await.unwrap().status(), StatusCode::OK);

        let second = make_request(&h, &Call::claim("nonce-1", "key-00000002", "jti-2", &h));
        let response = h.app.clone().oneshot(second).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(json(response).await["error_code"], "DEVICE_PROOF_REPLAY");
    }

    #[tokio::test]
    async fn same_key_and_body_replays_cached_response() {
        let h = harness(false);
        let first = make_request(&h, &Call::claim("nonce-1", "key-00000001", "jti-1", &h));
        let first = h.app.clone().oneshot(first).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let first_body = json(first).await;

        let again = make_request(&h, &Call::claim("nonce-2", "key-00000001", "jti-1", &h));
        let again = h.app.clone().oneshot(again).await.unwrap();
        assert_eq!(again.status(), StatusCode::OK);
        assert_eq!(again.headers()["idempotency-key"], "key-00000001");
        assert_eq!(json(again).await, first_body);

        assert_eq!(h.ctx.cards.stamps("t1", "card-1"), 1);
        let replayed = worm_rows(&h)
            .iter()
            .filter(|r| r.action == actions::IDEMPOTENCY_REPLAYED)
            .count();
        assert_eq!(replayed, 1);
    }

    #[tokio::test]
    async fn same_key_different_body_conflicts() {
        let h = harness(false);
        let first = make_request(&h, &Call::claim("nonce-1", "key-00000001", "jti-1", &h));
        assert_eq!(h.app.clone().oneshot(first).await.unwrap().status(), StatusCode::OK);

        let other = make_request(&h, &Call::claim("nonce-2", "key-00000001", "jti-2", &h));
        let response = h.app.clone().oneshot(other).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(json(response).await["error_code"], "IDEMPOTENCY_CONFLICT");
        assert_eq!(h.ctx.cards.stamps("t1", "card-1"), 1);
    }

    #[tokio::test]
    async fn missing_idempotency_key_is_400() {
        let h = harness(false);
        let mut call = Call::claim("nonce-1", "unused", "jti-1", &h);
        call.key = None;
        let response = h.app.clone().oneshot(make_request(&h, &call)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(response).await["error_code"], "IDEMPOTENCY_KEY_MISSING");
    }

    #[tokio::test]
    async fn malformed_body_is_400() {
        let h = harness(false);
        let mut call = Call::claim("nonce-1", "key-00000001", "jti-1", &h);
        call.body = "{not json".into();
        let response = h.app.clone().oneshot(make_request(&h, &call)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(response).await["error_code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn token_reused_under_distinct_keys_is_blocked() {
        let h = harness(false);
        let a = make_request(&h, &Call::claim("nonce-a", "key-aaaaaaaa", "jti-shared", &h));
        let b = make_request(&h, &Call::claim("nonce-b", "key-bbbbbbbb", "jti-shared", &h));

        let (ra, rb) = tokio::join!(h.app.clone().oneshot(a), h.app.clone().oneshot(b));
        let mut statuses = vec![ra.unwrap(), rb.unwrap()];
        statuses.sort_by_key(|r| r.status().as_u16());
        let reused = statuses.pop().unwrap();
        let won = statuses.pop().unwrap();

        assert_eq!(won.status(), StatusCode::OK);
        assert_eq!(reused.status(), StatusCode::CONFLICT);
        assert_eq!(json(reused).await["error_code"], "TOKEN_REUSE");
        assert_eq!(h.ctx.cards.stamps("t1", "card-1"), 1);

        let rows = worm_rows(&h);
        assert!(rows.iter().any(|r| r.action == actions::TOKEN_REDEEMED));
        assert!(rows.iter().any(|r| r.action == actions::TOKEN_REUSE_BLOCKED));
        verify_chain(&rows, Some("")).unwrap();
        for pair in rows.windows(2) {
            assert_eq!(pair[1].prev_hash, pair[0].hash);
        }
    }

    #[tokio::test]
    async fn short_lived_token_stays_reserved_after_its_expiry() {
        let h = harness(false);
        let exp = (h.clock.now() + Duration::seconds(1)).timestamp();
        let mut first = Call::claim("nonce-1", "key-00000001", "jti-short", &h);
        first.body = format!(r#"{{"jti":"jti-short","expires_at":{exp}}}"#);
        let response = h.app.clone().oneshot(make_request(&h, &first)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        h.clock.advance(Duration::seconds(2));
        let again = make_request(&h, &Call::claim("nonce-2", "key-00000002", "jti-short", &h));
        let response = h.app.clone().oneshot(again).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(json(response).await["error_code"], "TOKEN_REUSE");
        assert_eq!(h.ctx.cards.stamps("t1", "card-1"), 1);
    }

    #[tokio::test]
    async fn reward_redeem_uses_its_own_token() {
        let h = harness(false);
        let exp = (h.clock.now() + Duration::minutes(5)).timestamp();
        let call = Call {
            path: "/rewards/redeem",
            signed_path: "/rewards/redeem",
            nonce: "nonce-r",
            key: Some("key-reward-1"),
            body: format!(r#"{{"jti":"rw-1","reward_id":"coffee","expires_at":{exp}}}"#),
            sign: true,
        };
        let response = h.app.clone().oneshot(make_request(&h, &call)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["reward_id"], "coffee");
    }

    #[tokio::test]
    async fn forwarded_prefix_is_signed_when_proxy_trusted() {
        let h = harness(true);
        let mut call = Call::claim("nonce-1", "key-00000001", "jti-1", &h);
        call.signed_path = "/api/stamps/claim";
        let mut req = make_request(&h, &call);
        req.headers_mut().insert("x-forwarded-prefix", "/api/".parse().unwrap());
        assert_eq!(h.app.clone().oneshot(req).await.unwrap().status(), StatusCode::OK);

        // Without the prefix header the signature no longer matches.
        let mut call = Call::claim("nonce-2", "key-00000002", "jti-2", &h);
        call.signed_path = "/api/stamps/claim";
        let response = h.app.clone().oneshot(make_request(&h, &call)).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
