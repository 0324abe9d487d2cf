//! End-to-end tests for the REST surface: a real router over a real store,
//! with scripted collaborators behind the engine.

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::Engine;
use chrono::{Duration, Months, Utc};
use ed25519_dalek::{Signer, SigningKey};
use grantd_core::decimal::money;
use grantd_core::{Issuer, Promotion, PromotionId, WalletId, WalletRecord};
use grantd_engine::testsupport::{MockBitflyer, MockGemini, MockIssuer, MockReputation, MockUphold};
use grantd_engine::{MemoryTopic, Metrics, Service, ServiceConfig};
use grantd_engine::service::Clients;
use grantd_http::sigverify::{body_digest, signing_string};
use grantd_http::{router, AppState};
use grantd_sched::SchedulerHandle;
use grantd_store::Store;
use prometheus_client::registry::Registry;
use tower::ServiceExt;
use uuid::Uuid;

struct TestApp {
    router: Router,
    service: Arc<Service>,
    topic: Arc<MemoryTopic>,
    dir: PathBuf,
}

impl TestApp {
    fn new() -> Self {
        let dir = std::env::temp_dir().join(format!("grantd-http-test-{}", Uuid::new_v4()));
        let store = Arc::new(Store::open(&dir).expect("open temp store"));
        let topic = Arc::new(MemoryTopic::new(64));
        let mut registry = Registry::default();
        let metrics = Metrics::new(&mut registry);
        let service = Arc::new(Service::new(
            store,
            Clients {
                issuer: Arc::new(MockIssuer::default()),
                reputation: Arc::new(MockReputation::default()),
                uphold: Arc::new(MockUphold::default()),
                bitflyer: Arc::new(MockBitflyer::default()),
                gemini: Arc::new(MockGemini::default()),
                events: topic.clone(),
            },
            ServiceConfig::default(),
            metrics,
            SchedulerHandle::default(),
        ));
        let router = router(AppState {
            service: service.clone(),
            registry: Arc::new(registry),
        });
        Self {
            router,
            service,
            topic,
            dir,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = self.router.clone().oneshot(request).await.expect("send");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
        };
        (status, json)
    }

    fn seed_signed_wallet(&self) -> (WalletId, SigningKey) {
        let signing = SigningKey::from_bytes(&[42u8; 32]);
        let id = WalletId::random();
        let wallet = WalletRecord {
            id,
            public_key: hex::encode(signing.verifying_key().to_bytes()),
            deposit_destination: String::new(),
            deposit_provider: None,
            created_at: Utc::now(),
        };
        self.service.store.put_wallet(&wallet).expect("seed wallet");
        (id, signing)
    }

    fn seed_issuer(&self, promotion_id: PromotionId, public_key: &str) {
        self.service
            .store
            .put_issuer(&Issuer {
                id: Uuid::new_v4(),
                promotion_id,
                cohort: "control".into(),
                public_key: public_key.into(),
                created_at: Utc::now(),
            })
            .expect("seed issuer");
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

fn json_request(method: &str, path: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn signed_post(
    path: &str,
    wallet: WalletId,
    key: &SigningKey,
    body: serde_json::Value,
) -> Request<Body> {
    let bytes = serde_json::to_vec(&body).unwrap();
    let digest = body_digest(&bytes);
    let message = signing_string(
        "POST",
        path,
        &digest,
        &["(request-target)".to_string(), "digest".to_string()],
    );
    let signature = key.sign(message.as_bytes());
    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .header("digest", &digest)
        .header(
            "signature",
            format!(
                r#"keyId="{wallet}",algorithm="ed25519",headers="(request-target) digest",signature="{}""#,
                base64::engine::general_purpose::STANDARD.encode(signature.to_bytes())
            ),
        )
        .body(Body::from(bytes))
        .unwrap()
}

fn blinded(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("blinded-{i}")).collect()
}

async fn create_active_promotion(app: &TestApp, platform: &str) -> String {
    let (status, body) = app
        .send(json_request(
            "POST",
            "/promotion",
            serde_json::json!({
                "type": "ugp",
                "numGrants": 2,
                "value": "15",
                "suggestionsPerGrant": 60,
                "platform": platform,
                "active": true,
            }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    body["id"].as_str().expect("promotion id").to_string()
}

#[tokio::test]
async fn health_endpoint_responds() {
    let app = TestApp::new();
    let (status, body) = app
        .send(Request::get("/health").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn metrics_endpoint_exposes_prometheus_text() {
    let app = TestApp::new();
    let response = app
        .router
        .clone()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("grants_claimed"));
}

#[tokio::test]
async fn full_claim_flow_over_http() {
    let app = TestApp::new();
    let promotion_id = create_active_promotion(&app, "osx").await;
    let (wallet, key) = app.seed_signed_wallet();

    // The promotion is listed for the wallet's platform.
    let (status, body) = app
        .send(
            Request::get(format!("/promotion?paymentId={wallet}&platform=osx"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["promotions"].as_array().unwrap().len(), 1);

    // Claim with exactly suggestionsPerGrant blinded credentials.
    let path = format!("/promotion/{promotion_id}");
    let (status, body) = app
        .send(signed_post(
            &path,
            wallet,
            &key,
            serde_json::json!({ "paymentId": wallet, "blindedCreds": blinded(60) }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    let claim_id = body["claimId"].as_str().unwrap().to_string();

    // Credentials are not signed yet.
    let creds_path = format!("/promotion/{promotion_id}/claims/{claim_id}");
    let (status, _) = app
        .send(Request::get(creds_path.as_str()).body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    // After one signing pass they are.
    app.service.run_next_signing_job().await.unwrap();
    let (status, body) = app
        .send(Request::get(creds_path.as_str()).body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["signedCreds"].as_array().unwrap().len(), 60);
    assert!(body["batchProof"].is_string());

    // Replay with identical credentials: same claim, no side effect.
    let (status, body) = app
        .send(signed_post(
            &path,
            wallet,
            &key,
            serde_json::json!({ "paymentId": wallet, "blindedCreds": blinded(60) }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["claimId"].as_str().unwrap(), claim_id);

    // Different credentials after redemption: conflict.
    let (status, _) = app
        .send(signed_post(
            &path,
            wallet,
            &key,
            serde_json::json!({ "paymentId": wallet, "blindedCreds": blinded(61)[1..].to_vec() }),
        ))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Earnings summary reflects the claim.
    let (status, body) = app
        .send(
            Request::get(format!("/ugp/grants/summary?paymentId={wallet}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["amount"], "15");
}

#[tokio::test]
async fn claim_error_statuses() {
    let app = TestApp::new();
    let (wallet, key) = app.seed_signed_wallet();

    // Unknown promotion.
    let missing = PromotionId::random();
    let (status, _) = app
        .send(signed_post(
            &format!("/promotion/{missing}"),
            wallet,
            &key,
            serde_json::json!({ "paymentId": wallet, "blindedCreds": blinded(60) }),
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Wrong blinded count.
    let promotion_id = create_active_promotion(&app, "").await;
    let (status, _) = app
        .send(signed_post(
            &format!("/promotion/{promotion_id}"),
            wallet,
            &key,
            serde_json::json!({ "paymentId": wallet, "blindedCreds": blinded(3) }),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Inactive promotion.
    let (_, body) = app
        .send(json_request(
            "POST",
            "/promotion",
            serde_json::json!({
                "type": "ugp",
                "numGrants": 1,
                "value": "15",
                "suggestionsPerGrant": 60,
                "active": false,
            }),
        ))
        .await;
    let inactive = body["id"].as_str().unwrap();
    let (status, _) = app
        .send(signed_post(
            &format!("/promotion/{inactive}"),
            wallet,
            &key,
            serde_json::json!({ "paymentId": wallet, "blindedCreds": blinded(60) }),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Promotion outside its claim window.
    let stale_id = create_active_promotion(&app, "").await;
    let stale_pid: PromotionId = stale_id.parse().unwrap();
    let mut stale = app.service.store.get_promotion(&stale_pid).unwrap().unwrap();
    stale.created_at = Utc::now() - Months::new(4);
    stale.expires_at = Utc::now() + Duration::days(30);
    app.service.store.put_promotion(&stale).unwrap();
    let (status, _) = app
        .send(signed_post(
            &format!("/promotion/{stale_id}"),
            wallet,
            &key,
            serde_json::json!({ "paymentId": wallet, "blindedCreds": blinded(60) }),
        ))
        .await;
    assert_eq!(status, StatusCode::GONE);
}

#[tokio::test]
async fn tampered_signature_is_unauthorized() {
    let app = TestApp::new();
    let promotion_id = create_active_promotion(&app, "").await;
    let (wallet, key) = app.seed_signed_wallet();

    let path = format!("/promotion/{promotion_id}");
    let mut request = signed_post(
        &path,
        wallet,
        &key,
        serde_json::json!({ "paymentId": wallet, "blindedCreds": blinded(60) }),
    );
    // Swap the body after signing; the digest no longer matches.
    *request.body_mut() = Body::from(
        serde_json::to_vec(
            &serde_json::json!({ "paymentId": wallet, "blindedCreds": blinded(59) }),
        )
        .unwrap(),
    );
    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn bat_loss_reports_conflict_on_amount_change() {
    let app = TestApp::new();
    let (wallet, key) = app.seed_signed_wallet();
    let path = format!("/{wallet}/events/batloss/7");

    let (status, _) = app
        .send(signed_post(
            &path,
            wallet,
            &key,
            serde_json::json!({ "amount": "1.5", "platform": "ios" }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    // Same amount replays fine.
    let (status, _) = app
        .send(signed_post(
            &path,
            wallet,
            &key,
            serde_json::json!({ "amount": "1.5", "platform": "ios" }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    // A different amount for the same report id is a conflict.
    let (status, _) = app
        .send(signed_post(
            &path,
            wallet,
            &key,
            serde_json::json!({ "amount": "2.5", "platform": "ios" }),
        ))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn suggestion_enqueues_and_emits() {
    let app = TestApp::new();
    let now = Utc::now();
    let promotion = Promotion {
        id: PromotionId::random(),
        created_at: now,
        expires_at: now + Duration::days(90),
        kind: grantd_core::PromotionType::Ads,
        platform: String::new(),
        approximate_value: money("25"),
        suggestions_per_grant: 100,
        remaining_grants: 0,
        active: true,
        public_keys: vec!["pk-1".into()],
        claimable_until: None,
    };
    app.service.store.put_promotion(&promotion).unwrap();
    app.seed_issuer(promotion.id, "pk-1");

    let (status, body) = app
        .send(json_request(
            "POST",
            "/suggestion",
            serde_json::json!({
                "credentials": [
                    { "publicKey": "pk-1", "t": "preimage-1", "signature": "sig-1" },
                    { "publicKey": "pk-1", "t": "preimage-2", "signature": "sig-2" },
                ],
                "suggestionText": "c3VnZ2VzdGlvbg==",
            }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["id"].is_string());

    app.service.run_next_suggestion_job().await.unwrap();
    let records = app.topic.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].0, "local.grant.suggestion");
}
