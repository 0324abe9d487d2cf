//! End-to-end smoke test for the grantd binary.
//!
//! Starts a real process against a fresh store, drives the admin and
//! read-side endpoints over HTTP, and asserts the service comes up and
//! persists what it is told. Flows that need the external issuer or a
//! custodian live in the engine and http test suites with scripted
//! collaborators.
//!
//! Run with:
//!   cargo test -p grantd-node --test smoke

use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

// ── Process lifecycle ─────────────────────────────────────────────────────────

struct NodeGuard {
    child: Child,
    data_dir: PathBuf,
}

impl Drop for NodeGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.data_dir);
    }
}

/// Find a free TCP port on loopback.
fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn spawn_node() -> (NodeGuard, String) {
    let port = free_port();
    let data_dir =
        std::env::temp_dir().join(format!("grantd-smoke-{}", uuid::Uuid::new_v4()));
    let child = Command::new(env!("CARGO_BIN_EXE_grantd"))
        .arg("--data-dir")
        .arg(&data_dir)
        .arg("--listen")
        .arg(format!("127.0.0.1:{port}"))
        .env("ENV", "local")
        // Collaborators are unreachable; the smoke test stays on paths that
        // never call out.
        .env("CB_SERVER", "http://127.0.0.1:1")
        .env("REPUTATION_SERVER", "http://127.0.0.1:1")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn grantd");
    (
        NodeGuard { child, data_dir },
        format!("http://127.0.0.1:{port}"),
    )
}

async fn wait_for_health(client: &reqwest::Client, base: &str, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Ok(resp) = client.get(format!("{base}/health")).send().await {
            if resp.status().is_success() {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    false
}

#[tokio::test]
async fn boots_and_serves_promotions() {
    let (_guard, base) = spawn_node();
    let client = reqwest::Client::new();
    assert!(
        wait_for_health(&client, &base, Duration::from_secs(20)).await,
        "node did not come up"
    );

    // Create and activate a promotion.
    let resp = client
        .post(format!("{base}/promotion"))
        .json(&serde_json::json!({
            "type": "ugp",
            "numGrants": 2,
            "value": "15",
            "suggestionsPerGrant": 60,
            "platform": "osx",
            "active": true,
        }))
        .send()
        .await
        .expect("create promotion");
    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.expect("promotion json");
    let promotion_id = body["id"].as_str().expect("id").to_string();

    // It shows up for a wallet on the right platform...
    let wallet = uuid::Uuid::new_v4();
    let listed: serde_json::Value = client
        .get(format!(
            "{base}/promotion?paymentId={wallet}&platform=osx"
        ))
        .send()
        .await
        .expect("list")
        .json()
        .await
        .expect("list json");
    let ids: Vec<&str> = listed["promotions"]
        .as_array()
        .expect("promotions")
        .iter()
        .filter_map(|p| p["id"].as_str())
        .collect();
    assert!(ids.contains(&promotion_id.as_str()));

    // ...and not for another platform.
    let listed: serde_json::Value = client
        .get(format!(
            "{base}/promotion?paymentId={wallet}&platform=android"
        ))
        .send()
        .await
        .expect("list")
        .json()
        .await
        .expect("list json");
    assert!(listed["promotions"].as_array().expect("promotions").is_empty());

    // Metrics are exposed.
    let metrics = client
        .get(format!("{base}/metrics"))
        .send()
        .await
        .expect("metrics");
    assert!(metrics.status().is_success());

    // An audit write lands and replays stay idempotent.
    let claim_id = uuid::Uuid::new_v4();
    for _ in 0..2 {
        let resp = client
            .post(format!("{base}/reportclobberedclaims"))
            .json(&serde_json::json!({ "claimIds": [claim_id] }))
            .send()
            .await
            .expect("clobbered");
        assert!(resp.status().is_success());
    }
}
