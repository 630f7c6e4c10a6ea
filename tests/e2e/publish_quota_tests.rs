use anyhow::Result;
use reqwest::StatusCode;
use serde_json::{json, Value};

use super::{random_tenant_id, TestHarness};

fn values(count: usize) -> Vec<Value> {
    (0..count).map(|n| json!({ "reading": n })).collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_publish_rejected_once_daily_limit_reached() -> Result<()> {
    let harness = TestHarness::start_with(|cfg| cfg.tenant_daily_messages = 5).await?;
    let tenant = random_tenant_id("sensor");
    harness.provision(&tenant).await?;

    for _ in 0..2 {
        let response = harness.publish(&tenant, &values(2)).await?;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = harness.publish(&tenant, &values(2)).await?;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: Value = response.json().await?;
    assert_eq!(body["code"], "quota_exceeded");
    assert_eq!(body["details"]["scope"], "tenant");
    assert_eq!(body["details"]["direction"], "in");

    let usage = harness.usage(&tenant).await?;
    assert_eq!(usage["inbound"]["messages_used"], 4);
    assert_eq!(usage["inbound"]["messages_remaining"], 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_usage_survives_restart() -> Result<()> {
    let harness = TestHarness::start_with(|cfg| cfg.tenant_daily_messages = 5).await?;
    let tenant = random_tenant_id("restart");
    harness.provision(&tenant).await?;
    assert_eq!(
        harness.publish(&tenant, &values(4)).await?.status(),
        StatusCode::OK
    );
    let data_dir = harness.shutdown().await?;

    let harness = TestHarness::start_in(data_dir, |cfg| cfg.tenant_daily_messages = 5).await?;
    harness.provision(&tenant).await?;
    assert_eq!(
        harness.publish(&tenant, &values(1)).await?.status(),
        StatusCode::OK
    );
    assert_eq!(
        harness.publish(&tenant, &values(1)).await?.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_tenant_exhaustion_does_not_affect_other_tenants() -> Result<()> {
    let harness = TestHarness::start_with(|cfg| cfg.tenant_daily_messages = 3).await?;
    let noisy = random_tenant_id("noisy");
    let quiet = random_tenant_id("quiet");
    harness.provision(&noisy).await?;
    harness.provision(&quiet).await?;

    assert_eq!(
        harness.publish(&noisy, &values(3)).await?.status(),
        StatusCode::OK
    );
    assert_eq!(
        harness.publish(&noisy, &values(1)).await?.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(
        harness.publish(&quiet, &values(3)).await?.status(),
        StatusCode::OK
    );

    let global = harness.admin_get("/api/admin/usage").await?;
    assert_eq!(global["inbound"]["messages_used"], 6);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_http_publishes_respect_limit() -> Result<()> {
    const LIMIT: u64 = 20;
    let harness = TestHarness::start_with(|cfg| cfg.tenant_daily_messages = LIMIT).await?;
    let tenant = random_tenant_id("burst");
    harness.provision(&tenant).await?;

    let batch = values(3);
    let requests = (0..16).map(|_| harness.publish(&tenant, &batch));
    let responses = futures_util::future::join_all(requests).await;

    let mut admitted = 0u64;
    for response in responses {
        match response?.status() {
            StatusCode::OK => admitted += 1,
            StatusCode::TOO_MANY_REQUESTS => {}
            other => panic!("unexpected status {other}"),
        }
    }

    assert!(admitted * 3 <= LIMIT);
    let usage = harness.usage(&tenant).await?;
    assert_eq!(usage["inbound"]["messages_used"], admitted * 3);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_oversized_and_empty_batches_rejected() -> Result<()> {
    let harness = TestHarness::start_with(|cfg| cfg.max_payload_bytes = 128).await?;
    let tenant = random_tenant_id("payload");
    harness.provision(&tenant).await?;

    let big = json!({ "blob": "x".repeat(256) });
    let response = harness.publish(&tenant, &[json!(1), big]).await?;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body: Value = response.json().await?;
    assert_eq!(body["details"]["index"], 1);

    let response = harness.publish(&tenant, &[]).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let usage = harness.usage(&tenant).await?;
    assert_eq!(usage["inbound"]["messages_used"], 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_admin_routes_require_key() -> Result<()> {
    let harness = TestHarness::start().await?;

    let response = harness
        .http_client()
        .get(harness.url("/api/admin/streams"))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = harness
        .http_client()
        .get(harness.url("/api/admin/usage"))
        .header("X-Admin-API-Key", "not-the-key")
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_tenant_request_rate_limit() -> Result<()> {
    let harness = TestHarness::start_with(|cfg| cfg.rate_limit_requests = 3).await?;
    let tenant = random_tenant_id("chatty");
    harness.provision(&tenant).await?;

    for _ in 0..2 {
        assert_eq!(
            harness.publish(&tenant, &values(1)).await?.status(),
            StatusCode::OK
        );
    }

    let response = harness.publish(&tenant, &values(1)).await?;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));
    let body: Value = response.json().await?;
    assert_eq!(body["code"], "rate_limited");

    let other = random_tenant_id("calm");
    harness.provision(&other).await?;
    assert_eq!(
        harness.publish(&other, &values(1)).await?.status(),
        StatusCode::OK
    );

    let global = harness.admin_get("/api/admin/usage").await?;
    assert_eq!(global["inbound"]["messages_used"], 3);
    Ok(())
}
