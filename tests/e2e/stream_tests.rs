use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde_json::{json, Value};

use super::{random_tenant_id, SseClient, TestHarness};

const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

async fn expect_connected(stream: &mut SseClient) -> Result<()> {
    let frame = stream
        .next_frame(FRAME_TIMEOUT)
        .await?
        .context("stream ended before connecting")?;
    assert_eq!(frame.comments, vec!["connected".to_string()]);
    Ok(())
}

async fn next_value(stream: &mut SseClient) -> Result<Value> {
    let frame = stream
        .next_event(FRAME_TIMEOUT)
        .await?
        .context("stream ended early")?;
    assert!(!frame.is_end(), "unexpected end frame: {frame:?}");
    let payload = frame.json().context("message frame without JSON data")?;
    assert!(payload["timestamp"].is_string());
    Ok(payload["value"].clone())
}

async fn expect_end(stream: &mut SseClient) -> Result<Value> {
    let frame = stream
        .next_event(FRAME_TIMEOUT)
        .await?
        .context("stream closed without an end event")?;
    assert!(frame.is_end(), "expected end frame, got {frame:?}");
    frame.json().context("end frame without JSON data")
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stream_delivers_published_messages_in_order() -> Result<()> {
    let harness = TestHarness::start().await?;
    let tenant = random_tenant_id("dashboard");
    harness.provision(&tenant).await?;

    let mut stream = harness.open_stream(&tenant).await?;
    expect_connected(&mut stream).await?;

    let published: Vec<Value> = (0..3).map(|n| json!({ "temp": 20 + n })).collect();
    assert_eq!(
        harness.publish(&tenant, &published).await?.status(),
        StatusCode::OK
    );

    for expected in &published {
        assert_eq!(&next_value(&mut stream).await?, expected);
    }

    let usage = harness.usage(&tenant).await?;
    assert_eq!(usage["outbound"]["messages_used"], 3);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_third_concurrent_stream_is_rejected() -> Result<()> {
    let harness = TestHarness::start().await?;
    let tenant = random_tenant_id("capped");
    harness.provision(&tenant).await?;

    let mut first = harness.open_stream(&tenant).await?;
    expect_connected(&mut first).await?;
    let mut second = harness.open_stream(&tenant).await?;
    expect_connected(&mut second).await?;

    let response = harness.open_stream_response(&tenant).await?;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: Value = response.json().await?;
    assert_eq!(body["code"], "connection_cap_exceeded");
    assert_eq!(body["details"]["cap"], 2);

    let other = random_tenant_id("other");
    harness.provision(&other).await?;
    let mut unaffected = harness.open_stream(&other).await?;
    expect_connected(&mut unaffected).await?;

    drop(first);
    harness
        .wait_for_active_streams(2, Duration::from_secs(10))
        .await?;
    let mut replacement = harness.open_stream(&tenant).await?;
    expect_connected(&mut replacement).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_outbound_quota_ends_stream() -> Result<()> {
    let harness = TestHarness::start_with(|cfg| cfg.tenant_daily_messages = 4).await?;
    let tenant = random_tenant_id("fanout");
    harness.provision(&tenant).await?;

    let mut first = harness.open_stream(&tenant).await?;
    expect_connected(&mut first).await?;
    let mut second = harness.open_stream(&tenant).await?;
    expect_connected(&mut second).await?;

    harness
        .publish(&tenant, &[json!("a"), json!("b")])
        .await?
        .error_for_status()?;
    for stream in [&mut first, &mut second] {
        assert_eq!(next_value(stream).await?, json!("a"));
        assert_eq!(next_value(stream).await?, json!("b"));
    }

    harness
        .publish(&tenant, &[json!("c"), json!("d")])
        .await?
        .error_for_status()?;
    for stream in [&mut first, &mut second] {
        let end = expect_end(stream).await?;
        assert_eq!(end, json!({ "reason": "quota_exceeded", "scope": "tenant" }));
        assert!(stream.next_frame(FRAME_TIMEOUT).await?.is_none());
    }

    harness
        .wait_for_active_streams(0, Duration::from_secs(5))
        .await?;
    let usage = harness.usage(&tenant).await?;
    assert_eq!(usage["outbound"]["messages_used"], 4);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_admin_force_close() -> Result<()> {
    let harness = TestHarness::start().await?;
    let tenant = random_tenant_id("forced");
    harness.provision(&tenant).await?;

    let mut stream = harness.open_stream(&tenant).await?;
    expect_connected(&mut stream).await?;

    let listing = harness.admin_get("/api/admin/streams").await?;
    assert_eq!(listing["total"], 1);
    let connection_id = listing["tenants"][&tenant][0]["connection_id"]
        .as_str()
        .context("connection id in listing")?
        .to_string();

    let status = harness
        .admin_delete(&format!("/api/admin/streams/{tenant}/{connection_id}"))
        .await?;
    assert_eq!(status, StatusCode::OK);

    let end = expect_end(&mut stream).await?;
    assert_eq!(end, json!({ "reason": "cancelled" }));
    harness
        .wait_for_active_streams(0, Duration::from_secs(5))
        .await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_client_disconnect_releases_slot() -> Result<()> {
    let harness = TestHarness::start().await?;
    let tenant = random_tenant_id("flaky-client");
    harness.provision(&tenant).await?;

    let mut stream = harness.open_stream(&tenant).await?;
    expect_connected(&mut stream).await?;
    assert_eq!(harness.active_streams().await?, 1);

    drop(stream);
    harness
        .wait_for_active_streams(0, Duration::from_secs(15))
        .await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_idle_stream_receives_heartbeats() -> Result<()> {
    let harness = TestHarness::start().await?;
    let tenant = random_tenant_id("idle");
    harness.provision(&tenant).await?;

    let mut stream = harness.open_stream(&tenant).await?;
    expect_connected(&mut stream).await?;

    let frame = stream
        .next_frame(FRAME_TIMEOUT)
        .await?
        .context("stream ended while idle")?;
    assert!(frame.is_comment());
    assert!(frame.comments[0].starts_with("heartbeat "));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_ends_live_streams() -> Result<()> {
    let harness = TestHarness::start().await?;
    let tenant = random_tenant_id("draining");
    harness.provision(&tenant).await?;

    let mut stream = harness.open_stream(&tenant).await?;
    expect_connected(&mut stream).await?;

    let reader = tokio::spawn(async move { expect_end(&mut stream).await });
    harness.shutdown().await?;

    let end = reader.await??;
    assert_eq!(end, json!({ "reason": "cancelled" }));
    Ok(())
}
