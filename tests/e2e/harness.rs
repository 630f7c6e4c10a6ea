use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use futures_util::{Stream, StreamExt};
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error};

use topic_gate_gateway::api::{self, ApiState};
use topic_gate_gateway::broker::InMemoryBroker;
use topic_gate_gateway::config::{GatewayConfig, LedgerBackend};
use topic_gate_gateway::guard::QuotaGuard;
use topic_gate_gateway::ledger::UsageLedger;
use topic_gate_gateway::storage::SqliteUsageStore;
use topic_gate_gateway::tracker::ConnectionTracker;
use topic_gate_gateway::Gateway;

pub use topic_gate::bench_support::random_tenant_id;

pub const ADMIN_KEY: &str = "e2e-admin-key";

/// A gateway served on an ephemeral local port, backed by a SQLite ledger in
/// a temp directory.
pub struct TestHarness {
    base_url: String,
    http_client: Client,
    gateway: Gateway,
    shutdown: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<()>>,
    watchdog: JoinHandle<()>,
    pub temp_dir: TempDir,
}

impl TestHarness {
    pub async fn start() -> Result<Self> {
        Self::start_with(|_| {}).await
    }

    pub async fn start_with<F>(configure: F) -> Result<Self>
    where
        F: FnOnce(&mut GatewayConfig),
    {
        let temp_dir = TempDir::new().context("creating harness tempdir")?;
        Self::start_in(temp_dir, configure).await
    }

    /// Starts on an existing directory, so a restarted harness sees the
    /// ledger written by a previous one.
    pub async fn start_in<F>(temp_dir: TempDir, configure: F) -> Result<Self>
    where
        F: FnOnce(&mut GatewayConfig),
    {
        tracing_subscriber::fmt::try_init().ok();

        let mut config = GatewayConfig {
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            data_dir: temp_dir.path().join("gateway"),
            ledger_backend: LedgerBackend::Sqlite,
            admin_api_key: Some(ADMIN_KEY.to_string()),
            stream_poll_interval_ms: 50,
            stream_heartbeat_secs: 1,
            stream_stale_secs: 5,
            watchdog_interval_secs: 1,
            ..GatewayConfig::default()
        };
        configure(&mut config);
        config.validate()?;

        let store = SqliteUsageStore::new(config.data_dir.clone())
            .context("opening harness usage ledger")?;
        let tracker = ConnectionTracker::new(config.max_streams_per_tenant);
        let gateway = Gateway::new(
            QuotaGuard::new(UsageLedger::new(Arc::new(store), config.limits())),
            tracker.clone(),
            Arc::new(InMemoryBroker::default()),
            config.gateway_options(),
        );
        let watchdog = tracker.start_watchdog(config.watchdog_interval(), config.stale_after());

        let router = api::create_router(Arc::new(ApiState::new(gateway.clone(), config)));
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("binding harness listener")?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_rx.await.ok();
                    tracker.shutdown();
                })
                .await;
            if let Err(err) = result {
                error!(error = %err, "harness server failed");
            }
        });

        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("building reqwest client")?;

        let harness = Self {
            base_url: format!("http://{addr}"),
            http_client,
            gateway,
            shutdown: Some(shutdown_tx),
            server: Some(server),
            watchdog,
            temp_dir,
        };
        harness
            .wait_for_health(Duration::from_secs(10))
            .await
            .context("waiting for gateway health")?;
        Ok(harness)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    async fn wait_for_health(&self, timeout: Duration) -> Result<()> {
        let url = self.url("/health");
        let start = Instant::now();
        while start.elapsed() < timeout {
            match self.http_client.get(&url).send().await {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => debug!("health check returned {}", response.status()),
                Err(err) => debug!("health check failed: {err}"),
            }
            sleep(Duration::from_millis(50)).await;
        }
        Err(anyhow!("timeout waiting for gateway health at {url}"))
    }

    pub async fn provision(&self, tenant_id: &str) -> Result<()> {
        let response = self
            .http_client
            .post(self.url(&format!("/api/tenants/{tenant_id}/topic")))
            .send()
            .await
            .context("provisioning tenant topic")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("failed to provision {tenant_id}: {status} {body}"));
        }
        Ok(())
    }

    pub async fn publish(&self, tenant_id: &str, values: &[Value]) -> Result<Response> {
        let messages: Vec<Value> = values.iter().map(|value| json!({ "value": value })).collect();
        self.http_client
            .post(self.url(&format!("/api/tenants/{tenant_id}/publish")))
            .json(&json!({ "messages": messages }))
            .send()
            .await
            .context("publishing")
    }

    pub async fn usage(&self, tenant_id: &str) -> Result<Value> {
        let response = self
            .http_client
            .get(self.url(&format!("/api/tenants/{tenant_id}/usage")))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    pub async fn admin_get(&self, path: &str) -> Result<Value> {
        let response = self
            .http_client
            .get(self.url(path))
            .header("X-Admin-API-Key", ADMIN_KEY)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    pub async fn admin_delete(&self, path: &str) -> Result<StatusCode> {
        let response = self
            .http_client
            .delete(self.url(path))
            .header("X-Admin-API-Key", ADMIN_KEY)
            .send()
            .await?;
        Ok(response.status())
    }

    pub async fn open_stream_response(&self, tenant_id: &str) -> Result<Response> {
        // The stream outlives the client's default request timeout.
        let client = Client::builder().build()?;
        client
            .get(self.url(&format!("/api/tenants/{tenant_id}/stream")))
            .send()
            .await
            .context("opening stream")
    }

    pub async fn open_stream(&self, tenant_id: &str) -> Result<SseClient> {
        let response = self.open_stream_response(tenant_id).await?;
        if response.status() != StatusCode::OK {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("stream for {tenant_id} refused: {status} {body}"));
        }
        Ok(SseClient::new(response))
    }

    pub async fn active_streams(&self) -> Result<u64> {
        let body = self.admin_get("/api/admin/streams").await?;
        body["total"]
            .as_u64()
            .ok_or_else(|| anyhow!("missing total in {body}"))
    }

    pub async fn wait_for_active_streams(&self, expected: u64, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        loop {
            let active = self.active_streams().await?;
            if active == expected {
                return Ok(());
            }
            if start.elapsed() > timeout {
                return Err(anyhow!("expected {expected} active streams, still {active}"));
            }
            sleep(Duration::from_millis(100)).await;
        }
    }

    /// Triggers graceful shutdown, waits for the server to drain and hands
    /// back the data directory.
    pub async fn shutdown(mut self) -> Result<TempDir> {
        if let Some(tx) = self.shutdown.take() {
            tx.send(()).ok();
        }
        if let Some(server) = self.server.take() {
            tokio::time::timeout(Duration::from_secs(10), server)
                .await
                .context("server did not drain")??;
        }
        self.watchdog.abort();

        let placeholder = TempDir::new()?;
        Ok(std::mem::replace(&mut self.temp_dir, placeholder))
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            tx.send(()).ok();
        }
        self.watchdog.abort();
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: Option<String>,
    pub comments: Vec<String>,
}

impl SseFrame {
    fn parse(raw: &str) -> Self {
        let mut frame = SseFrame::default();
        for line in raw.lines() {
            if let Some(comment) = line.strip_prefix(':') {
                frame.comments.push(comment.trim_start().to_string());
            } else if let Some(event) = line.strip_prefix("event:") {
                frame.event = Some(event.trim_start().to_string());
            } else if let Some(data) = line.strip_prefix("data:") {
                let data = data.strip_prefix(' ').unwrap_or(data);
                match frame.data.as_mut() {
                    Some(existing) => {
                        existing.push('\n');
                        existing.push_str(data);
                    }
                    None => frame.data = Some(data.to_string()),
                }
            }
        }
        frame
    }

    pub fn json(&self) -> Option<Value> {
        self.data
            .as_deref()
            .and_then(|data| serde_json::from_str(data).ok())
    }

    pub fn is_end(&self) -> bool {
        self.event.as_deref() == Some("end")
    }

    pub fn is_comment(&self) -> bool {
        self.event.is_none() && self.data.is_none()
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Vec<u8>>> + Send>>;

/// Minimal server-sent events reader over a streaming response body.
pub struct SseClient {
    body: ByteStream,
    buffer: String,
}

impl SseClient {
    pub fn new(response: Response) -> Self {
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()));
        Self {
            body: Box::pin(body),
            buffer: String::new(),
        }
    }

    /// `Ok(None)` when the server ended the stream.
    pub async fn next_frame(&mut self, timeout: Duration) -> Result<Option<SseFrame>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(end) = self.buffer.find("\n\n") {
                let raw: String = self.buffer.drain(..end + 2).collect();
                return Ok(Some(SseFrame::parse(&raw)));
            }

            let chunk = tokio::time::timeout_at(deadline, self.body.next())
                .await
                .map_err(|_| anyhow!("timed out waiting for an SSE frame"))?;
            match chunk {
                Some(bytes) => self.buffer.push_str(&String::from_utf8_lossy(&bytes?)),
                None => return Ok(None),
            }
        }
    }

    /// Next frame carrying data or an event name; heartbeats are skipped.
    pub async fn next_event(&mut self, timeout: Duration) -> Result<Option<SseFrame>> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.next_frame(remaining).await? {
                Some(frame) if frame.is_comment() => continue,
                other => return Ok(other),
            }
        }
    }
}
