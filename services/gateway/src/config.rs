use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::gateway::{GatewayOptions, DEFAULT_MAX_PAYLOAD_BYTES};
use crate::ratelimit::{DEFAULT_RATE_LIMIT_PERIOD, DEFAULT_RATE_LIMIT_REQUESTS};
use crate::ledger::{
    LimitSet, QuotaLimit, FREE_TIER_BYTES_LIMIT, FREE_TIER_MESSAGES_LIMIT, GLOBAL_BYTES_LIMIT,
    GLOBAL_MESSAGES_LIMIT,
};
use crate::stream::SessionConfig;
use crate::tracker::DEFAULT_MAX_STREAMS_PER_TENANT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerBackend {
    Sqlite,
    Memory,
}

impl FromStr for LedgerBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(LedgerBackend::Sqlite),
            "memory" => Ok(LedgerBackend::Memory),
            _ => anyhow::bail!("invalid ledger backend {value}, expected sqlite or memory"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub server_host: String,
    pub server_port: u16,
    pub data_dir: PathBuf,
    pub ledger_backend: LedgerBackend,
    pub tenant_daily_messages: u64,
    pub tenant_daily_bytes: u64,
    pub global_daily_messages: u64,
    pub global_daily_bytes: u64,
    pub max_streams_per_tenant: usize,
    pub max_payload_bytes: u64,
    pub stream_poll_interval_ms: u64,
    pub stream_heartbeat_secs: u64,
    pub stream_max_batch: usize,
    pub stream_stale_secs: u64,
    pub watchdog_interval_secs: u64,
    pub topic_retention_secs: u64,
    pub admin_api_key: Option<String>,
    pub request_timeout_secs: u64,
    pub rate_limit_requests: u32,
    pub rate_limit_period_secs: u64,
    pub log_level: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: 8190,
            data_dir: PathBuf::from("data/gateway"),
            ledger_backend: LedgerBackend::Sqlite,
            tenant_daily_messages: FREE_TIER_MESSAGES_LIMIT,
            tenant_daily_bytes: FREE_TIER_BYTES_LIMIT,
            global_daily_messages: GLOBAL_MESSAGES_LIMIT,
            global_daily_bytes: GLOBAL_BYTES_LIMIT,
            max_streams_per_tenant: DEFAULT_MAX_STREAMS_PER_TENANT,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            stream_poll_interval_ms: 1_000,
            stream_heartbeat_secs: 20,
            stream_max_batch: 50,
            stream_stale_secs: 90,
            watchdog_interval_secs: 5,
            topic_retention_secs: 24 * 60 * 60,
            admin_api_key: None,
            request_timeout_secs: 30,
            rate_limit_requests: DEFAULT_RATE_LIMIT_REQUESTS,
            rate_limit_period_secs: DEFAULT_RATE_LIMIT_PERIOD.as_secs(),
            log_level: "info".to_string(),
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(host) = lookup("GATEWAY_HOST") {
            cfg.server_host = host;
        }
        parse_into(&lookup, "GATEWAY_PORT", &mut cfg.server_port)?;
        if let Some(dir) = lookup("GATEWAY_DATA_DIR") {
            cfg.data_dir = PathBuf::from(dir);
        }
        parse_into(&lookup, "LEDGER_BACKEND", &mut cfg.ledger_backend)?;
        parse_into(&lookup, "TENANT_DAILY_MESSAGES", &mut cfg.tenant_daily_messages)?;
        parse_into(&lookup, "TENANT_DAILY_BYTES", &mut cfg.tenant_daily_bytes)?;
        parse_into(&lookup, "GLOBAL_DAILY_MESSAGES", &mut cfg.global_daily_messages)?;
        parse_into(&lookup, "GLOBAL_DAILY_BYTES", &mut cfg.global_daily_bytes)?;
        parse_into(&lookup, "MAX_STREAMS_PER_TENANT", &mut cfg.max_streams_per_tenant)?;
        parse_into(&lookup, "MAX_PAYLOAD_BYTES", &mut cfg.max_payload_bytes)?;
        parse_into(&lookup, "STREAM_POLL_INTERVAL_MS", &mut cfg.stream_poll_interval_ms)?;
        parse_into(&lookup, "STREAM_HEARTBEAT_SECS", &mut cfg.stream_heartbeat_secs)?;
        parse_into(&lookup, "STREAM_MAX_BATCH", &mut cfg.stream_max_batch)?;
        parse_into(&lookup, "STREAM_STALE_SECS", &mut cfg.stream_stale_secs)?;
        parse_into(&lookup, "WATCHDOG_INTERVAL_SECS", &mut cfg.watchdog_interval_secs)?;
        parse_into(&lookup, "TOPIC_RETENTION_SECS", &mut cfg.topic_retention_secs)?;
        if let Some(key) = lookup("ADMIN_API_KEY").filter(|key| !key.is_empty()) {
            cfg.admin_api_key = Some(key);
        }
        parse_into(&lookup, "REQUEST_TIMEOUT_SECS", &mut cfg.request_timeout_secs)?;
        parse_into(&lookup, "RATE_LIMIT_REQUESTS", &mut cfg.rate_limit_requests)?;
        parse_into(&lookup, "RATE_LIMIT_PERIOD_SECS", &mut cfg.rate_limit_period_secs)?;
        if let Some(level) = lookup("LOG_LEVEL") {
            cfg.log_level = level;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ledger_backend == LedgerBackend::Sqlite {
            ensure_directory(&self.data_dir)?;
        }

        if self.tenant_daily_messages == 0 || self.tenant_daily_bytes == 0 {
            anyhow::bail!("tenant daily limits must be greater than zero");
        }
        if self.global_daily_messages == 0 || self.global_daily_bytes == 0 {
            anyhow::bail!("global daily limits must be greater than zero");
        }
        if self.max_streams_per_tenant == 0 {
            anyhow::bail!("MAX_STREAMS_PER_TENANT must be greater than zero");
        }
        if self.max_payload_bytes == 0 {
            anyhow::bail!("MAX_PAYLOAD_BYTES must be greater than zero");
        }
        if self.stream_poll_interval_ms == 0 || self.stream_max_batch == 0 {
            anyhow::bail!("STREAM_POLL_INTERVAL_MS and STREAM_MAX_BATCH must be greater than zero");
        }
        if self.stream_heartbeat_secs == 0 || self.watchdog_interval_secs == 0 {
            anyhow::bail!("STREAM_HEARTBEAT_SECS and WATCHDOG_INTERVAL_SECS must be greater than zero");
        }
        if self.stream_stale_secs <= self.stream_heartbeat_secs {
            anyhow::bail!(
                "STREAM_STALE_SECS ({}) must exceed STREAM_HEARTBEAT_SECS ({})",
                self.stream_stale_secs,
                self.stream_heartbeat_secs
            );
        }
        if self.topic_retention_secs == 0 || self.request_timeout_secs == 0 {
            anyhow::bail!("TOPIC_RETENTION_SECS and REQUEST_TIMEOUT_SECS must be greater than zero");
        }
        if self.rate_limit_requests == 0 || self.rate_limit_period_secs == 0 {
            anyhow::bail!("RATE_LIMIT_REQUESTS and RATE_LIMIT_PERIOD_SECS must be greater than zero");
        }

        Ok(())
    }

    pub fn limits(&self) -> LimitSet {
        LimitSet::new(
            QuotaLimit::new(self.tenant_daily_messages, self.tenant_daily_bytes),
            QuotaLimit::new(self.global_daily_messages, self.global_daily_bytes),
        )
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            poll_interval: Duration::from_millis(self.stream_poll_interval_ms),
            heartbeat_interval: Duration::from_secs(self.stream_heartbeat_secs),
            max_batch: self.stream_max_batch,
        }
    }

    pub fn gateway_options(&self) -> GatewayOptions {
        GatewayOptions {
            max_payload_bytes: self.max_payload_bytes,
            session: self.session_config(),
        }
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stream_stale_secs)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs)
    }

    pub fn topic_retention(&self) -> Duration {
        Duration::from_secs(self.topic_retention_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn rate_limit_period(&self) -> Duration {
        Duration::from_secs(self.rate_limit_period_secs)
    }
}

fn parse_into<F, T>(lookup: &F, name: &str, target: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(name) {
        *target = raw
            .trim()
            .parse()
            .map_err(|err| anyhow::anyhow!("{name} is invalid ({raw}): {err}"))?;
    }
    Ok(())
}

fn ensure_directory(path: &Path) -> Result<()> {
    if path.exists() {
        if !path.is_dir() {
            anyhow::bail!("{} exists but is not a directory", path.display());
        }
    } else {
        fs::create_dir_all(path)
            .with_context(|| format!("unable to create data directory {}", path.display()))?;
    }
    Ok(())
}
