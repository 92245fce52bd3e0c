// Configuration management module
// This file handles loading the aggregator settings from environment
// variables (TELEMETRY__*) on top of built-in defaults
//
// Numan Thabit 2025 Nov

use crate::keys::DEFAULT_PREFIX;
use crate::query::{QueryOptions, DEFAULT_KNOWN_ROLES};
use crate::ring::DEFAULT_CAPACITY;
use crate::store::StoreOptions;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// HTTP listen address, e.g. 0.0.0.0:8080
    pub listen_addr: String,
    /// Counter store endpoint, e.g. redis://:password@127.0.0.1:6379/0
    pub redis_url: Url,
    /// Namespace prefix for every telemetry key
    pub key_prefix: String,
    /// Number of recent events retained
    pub recent_capacity: usize,
    /// Roles reported by the stats query
    pub known_roles: Vec<String>,
    pub connect_timeout_ms: u64,
    pub op_timeout_ms: u64,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    pub reconnect_retries: usize,
    pub health_timeout_ms: u64,
    pub group_timeout_ms: u64,
    pub global_timeout_ms: u64,
    /// Hourly buckets returned by the stats query
    pub hourly_window: usize,
    /// Daily buckets returned by the stats query
    pub daily_window: usize,
    /// Keys requested per SCAN step
    pub scan_count: usize,
    /// Keys per DEL call during reset
    pub delete_batch: usize,
    /// Static bearer tokens as `token=role;token=role` (optional)
    pub role_tokens: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        Self::load_from(config::Environment::with_prefix("TELEMETRY"))
    }

    /// Load from the given environment source layered over the defaults.
    pub fn load_from(env: config::Environment) -> Result<Self> {
        let roles: Vec<String> = DEFAULT_KNOWN_ROLES.iter().map(|r| r.to_string()).collect();
        let cfg = config::Config::builder()
            .set_default("listen_addr", "0.0.0.0:8080")?
            .set_default("redis_url", "redis://127.0.0.1:6379")?
            .set_default("key_prefix", DEFAULT_PREFIX)?
            .set_default("recent_capacity", DEFAULT_CAPACITY as i64)?
            .set_default("known_roles", roles)?
            .set_default("connect_timeout_ms", 5_000_i64)?
            .set_default("op_timeout_ms", 2_000_i64)?
            .set_default("reconnect_base_ms", 100_i64)?
            .set_default("reconnect_max_ms", 5_000_i64)?
            .set_default("reconnect_retries", 6_i64)?
            .set_default("health_timeout_ms", 5_000_i64)?
            .set_default("group_timeout_ms", 3_000_i64)?
            .set_default("global_timeout_ms", 8_000_i64)?
            .set_default("hourly_window", 24_i64)?
            .set_default("daily_window", 30_i64)?
            .set_default("scan_count", 100_i64)?
            .set_default("delete_batch", 500_i64)?
            .add_source(
                env.separator("__")
                    .list_separator(",")
                    .with_list_parse_key("known_roles")
                    .try_parsing(true),
            )
            .build()
            .context("build configuration")?;
        let app: AppConfig = cfg.try_deserialize().context("deserialize configuration")?;
        app.validate()?;
        Ok(app)
    }

    fn validate(&self) -> Result<()> {
        if !matches!(self.redis_url.scheme(), "redis" | "rediss") {
            bail!("unsupported counter store scheme: {}", self.redis_url.scheme());
        }
        if self.recent_capacity == 0 {
            bail!("TELEMETRY__RECENT_CAPACITY must be at least 1");
        }
        if self.key_prefix.is_empty() {
            bail!("TELEMETRY__KEY_PREFIX must not be empty");
        }
        if self.group_timeout_ms > self.global_timeout_ms {
            bail!("group timeout must not exceed the global query timeout");
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", self.listen_addr))
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            op_timeout: Duration::from_millis(self.op_timeout_ms),
            reconnect_base: Duration::from_millis(self.reconnect_base_ms),
            reconnect_max: Duration::from_millis(self.reconnect_max_ms),
            reconnect_retries: self.reconnect_retries,
        }
    }

    pub fn query_options(&self) -> QueryOptions {
        QueryOptions {
            health_timeout: Duration::from_millis(self.health_timeout_ms),
            group_timeout: Duration::from_millis(self.group_timeout_ms),
            global_timeout: Duration::from_millis(self.global_timeout_ms),
            known_roles: self.known_roles.clone(),
            hourly_window: self.hourly_window,
            daily_window: self.daily_window,
            scan_count: self.scan_count,
        }
    }
}
