//! Shared helpers for the integration tests: a fault-injecting wrapper
//! around the in-memory store and a one-call service builder.

#![allow(dead_code)]

use async_trait::async_trait;
use req_telemetry::http::ApiState;
use req_telemetry::keys::Keyspace;
use req_telemetry::query::QueryOptions;
use req_telemetry::role::{RoleResolver, StaticTokenResolver};
use req_telemetry::store::{Batch, ConnectionState, CounterStore, MemoryStore};
use req_telemetry::{StoreResult, TelemetryError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Wraps a [`MemoryStore`] and fails or delays selected primitives.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub fail_list_range: AtomicBool,
    /// Delay applied to `hash_get_all`, in milliseconds.
    pub hash_delay_ms: AtomicU64,
    /// Delay applied to `ping`, in milliseconds.
    pub ping_delay_ms: AtomicU64,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn delay(ms: &AtomicU64) {
        let ms = ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

#[async_trait]
impl CounterStore for FlakyStore {
    async fn ping(&self) -> StoreResult<()> {
        Self::delay(&self.ping_delay_ms).await;
        self.inner.ping().await
    }

    async fn increment(&self, key: &str) -> StoreResult<i64> {
        self.inner.increment(key).await
    }

    async fn hash_increment(&self, key: &str, field: &str, amount: i64) -> StoreResult<i64> {
        self.inner.hash_increment(key, field, amount).await
    }

    async fn list_push(&self, key: &str, value: &str) -> StoreResult<usize> {
        self.inner.list_push(key, value).await
    }

    async fn list_trim(&self, key: &str, start: isize, stop: isize) -> StoreResult<()> {
        self.inner.list_trim(key, start, stop).await
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        if self.fail_list_range.load(Ordering::SeqCst) {
            return Err(TelemetryError::StoreTimeout {
                op: "lrange",
                after: Duration::from_secs(2),
            });
        }
        self.inner.list_range(key, start, stop).await
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, i64>> {
        Self::delay(&self.hash_delay_ms).await;
        self.inner.hash_get_all(key).await
    }

    async fn get_counters(&self, keys: &[String]) -> StoreResult<Vec<i64>> {
        self.inner.get_counters(keys).await
    }

    async fn scan_page(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> StoreResult<(u64, Vec<String>)> {
        self.inner.scan_page(cursor, pattern, count).await
    }

    async fn delete_keys(&self, keys: &[String]) -> StoreResult<usize> {
        self.inner.delete_keys(keys).await
    }

    async fn execute(&self, batch: Batch) -> StoreResult<()> {
        self.inner.execute(batch).await
    }

    fn connection_state(&self) -> ConnectionState {
        self.inner.connection_state()
    }
}

pub const ADMIN_TOKEN: &str = "admin-token";
pub const USER_TOKEN: &str = "user-token";

pub fn resolver() -> Arc<dyn RoleResolver> {
    Arc::new(
        StaticTokenResolver::parse(&format!("{ADMIN_TOKEN}=admin;{USER_TOKEN}=user")).unwrap(),
    )
}

pub fn fast_query_options() -> QueryOptions {
    QueryOptions {
        health_timeout: Duration::from_millis(200),
        group_timeout: Duration::from_millis(200),
        global_timeout: Duration::from_millis(600),
        ..Default::default()
    }
}

/// Services wired around `store` with default keys and a 1000-entry ring.
pub fn services(store: Arc<dyn CounterStore>, query: QueryOptions) -> ApiState {
    ApiState::new(store, resolver(), Keyspace::default(), 1000, query, 500)
}
