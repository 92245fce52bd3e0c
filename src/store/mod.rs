// Counter store client
// Defines the atomic primitives the aggregator needs from the shared
// key-value store, the pipelined batch construct, and the two backends
//
// Numan Thabit 2025 Nov

pub mod memory;
pub mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::{RedisStore, StoreOptions};

use crate::errors::StoreResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;

/// One write queued in a [`Batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Incr { key: String },
    HashIncr { key: String, field: String, amount: i64 },
    ListPush { key: String, value: String },
    ListTrim { key: String, start: isize, stop: isize },
}

/// Several primitive writes sent to the store as one pipelined unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    ops: Vec<StoreOp>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(StoreOp::Incr { key: key.into() });
        self
    }

    pub fn hash_incr(
        &mut self,
        key: impl Into<String>,
        field: impl Into<String>,
        amount: i64,
    ) -> &mut Self {
        self.ops.push(StoreOp::HashIncr {
            key: key.into(),
            field: field.into(),
            amount,
        });
        self
    }

    /// Push onto the head of a list.
    pub fn list_push(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.ops.push(StoreOp::ListPush {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn list_trim(&mut self, key: impl Into<String>, start: isize, stop: isize) -> &mut Self {
        self.ops.push(StoreOp::ListTrim {
            key: key.into(),
            start,
            stop,
        });
        self
    }

    pub fn ops(&self) -> &[StoreOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
}

impl ConnectionState {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Ready,
            _ => ConnectionState::Disconnected,
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Ready => 2,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Ready => "ready",
        })
    }
}

/// Atomic primitives over the shared counter store.
///
/// Implementations must be safe for concurrent use from many tasks without
/// external locking. Callers never retry; a failed call is reported as
/// `StoreUnavailable` or `StoreTimeout` and the caller decides how to degrade.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Readiness check; establishes the connection if needed.
    async fn ping(&self) -> StoreResult<()>;

    async fn increment(&self, key: &str) -> StoreResult<i64>;

    async fn hash_increment(&self, key: &str, field: &str, amount: i64) -> StoreResult<i64>;

    /// Push onto the head of a list, returning the new length.
    async fn list_push(&self, key: &str, value: &str) -> StoreResult<usize>;

    async fn list_trim(&self, key: &str, start: isize, stop: isize) -> StoreResult<()>;

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>>;

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, i64>>;

    /// Read integer counters; missing keys read as zero.
    async fn get_counters(&self, keys: &[String]) -> StoreResult<Vec<i64>>;

    /// One bounded scan step. A returned cursor of 0 means the scan is complete.
    async fn scan_page(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> StoreResult<(u64, Vec<String>)>;

    async fn delete_keys(&self, keys: &[String]) -> StoreResult<usize>;

    /// Execute every op of `batch` in one round trip.
    async fn execute(&self, batch: Batch) -> StoreResult<()>;

    fn connection_state(&self) -> ConnectionState;

    /// Enumerate every key matching `pattern` with repeated bounded scans.
    async fn scan_keys(&self, pattern: &str, count: usize) -> StoreResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut cursor = 0u64;
        loop {
            let (next, page) = self.scan_page(cursor, pattern, count).await?;
            keys.extend(page);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN may return a key more than once
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

/// Start a new pipelined batch.
pub fn pipeline() -> Batch {
    Batch::new()
}
