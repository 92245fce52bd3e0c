// Redis-backed counter store
// Lazily connects on first use, gates every call on a readiness check and
// leaves reconnection to the connection manager's capped exponential backoff
//
// Numan Thabit 2025 Nov

use super::{Batch, ConnectionState, CounterStore, StoreOp};
use crate::errors::{StoreResult, TelemetryError};
use crate::metrics::{STORE_ERRORS, STORE_LATENCY};
use ::redis::aio::{ConnectionManager, ConnectionManagerConfig};
use ::redis::{AsyncCommands, RedisError};
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Connection and timeout tuning for [`RedisStore`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Bound on establishing (or re-validating) the connection.
    pub connect_timeout: Duration,
    /// Bound on any single command or pipeline.
    pub op_timeout: Duration,
    /// First reconnect delay.
    pub reconnect_base: Duration,
    /// Cap on the reconnect delay.
    pub reconnect_max: Duration,
    pub reconnect_retries: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            op_timeout: Duration::from_secs(2),
            reconnect_base: Duration::from_millis(100),
            reconnect_max: Duration::from_secs(5),
            reconnect_retries: 6,
        }
    }
}

/// Shared, concurrency-safe client over one multiplexed Redis connection.
pub struct RedisStore {
    client: ::redis::Client,
    options: StoreOptions,
    conn: RwLock<Option<ConnectionManager>>,
    connect_lock: Mutex<()>,
    state: AtomicU8,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("redis", &"<ConnectionManager>")
            .field("options", &self.options)
            .field("state", &self.connection_state())
            .finish()
    }
}

impl RedisStore {
    /// Create the client without connecting; the first call connects.
    pub fn new(redis_url: &str, options: StoreOptions) -> StoreResult<Self> {
        let client = ::redis::Client::open(redis_url)
            .map_err(|e| TelemetryError::StoreUnavailable(format!("invalid redis url: {e}")))?;
        Ok(Self {
            client,
            options,
            conn: RwLock::new(None),
            connect_lock: Mutex::new(()),
            state: AtomicU8::new(ConnectionState::Disconnected.as_u8()),
        })
    }

    fn set_state(&self, state: ConnectionState) {
        let prev = ConnectionState::from_u8(self.state.swap(state.as_u8(), Ordering::SeqCst));
        if prev != state {
            debug!(from = %prev, to = %state, "counter store connection state");
        }
    }

    fn manager_config(&self) -> ConnectionManagerConfig {
        let base_ms = self.options.reconnect_base.as_millis().max(1) as u64;
        ConnectionManagerConfig::new()
            .set_exponent_base(2)
            .set_factor(base_ms)
            .set_max_delay(self.options.reconnect_max.as_millis() as u64)
            .set_number_of_retries(self.options.reconnect_retries)
            .set_connection_timeout(self.options.connect_timeout)
            .set_response_timeout(self.options.op_timeout)
    }

    /// Readiness gate: hand out the live connection, or connect within
    /// `connect_timeout`, failing with `StoreUnavailable`.
    async fn connection(&self) -> StoreResult<ConnectionManager> {
        if self.connection_state() == ConnectionState::Ready {
            if let Some(conn) = self.conn.read().await.as_ref() {
                return Ok(conn.clone());
            }
        }
        match tokio::time::timeout(self.options.connect_timeout, self.connect()).await {
            Ok(result) => result,
            Err(_) => {
                self.set_state(ConnectionState::Disconnected);
                warn!(
                    timeout_ms = self.options.connect_timeout.as_millis() as u64,
                    "counter store connect timed out"
                );
                Err(TelemetryError::StoreUnavailable(format!(
                    "connect timed out after {:?}",
                    self.options.connect_timeout
                )))
            }
        }
    }

    async fn connect(&self) -> StoreResult<ConnectionManager> {
        let _guard = self.connect_lock.lock().await;
        let existing = self.conn.read().await.clone();
        if let (ConnectionState::Ready, Some(conn)) = (self.connection_state(), &existing) {
            return Ok(conn.clone());
        }
        self.set_state(ConnectionState::Connecting);

        let result = match existing {
            // The manager reconnects by itself; only confirm it is serving again.
            Some(mut conn) => {
                let pong: Result<String, RedisError> =
                    ::redis::cmd("PING").query_async(&mut conn).await;
                pong.map(|_| conn)
                    .map_err(|e| classify("connect", self.options.connect_timeout, e))
            }
            None => self.open_manager().await,
        };

        match result {
            Ok(conn) => {
                *self.conn.write().await = Some(conn.clone());
                self.set_state(ConnectionState::Ready);
                info!("counter store connection ready");
                Ok(conn)
            }
            Err(err) => {
                self.set_state(ConnectionState::Disconnected);
                warn!(error = %err, "counter store connect failed");
                Err(err)
            }
        }
    }

    async fn open_manager(&self) -> StoreResult<ConnectionManager> {
        let backoff = ExponentialBackoff {
            initial_interval: self.options.reconnect_base,
            max_interval: self.options.reconnect_max,
            max_elapsed_time: Some(self.options.connect_timeout),
            multiplier: 2.0,
            ..Default::default()
        };
        retry(backoff, || async {
            ConnectionManager::new_with_config(self.client.clone(), self.manager_config())
                .await
                .map_err(|e| {
                    let err = classify("connect", self.options.connect_timeout, e);
                    if err.is_connectivity() {
                        backoff::Error::transient(err)
                    } else {
                        backoff::Error::permanent(err)
                    }
                })
        })
        .await
    }

    /// Run one command against the gated connection under `op_timeout`,
    /// recording latency and errors.
    async fn run<T, F, Fut>(&self, op: &'static str, f: F) -> StoreResult<T>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: Future<Output = Result<T, RedisError>>,
    {
        let _timer = STORE_LATENCY.with_label_values(&[op]).start_timer();
        let result = match self.connection().await {
            Ok(conn) => match tokio::time::timeout(self.options.op_timeout, f(conn)).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(classify(op, self.options.op_timeout, e)),
                Err(_) => Err(TelemetryError::StoreTimeout {
                    op,
                    after: self.options.op_timeout,
                }),
            },
            Err(err) => Err(err),
        };
        if let Err(err) = &result {
            STORE_ERRORS.with_label_values(&[op, err.kind()]).inc();
            if matches!(err, TelemetryError::StoreUnavailable(_)) {
                self.set_state(ConnectionState::Disconnected);
            }
        }
        result
    }
}

/// Map a driver error onto the store error taxonomy.
fn classify(op: &'static str, after: Duration, err: RedisError) -> TelemetryError {
    if err.is_timeout() {
        TelemetryError::StoreTimeout { op, after }
    } else if err.is_connection_dropped() || err.is_connection_refusal() || err.is_io_error() {
        TelemetryError::StoreUnavailable(err.to_string())
    } else {
        TelemetryError::Command(err.to_string())
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn ping(&self) -> StoreResult<()> {
        self.run("ping", |mut conn| async move {
            let _: String = ::redis::cmd("PING").query_async(&mut conn).await?;
            Ok::<(), RedisError>(())
        })
        .await
    }

    async fn increment(&self, key: &str) -> StoreResult<i64> {
        self.run("incr", |mut conn| async move { conn.incr(key, 1).await })
            .await
    }

    async fn hash_increment(&self, key: &str, field: &str, amount: i64) -> StoreResult<i64> {
        self.run("hincrby", |mut conn| async move {
            conn.hincr(key, field, amount).await
        })
        .await
    }

    async fn list_push(&self, key: &str, value: &str) -> StoreResult<usize> {
        self.run("lpush", |mut conn| async move { conn.lpush(key, value).await })
            .await
    }

    async fn list_trim(&self, key: &str, start: isize, stop: isize) -> StoreResult<()> {
        self.run("ltrim", |mut conn| async move {
            conn.ltrim(key, start, stop).await
        })
        .await
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        self.run("lrange", |mut conn| async move {
            conn.lrange(key, start, stop).await
        })
        .await
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, i64>> {
        self.run("hgetall", |mut conn| async move { conn.hgetall(key).await })
            .await
    }

    async fn get_counters(&self, keys: &[String]) -> StoreResult<Vec<i64>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let values: Vec<Option<i64>> = self
            .run("mget", |mut conn| async move {
                ::redis::cmd("MGET")
                    .arg(keys)
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(values.into_iter().map(|v| v.unwrap_or(0)).collect())
    }

    async fn scan_page(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> StoreResult<(u64, Vec<String>)> {
        self.run("scan", |mut conn| async move {
            ::redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(count)
                .query_async(&mut conn)
                .await
        })
        .await
    }

    async fn delete_keys(&self, keys: &[String]) -> StoreResult<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.run("del", |mut conn| async move { conn.del(keys).await })
            .await
    }

    async fn execute(&self, batch: Batch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut pipe = ::redis::pipe();
        pipe.atomic();
        for op in batch.ops() {
            match op {
                StoreOp::Incr { key } => {
                    pipe.incr(key, 1).ignore();
                }
                StoreOp::HashIncr { key, field, amount } => {
                    pipe.hincr(key, field, *amount).ignore();
                }
                StoreOp::ListPush { key, value } => {
                    pipe.lpush(key, value).ignore();
                }
                StoreOp::ListTrim { key, start, stop } => {
                    pipe.ltrim(key, *start, *stop).ignore();
                }
            }
        }
        self.run("pipeline", |mut conn| async move {
            pipe.query_async(&mut conn).await
        })
        .await
    }

    fn connection_state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }
}
