// Stats query service
// Answers dashboard stats requests by running independent aggregation
// groups concurrently, each under its own timeout, and merging whatever
// succeeds over zeroed defaults. The query itself never fails.
//
// Numan Thabit 2025 Nov

use crate::buckets::{build_series, TimeSeriesPoint};
use crate::errors::{StoreResult, TelemetryError};
use crate::event::{HttpMethod, StatusCategory};
use crate::keys::Keyspace;
use crate::metrics::QUERY_GROUP_FAILURES;
use crate::ring::{RecentEntry, RecentEventsRing};
use crate::store::{ConnectionState, CounterStore};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Roles counted when no list is configured. Roles outside the list are
/// not reported; enumerating every role key would need a keyspace scan.
pub const DEFAULT_KNOWN_ROLES: [&str; 5] = ["owner", "admin", "manager", "user", "anonymous"];

#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Bound on the up-front reachability check.
    pub health_timeout: Duration,
    /// Bound on each aggregation group.
    pub group_timeout: Duration,
    /// Backstop for the whole query.
    pub global_timeout: Duration,
    pub known_roles: Vec<String>,
    pub hourly_window: usize,
    pub daily_window: usize,
    pub scan_count: usize,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            health_timeout: Duration::from_secs(5),
            group_timeout: Duration::from_secs(3),
            global_timeout: Duration::from_secs(8),
            known_roles: DEFAULT_KNOWN_ROLES.iter().map(|r| r.to_string()).collect(),
            hourly_window: 24,
            daily_window: 30,
            scan_count: 100,
        }
    }
}

/// Aggregated statistics returned to the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub total_requests: i64,
    pub method_counts: BTreeMap<String, i64>,
    pub role_counts: BTreeMap<String, i64>,
    pub role_method_counts: BTreeMap<String, BTreeMap<String, i64>>,
    pub status_counts: BTreeMap<String, i64>,
    pub status_category_counts: BTreeMap<String, i64>,
    pub hourly: Vec<TimeSeriesPoint>,
    pub daily: Vec<TimeSeriesPoint>,
    pub recent_requests: Vec<RecentEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatsSnapshot {
    /// Every known dimension present with a zero count.
    pub fn zeroed(roles: &[String]) -> Self {
        let methods: BTreeMap<String, i64> = HttpMethod::ALL
            .iter()
            .map(|m| (m.as_str().to_string(), 0))
            .collect();
        Self {
            method_counts: methods.clone(),
            role_counts: roles.iter().map(|r| (r.clone(), 0)).collect(),
            role_method_counts: roles.iter().map(|r| (r.clone(), methods.clone())).collect(),
            status_category_counts: StatusCategory::ALL
                .iter()
                .map(|c| (c.as_str().to_string(), 0))
                .collect(),
            ..Default::default()
        }
    }

    /// Zeroed snapshot flagged as degraded with the connection error.
    pub fn degraded(roles: &[String], err: &TelemetryError) -> Self {
        Self {
            status: Some("degraded".to_string()),
            error: Some(err.to_string()),
            ..Self::zeroed(roles)
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.status.as_deref() == Some("degraded")
    }
}

struct Totals {
    total: i64,
    methods: BTreeMap<String, i64>,
}

struct Roles {
    roles: BTreeMap<String, i64>,
    role_methods: BTreeMap<String, BTreeMap<String, i64>>,
}

struct Statuses {
    codes: BTreeMap<String, i64>,
    categories: BTreeMap<String, i64>,
    hourly: Vec<TimeSeriesPoint>,
    daily: Vec<TimeSeriesPoint>,
}

pub struct StatsService {
    store: Arc<dyn CounterStore>,
    ring: RecentEventsRing,
    keys: Keyspace,
    options: QueryOptions,
}

impl StatsService {
    pub fn new(
        store: Arc<dyn CounterStore>,
        ring: RecentEventsRing,
        keys: Keyspace,
        options: QueryOptions,
    ) -> Self {
        Self {
            store,
            ring,
            keys,
            options,
        }
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.store.connection_state()
    }

    /// Current statistics. Never returns an error: an unreachable store
    /// yields a degraded zeroed snapshot, and a failed group leaves its
    /// fields at their zero defaults.
    pub async fn query(&self) -> StatsSnapshot {
        let roles = &self.options.known_roles;
        let started = Instant::now();
        let global = self.options.global_timeout;
        let deadline = started + global;

        let health = tokio::time::timeout(self.options.health_timeout, self.store.ping()).await;
        let health = match health {
            Ok(result) => result,
            Err(_) => Err(TelemetryError::StoreUnavailable(format!(
                "readiness check timed out after {:?}",
                self.options.health_timeout
            ))),
        };
        if let Err(err) = health {
            warn!(error = %err, "stats query degraded: counter store unreachable");
            return StatsSnapshot::degraded(roles, &err);
        }

        let totals = self.spawn_group("totals", totals_group(self.store.clone(), self.keys.clone()));
        let role_group = self.spawn_group(
            "roles",
            roles_group(self.store.clone(), self.keys.clone(), roles.clone()),
        );
        let statuses = self.spawn_group(
            "statuses",
            statuses_group(self.store.clone(), self.keys.clone(), self.options.clone()),
        );
        let ring = self.ring.clone();
        let recent = self.spawn_group("recent", async move { ring.read_all().await });

        let mut failed = Vec::new();
        let mut snapshot = StatsSnapshot::zeroed(roles);

        if let Some(t) = collect("totals", totals, deadline, global, &mut failed).await {
            snapshot.total_requests = t.total;
            snapshot.method_counts = t.methods;
        }
        if let Some(r) = collect("roles", role_group, deadline, global, &mut failed).await {
            snapshot.role_counts = r.roles;
            snapshot.role_method_counts = r.role_methods;
        }
        if let Some(s) = collect("statuses", statuses, deadline, global, &mut failed).await {
            snapshot.status_counts = s.codes;
            snapshot.status_category_counts = s.categories;
            snapshot.hourly = s.hourly;
            snapshot.daily = s.daily;
        }
        if let Some(entries) = collect("recent", recent, deadline, global, &mut failed).await {
            snapshot.recent_requests = entries;
        }

        if !failed.is_empty() {
            let err = TelemetryError::PartialAggregation(failed);
            warn!(error = %err, "stats query returned partial results");
        }
        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            total = snapshot.total_requests,
            "stats query complete"
        );
        snapshot
    }

    /// Run one group on its own task under the per-group timeout.
    fn spawn_group<T, Fut>(&self, group: &'static str, fut: Fut) -> JoinHandle<StoreResult<T>>
    where
        T: Send + 'static,
        Fut: Future<Output = StoreResult<T>> + Send + 'static,
    {
        let limit = self.options.group_timeout;
        tokio::spawn(async move {
            match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(TelemetryError::StoreTimeout {
                    op: group,
                    after: limit,
                }),
            }
        })
    }
}

/// Await a group's task until the global deadline; any failure is logged,
/// counted and reported as `None`.
async fn collect<T>(
    group: &'static str,
    mut handle: JoinHandle<StoreResult<T>>,
    deadline: Instant,
    global: Duration,
    failed: &mut Vec<&'static str>,
) -> Option<T> {
    let outcome = match tokio::time::timeout_at(deadline, &mut handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(TelemetryError::Command(format!("group task failed: {join_err}"))),
        Err(_) => {
            handle.abort();
            Err(TelemetryError::StoreTimeout {
                op: group,
                after: global,
            })
        }
    };
    match outcome {
        Ok(value) => Some(value),
        Err(err) => {
            QUERY_GROUP_FAILURES.with_label_values(&[group]).inc();
            warn!(group, error = %err, "stats group failed; using defaults");
            failed.push(group);
            None
        }
    }
}

async fn totals_group(store: Arc<dyn CounterStore>, keys: Keyspace) -> StoreResult<Totals> {
    let mut wanted = vec![keys.total_requests()];
    wanted.extend(HttpMethod::ALL.iter().map(|m| keys.method(*m)));
    let values = store.get_counters(&wanted).await?;

    let total = values.first().copied().unwrap_or(0);
    let methods = HttpMethod::ALL
        .iter()
        .zip(values.iter().skip(1))
        .map(|(m, v)| (m.as_str().to_string(), *v))
        .collect();
    Ok(Totals { total, methods })
}

async fn roles_group(
    store: Arc<dyn CounterStore>,
    keys: Keyspace,
    roles: Vec<String>,
) -> StoreResult<Roles> {
    // Per role: the role total followed by one counter per method.
    let stride = 1 + HttpMethod::ALL.len();
    let mut wanted = Vec::with_capacity(roles.len() * stride);
    for role in &roles {
        wanted.push(keys.role(role));
        wanted.extend(HttpMethod::ALL.iter().map(|m| keys.role_method(role, *m)));
    }
    let values = store.get_counters(&wanted).await?;

    let mut out = Roles {
        roles: BTreeMap::new(),
        role_methods: BTreeMap::new(),
    };
    for (role, chunk) in roles.iter().zip(values.chunks(stride)) {
        out.roles.insert(role.clone(), chunk[0]);
        let per_method = HttpMethod::ALL
            .iter()
            .zip(&chunk[1..])
            .map(|(m, v)| (m.as_str().to_string(), *v))
            .collect();
        out.role_methods.insert(role.clone(), per_method);
    }
    Ok(out)
}

async fn statuses_group(
    store: Arc<dyn CounterStore>,
    keys: Keyspace,
    options: QueryOptions,
) -> StoreResult<Statuses> {
    let code_keys = store
        .scan_keys(&keys.status_pattern(), options.scan_count)
        .await?;
    let code_keys: Vec<(u16, String)> = code_keys
        .into_iter()
        .filter_map(|k| keys.parse_status(&k).map(|code| (code, k)))
        .collect();

    let mut wanted: Vec<String> = StatusCategory::ALL
        .iter()
        .map(|c| keys.status_category(*c))
        .collect();
    wanted.extend(code_keys.iter().map(|(_, k)| k.clone()));
    let values = store.get_counters(&wanted).await?;
    let (category_values, code_values) = values.split_at(StatusCategory::ALL.len().min(values.len()));

    let categories = StatusCategory::ALL
        .iter()
        .zip(category_values)
        .map(|(c, v)| (c.as_str().to_string(), *v))
        .collect();
    let codes = code_keys
        .iter()
        .zip(code_values)
        .map(|((code, _), v)| (code.to_string(), *v))
        .collect();

    let hourly = store.hash_get_all(&keys.hourly_status()).await?;
    let daily = store.hash_get_all(&keys.daily_status()).await?;

    Ok(Statuses {
        codes,
        categories,
        hourly: build_series(&hourly, options.hourly_window),
        daily: build_series(&daily, options.daily_window),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_snapshot_has_every_dimension() {
        let roles = vec!["admin".to_string(), "user".to_string()];
        let snap = StatsSnapshot::zeroed(&roles);
        assert_eq!(snap.method_counts.len(), HttpMethod::ALL.len());
        assert_eq!(snap.role_counts.get("admin"), Some(&0));
        assert_eq!(snap.role_method_counts["user"]["GET"], 0);
        assert_eq!(snap.status_category_counts.get("5xx"), Some(&0));
        assert!(!snap.is_degraded());
    }

    #[test]
    fn degraded_snapshot_serializes_annotation() {
        let err = TelemetryError::StoreUnavailable("refused".into());
        let snap = StatsSnapshot::degraded(&[], &err);
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["error"], "counter store unavailable: refused");
        assert_eq!(json["totalRequests"], 0);

        let healthy = serde_json::to_value(StatsSnapshot::zeroed(&[])).unwrap();
        assert!(healthy.get("status").is_none());
    }

    #[tokio::test]
    async fn collect_aborts_group_past_deadline() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle: JoinHandle<StoreResult<u32>> = tokio::spawn(async move {
            let _held = tx;
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(1)
        });
        let limit = Duration::from_millis(50);
        let mut failed = Vec::new();
        let out = collect("slow", handle, Instant::now() + limit, limit, &mut failed).await;
        assert!(out.is_none());
        assert_eq!(failed, vec!["slow"]);
        // the aborted task drops its sender
        let closed = tokio::time::timeout(Duration::from_secs(1), rx).await.unwrap();
        assert!(closed.is_err());
    }
}
