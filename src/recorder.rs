// Request recorder
// Middleware that records every request/response pair into the counter
// store. Both recording stages are detached, best-effort tasks: a store
// failure is logged and dropped and never reaches the HTTP caller.
//
// Numan Thabit 2025 Nov

use crate::buckets::{bucket_field, day_key, hour_key};
use crate::errors::StoreResult;
use crate::event::{now_millis, HttpMethod, RequestEvent};
use crate::keys::Keyspace;
use crate::metrics::RECORDING_DROPPED;
use crate::ring::RecentEventsRing;
use crate::role::{resolve_or_anonymous, RoleResolver};
use crate::store::{pipeline, CounterStore};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::USER_AGENT;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

const UNKNOWN: &str = "unknown";

/// Dimensions captured when a request enters the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestContext {
    pub timestamp: DateTime<Utc>,
    pub method: HttpMethod,
    pub path: String,
    pub role: String,
    pub client_address: String,
    pub user_agent: String,
}

impl RequestContext {
    /// Complete the context into an event once the status code is final.
    pub fn finish(self, status_code: u16) -> RequestEvent {
        RequestEvent {
            timestamp: self.timestamp,
            method: self.method,
            path: self.path,
            role: self.role,
            client_address: self.client_address,
            user_agent: self.user_agent,
            status_code,
        }
    }
}

pub struct RequestRecorder {
    store: Arc<dyn CounterStore>,
    resolver: Arc<dyn RoleResolver>,
    keys: Keyspace,
    ring: RecentEventsRing,
    tasks: TaskTracker,
}

impl RequestRecorder {
    pub fn new(
        store: Arc<dyn CounterStore>,
        resolver: Arc<dyn RoleResolver>,
        keys: Keyspace,
        ring: RecentEventsRing,
    ) -> Self {
        Self {
            store,
            resolver,
            keys,
            ring,
            tasks: TaskTracker::new(),
        }
    }

    /// Derive the request dimensions. An absent or rejected credential
    /// resolves to `anonymous` and never fails the request.
    pub fn context(
        &self,
        method: HttpMethod,
        path: &str,
        headers: &HeaderMap,
        peer: Option<SocketAddr>,
    ) -> RequestContext {
        RequestContext {
            timestamp: now_millis(),
            method,
            path: path.to_string(),
            role: resolve_or_anonymous(self.resolver.as_ref(), headers),
            client_address: client_address(headers, peer),
            user_agent: headers
                .get(USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or(UNKNOWN)
                .to_string(),
        }
    }

    /// Entry-stage counters: total, method, role and role x method.
    pub async fn write_request(&self, ctx: &RequestContext) -> StoreResult<()> {
        let mut batch = pipeline();
        batch
            .incr(self.keys.total_requests())
            .incr(self.keys.method(ctx.method))
            .incr(self.keys.role(&ctx.role))
            .incr(self.keys.role_method(&ctx.role, ctx.method));
        self.store.execute(batch).await
    }

    /// Completion-stage writes: status code, category, hourly and daily
    /// buckets, and the recent-events push and trim, in one pipeline.
    pub async fn write_response(&self, event: &RequestEvent) -> StoreResult<()> {
        let category = event.status_category();
        let mut batch = pipeline();
        batch
            .incr(self.keys.status(event.status_code))
            .incr(self.keys.status_category(category))
            .hash_incr(
                self.keys.hourly_status(),
                bucket_field(&hour_key(event.timestamp), category),
                1,
            )
            .hash_incr(
                self.keys.daily_status(),
                bucket_field(&day_key(event.timestamp), category),
                1,
            );
        self.ring.stage(&mut batch, event)?;
        self.store.execute(batch).await
    }

    /// Dispatch the entry-stage counters on a detached task.
    pub fn record_request(self: &Arc<Self>, ctx: &RequestContext) {
        let this = Arc::clone(self);
        let ctx = ctx.clone();
        self.tasks.spawn(async move {
            if let Err(err) = this.write_request(&ctx).await {
                RECORDING_DROPPED.with_label_values(&["request"]).inc();
                warn!(error = %err, method = %ctx.method, path = %ctx.path, "dropped request telemetry");
            }
        });
    }

    /// Dispatch the completion-stage writes on a detached task.
    pub fn record_response(self: &Arc<Self>, ctx: RequestContext, status_code: u16) {
        let this = Arc::clone(self);
        let event = ctx.finish(status_code);
        self.tasks.spawn(async move {
            match this.write_response(&event).await {
                Ok(()) => debug!(
                    method = %event.method,
                    path = %event.path,
                    status = event.status_code,
                    "recorded response telemetry"
                ),
                Err(err) => {
                    RECORDING_DROPPED.with_label_values(&["response"]).inc();
                    warn!(
                        error = %err,
                        method = %event.method,
                        path = %event.path,
                        status = event.status_code,
                        "dropped response telemetry"
                    );
                }
            }
        });
    }

    /// Wait for every dispatched recording task to finish. New recordings
    /// are still accepted afterwards.
    pub async fn drain(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    pub fn pending(&self) -> usize {
        self.tasks.len()
    }
}

/// First `X-Forwarded-For` hop, else the socket peer, else `unknown`.
fn client_address(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|p| p.ip().to_string()))
        .unwrap_or_else(|| UNKNOWN.to_string())
}

/// Axum middleware recording every request passing through the router.
///
/// Entry counters are dispatched before the handler runs; completion
/// writes are dispatched once the handler has produced the response and
/// its status is final. Neither is awaited here, so telemetry I/O never
/// adds to response latency.
pub async fn telemetry_middleware(
    State(recorder): State<Arc<RequestRecorder>>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ctx = recorder.context(
        HttpMethod::from(request.method()),
        request.uri().path(),
        request.headers(),
        peer,
    );
    recorder.record_request(&ctx);

    let response = next.run(request).await;

    recorder.record_response(ctx, response.status().as_u16());
    response
}
