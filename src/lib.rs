// Library root module for req-telemetry
// This file defines the public API and module structure of the request
// telemetry aggregator: recording middleware, counter store, stats and reset
//
// Numan Thabit 2025 Nov

pub mod buckets;
pub mod config;
pub mod errors;
pub mod event;
pub mod http;
pub mod keys;
pub mod metrics;
pub mod query;
pub mod recorder;
pub mod reset;
pub mod ring;
pub mod role;
pub mod store;

pub use errors::{StoreResult, TelemetryError};
pub use event::{HttpMethod, RequestEvent, StatusCategory};
pub use query::{StatsService, StatsSnapshot};
pub use recorder::{telemetry_middleware, RequestRecorder};
pub use reset::ResetService;
pub use store::{CounterStore, MemoryStore, RedisStore};
