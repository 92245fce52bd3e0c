// Reset service
// Deletes every key in the telemetry namespace. Unlike recording and
// querying this path is not best-effort: any store error is returned.
//
// Numan Thabit 2025 Nov

use crate::errors::StoreResult;
use crate::keys::Keyspace;
use crate::store::CounterStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResetOutcome {
    pub success: bool,
    pub deleted: usize,
}

pub struct ResetService {
    store: Arc<dyn CounterStore>,
    keys: Keyspace,
    scan_count: usize,
    delete_batch: usize,
}

impl ResetService {
    pub fn new(
        store: Arc<dyn CounterStore>,
        keys: Keyspace,
        scan_count: usize,
        delete_batch: usize,
    ) -> Self {
        Self {
            store,
            keys,
            scan_count: scan_count.max(1),
            delete_batch: delete_batch.max(1),
        }
    }

    /// Enumerate the namespace with bounded scans, then delete in batches.
    pub async fn reset(&self) -> StoreResult<ResetOutcome> {
        let keys = self
            .store
            .scan_keys(&self.keys.all_pattern(), self.scan_count)
            .await?;
        let mut deleted = 0;
        for chunk in keys.chunks(self.delete_batch) {
            deleted += self.store.delete_keys(chunk).await?;
        }
        info!(
            prefix = self.keys.prefix(),
            matched = keys.len(),
            deleted,
            "telemetry counters reset"
        );
        Ok(ResetOutcome {
            success: true,
            deleted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TelemetryError;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn deletes_only_namespace_keys() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..12 {
            store.increment(&format!("stats:method:M{i}")).await.unwrap();
        }
        store.increment("sessions:active").await.unwrap();

        let service = ResetService::new(store.clone(), Keyspace::default(), 5, 4);
        let outcome = service.reset().await.unwrap();
        assert_eq!(outcome, ResetOutcome { success: true, deleted: 12 });
        assert_eq!(store.key_count(), 1);
    }

    #[tokio::test]
    async fn surfaces_store_errors() {
        let store = Arc::new(MemoryStore::new());
        store.set_available(false);
        let service = ResetService::new(store, Keyspace::default(), 100, 500);
        assert!(matches!(
            service.reset().await,
            Err(TelemetryError::StoreUnavailable(_))
        ));
    }
}
