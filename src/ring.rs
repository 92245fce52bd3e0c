// Recent-events ring
// Bounded, newest-first log of fully described request events kept in a
// single list key and trimmed after every push
//
// Numan Thabit 2025 Nov

use crate::errors::{StoreResult, TelemetryError};
use crate::event::{RequestEvent, StoredEvent};
use crate::keys::Keyspace;
use crate::store::{pipeline, Batch, CounterStore};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::sync::Arc;
use tracing::warn;

pub const DEFAULT_CAPACITY: usize = 1000;

/// One entry read back from the ring.
///
/// Events serialize in their stored shape, `statusCategory` included.
#[derive(Debug, Clone, PartialEq)]
pub enum RecentEntry {
    Event(RequestEvent),
    /// Stored payload that could not be decoded, kept in place of the event.
    Malformed { error: String, raw: String },
}

impl Serialize for RecentEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RecentEntry::Event(event) => StoredEvent::new(event).serialize(serializer),
            RecentEntry::Malformed { error, raw } => {
                let mut entry = serializer.serialize_struct("Malformed", 2)?;
                entry.serialize_field("error", error)?;
                entry.serialize_field("raw", raw)?;
                entry.end()
            }
        }
    }
}

impl RecentEntry {
    pub fn event(&self) -> Option<&RequestEvent> {
        match self {
            RecentEntry::Event(e) => Some(e),
            RecentEntry::Malformed { .. } => None,
        }
    }
}

#[derive(Clone)]
pub struct RecentEventsRing {
    store: Arc<dyn CounterStore>,
    key: String,
    capacity: usize,
}

impl RecentEventsRing {
    pub fn new(store: Arc<dyn CounterStore>, keys: &Keyspace, capacity: usize) -> Self {
        Self {
            store,
            key: keys.recent_requests(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queue the push and the trim for `event` onto an existing batch.
    pub fn stage(&self, batch: &mut Batch, event: &RequestEvent) -> StoreResult<()> {
        let payload = serde_json::to_string(&StoredEvent::new(event))
            .map_err(|e| TelemetryError::MalformedEntry(format!("serialize event: {e}")))?;
        batch
            .list_push(self.key.as_str(), payload)
            .list_trim(self.key.as_str(), 0, self.capacity as isize - 1);
        Ok(())
    }

    /// Push `event` to the head and trim the tail, as one pipelined unit.
    pub async fn append(&self, event: &RequestEvent) -> StoreResult<()> {
        let mut batch = pipeline();
        self.stage(&mut batch, event)?;
        self.store.execute(batch).await
    }

    /// Every retained entry, newest first. Undecodable entries become
    /// [`RecentEntry::Malformed`] placeholders.
    pub async fn read_all(&self) -> StoreResult<Vec<RecentEntry>> {
        let raw = self
            .store
            .list_range(&self.key, 0, self.capacity as isize - 1)
            .await?;
        Ok(raw.into_iter().map(decode_entry).collect())
    }
}

fn decode_entry(raw: String) -> RecentEntry {
    match serde_json::from_str::<RequestEvent>(&raw) {
        Ok(event) => RecentEntry::Event(event),
        Err(e) => {
            let err = TelemetryError::MalformedEntry(e.to_string());
            warn!(error = %err, "skipping undecodable recent event");
            RecentEntry::Malformed {
                error: err.to_string(),
                raw,
            }
        }
    }
}
