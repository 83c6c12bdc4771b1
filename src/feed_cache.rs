use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

/// Single-slot cache for the serialized `/api/readings` response.
///
/// Holds the response bytes so every hit within the TTL returns a
/// byte-identical snapshot. There is deliberately no locking across the
/// backing fetch: two requests that miss concurrently may both query the
/// store, and the last writer's bytes become the cached value. An expired
/// entry is replaced wholesale, never merged.
#[derive(Clone)]
pub struct FeedCache {
    ttl: Duration,
    slot: Arc<RwLock<Option<Entry>>>,
}

struct Entry {
    stored_at: Instant,
    body: Arc<Vec<u8>>,
}

impl FeedCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Arc::new(RwLock::new(None)),
        }
    }

    /// Return the cached bytes if the slot is populated and younger than the
    /// TTL. An expired entry is treated as absent (it is overwritten by the
    /// next `put`, not eagerly cleared).
    pub async fn get(&self) -> Option<Arc<Vec<u8>>> {
        let guard = self.slot.read().await;
        match guard.as_ref() {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => {
                tracing::debug!("feed cache hit");
                Some(entry.body.clone())
            }
            _ => None,
        }
    }

    /// Replace the slot with freshly fetched bytes.
    pub async fn put(&self, body: Arc<Vec<u8>>) {
        let mut guard = self.slot.write().await;
        *guard = Some(Entry {
            stored_at: Instant::now(),
            body,
        });
    }
}
