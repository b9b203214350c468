//! Single-slot TTL caches for whole-fleet snapshots.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

/// One cached value with an expiry. The slot stores complete aggregates
/// only; it is never partially updated.
pub struct TtlCell<T> {
    ttl: Duration,
    slot: RwLock<Option<(Instant, Arc<T>)>>,
}

impl<T> TtlCell<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: RwLock::new(None),
        }
    }

    /// The cached value, if present and fresh.
    pub async fn get(&self) -> Option<Arc<T>> {
        let guard = self.slot.read().await;
        match guard.as_ref() {
            Some((stored, value)) if stored.elapsed() < self.ttl => Some(value.clone()),
            _ => None,
        }
    }

    /// Store a complete value, restarting the TTL.
    pub async fn put(&self, value: T) -> Arc<T> {
        let value = Arc::new(value);
        *self.slot.write().await = Some((Instant::now(), value.clone()));
        value
    }

    pub async fn invalidate(&self) {
        *self.slot.write().await = None;
    }
}

impl<T> std::fmt::Debug for TtlCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCell").field("ttl", &self.ttl).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_value_hits_until_invalidated() {
        let cell = TtlCell::new(Duration::from_secs(30));
        assert!(cell.get().await.is_none());

        cell.put(42u32).await;
        assert_eq!(*cell.get().await.unwrap(), 42);

        cell.invalidate().await;
        assert!(cell.get().await.is_none());
    }

    #[tokio::test]
    async fn expired_value_misses() {
        let cell = TtlCell::new(Duration::from_millis(20));
        cell.put("snapshot".to_string()).await;
        assert!(cell.get().await.is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cell.get().await.is_none());
    }
}
