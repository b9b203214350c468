//! Router directory: read-mostly snapshot of the fleet.
//!
//! The directory is populated from an external persistence collaborator
//! through the [`RouterStore`] capability trait and replaced wholesale on
//! reload. Readers clone the snapshot `Arc` and never hold a lock across
//! I/O; fan-outs must not depend on iteration order.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::info;

use crate::error::CoreError;
use crate::types::Router;

/// Capability set the external persistence layer implements.
#[async_trait]
pub trait RouterStore: Send + Sync {
    /// Routers visible to a caller role; filtering happens in the store.
    async fn list_routers(&self, role: &str) -> Result<Vec<Router>, CoreError>;

    /// The full fleet keyed by name, for the core's own use.
    async fn routers_for_core(&self) -> Result<HashMap<String, Router>, CoreError>;

    /// Ask the store to refresh itself from its backing source.
    async fn reload(&self) -> Result<(), CoreError>;
}

/// In-memory store used by tests and by the daemon when the fleet is seeded
/// from configuration.
#[derive(Debug, Default)]
pub struct InMemoryRouterStore {
    routers: RwLock<Vec<Router>>,
}

impl InMemoryRouterStore {
    pub fn new(routers: Vec<Router>) -> Self {
        Self {
            routers: RwLock::new(routers),
        }
    }

    pub fn set_routers(&self, routers: Vec<Router>) {
        *self.routers.write().unwrap_or_else(|e| e.into_inner()) = routers;
    }
}

#[async_trait]
impl RouterStore for InMemoryRouterStore {
    async fn list_routers(&self, _role: &str) -> Result<Vec<Router>, CoreError> {
        Ok(self
            .routers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }

    async fn routers_for_core(&self) -> Result<HashMap<String, Router>, CoreError> {
        Ok(self
            .routers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|r| (r.name.clone(), r.clone()))
            .collect())
    }

    async fn reload(&self) -> Result<(), CoreError> {
        Ok(())
    }
}

type Snapshot = Arc<HashMap<String, Arc<Router>>>;

/// The snapshot the rest of the core reads.
pub struct RouterDirectory {
    store: Arc<dyn RouterStore>,
    snapshot: RwLock<Snapshot>,
}

impl RouterDirectory {
    pub fn new(store: Arc<dyn RouterStore>) -> Self {
        Self {
            store,
            snapshot: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Build a directory and perform the initial load.
    pub async fn load(store: Arc<dyn RouterStore>) -> Result<Self, CoreError> {
        let directory = Self::new(store);
        directory.reload().await?;
        Ok(directory)
    }

    /// Replace the snapshot wholesale from the store.
    pub async fn reload(&self) -> Result<(), CoreError> {
        self.store.reload().await?;
        let routers = self.store.routers_for_core().await?;
        let snapshot: Snapshot = Arc::new(
            routers
                .into_iter()
                .map(|(name, router)| (name, Arc::new(router)))
                .collect(),
        );
        let count = snapshot.len();
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = snapshot;
        info!(routers = count, "router directory reloaded");
        Ok(())
    }

    /// Current snapshot; cheap to clone, safe to hold across awaits.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Router>> {
        self.snapshot().get(name).cloned()
    }

    /// Enabled routers, the fan-out population. Order is unspecified.
    pub fn enabled(&self) -> Vec<Arc<Router>> {
        self.snapshot()
            .values()
            .filter(|r| r.enabled)
            .cloned()
            .collect()
    }

    pub fn store(&self) -> &Arc<dyn RouterStore> {
        &self.store
    }
}

impl std::fmt::Debug for RouterDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterDirectory")
            .field("routers", &self.snapshot().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router(name: &str, enabled: bool) -> Router {
        Router {
            id: format!("id-{name}"),
            name: name.to_string(),
            host: "127.0.0.1".to_string(),
            port: 8728,
            username: "api".to_string(),
            secret: "x".to_string(),
            tunnel_endpoint: String::new(),
            public_ont_url: String::new(),
            enabled,
        }
    }

    #[tokio::test]
    async fn reload_swaps_the_snapshot_wholesale() {
        let store = Arc::new(InMemoryRouterStore::new(vec![router("a", true)]));
        let directory = RouterDirectory::load(store.clone()).await.unwrap();
        assert!(directory.get("a").is_some());

        let before = directory.snapshot();
        store.set_routers(vec![router("b", true)]);
        directory.reload().await.unwrap();

        // Old snapshot is unchanged in the reader's hands.
        assert!(before.contains_key("a"));
        assert!(directory.get("a").is_none());
        assert!(directory.get("b").is_some());
    }

    #[tokio::test]
    async fn disabled_routers_are_excluded_from_fanouts() {
        let store = Arc::new(InMemoryRouterStore::new(vec![
            router("a", true),
            router("b", false),
        ]));
        let directory = RouterDirectory::load(store).await.unwrap();
        let enabled = directory.enabled();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].name, "a");
        // Disabled routers are still resolvable by name.
        assert!(directory.get("b").is_some());
    }
}
