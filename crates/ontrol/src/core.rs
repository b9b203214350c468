//! The assembled control plane.
//!
//! No process-wide state: the host builds a [`Core`] from its config, a
//! router store and an audit sink, hands the background tasks a
//! cancellation token, and passes `core` to its API handlers.

use std::sync::Arc;

use ontconf::OntrolConfig;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::audit::AuditSink;
use crate::breaker::BreakerRegistry;
use crate::directory::{RouterDirectory, RouterStore};
use crate::error::CoreError;
use crate::fleet::{FleetCaches, FleetEngine};
use crate::health::HealthMonitor;
use crate::nat::NatMutator;
use crate::pool::ConnectionPool;
use crate::scraper::ScraperInvoker;
use crate::search::SearchEngine;

pub struct Core {
    pub directory: Arc<RouterDirectory>,
    pub pool: ConnectionPool,
    pub breakers: Arc<BreakerRegistry>,
    pub fleet: FleetEngine,
    pub nat: NatMutator,
    pub search: SearchEngine,
    pub health: Arc<HealthMonitor>,
    pub scraper: ScraperInvoker,
}

impl Core {
    /// Wire everything up and perform the initial directory load.
    pub async fn build(
        config: &OntrolConfig,
        store: Arc<dyn RouterStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Arc<Self>, CoreError> {
        let directory = Arc::new(RouterDirectory::load(store).await?);
        let pool = ConnectionPool::new(config.pool.clone());
        let breakers = Arc::new(BreakerRegistry::new(config.breaker.clone()));
        let caches = Arc::new(FleetCaches::new(&config.cache));

        let fleet = FleetEngine::new(
            directory.clone(),
            pool.clone(),
            breakers.clone(),
            caches.clone(),
        );
        let nat = NatMutator::new(
            directory.clone(),
            pool.clone(),
            breakers.clone(),
            caches,
            audit,
        );
        let search = SearchEngine::new(fleet.clone(), &config.search);
        let health = Arc::new(HealthMonitor::new(
            fleet.clone(),
            config.health.clone(),
            config.cache.clone(),
        ));
        let scraper = ScraperInvoker::new(config.scraper.clone(), config.debug);

        Ok(Arc::new(Self {
            directory,
            pool,
            breakers,
            fleet,
            nat,
            search,
            health,
            scraper,
        }))
    }

    /// Spawn the long-lived background tasks: pool reaper, health probe
    /// loop, health cache janitor. All stop on `cancel`.
    pub fn spawn_background(&self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let pool = self.pool.clone();
        let token = cancel.clone();
        handles.push(tokio::spawn(async move {
            pool.run_reaper(token).await;
        }));

        let monitor = self.health.clone();
        let token = cancel.clone();
        handles.push(tokio::spawn(monitor.run(token)));

        let monitor = self.health.clone();
        let token = cancel.clone();
        handles.push(tokio::spawn(monitor.run_janitor(token)));

        handles
    }

    /// Graceful teardown after the background tasks have been cancelled.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Core")
            .field("directory", &self.directory)
            .finish_non_exhaustive()
    }
}
