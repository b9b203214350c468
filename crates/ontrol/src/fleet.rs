//! Fleet query engine: parallel fan-out reads with short-TTL caching.
//!
//! Every whole-fleet read touches each enabled router concurrently, under
//! that router's circuit breaker, on a pooled connection. A branch failure
//! becomes a structured negative row; the aggregate itself always completes,
//! and only after every branch has reported. The three whole-fleet views
//! each get a single-slot 30 s cache, all of which a successful NAT write
//! invalidates.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ontconf::CacheConfig;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::debug;

use crate::breaker::BreakerRegistry;
use crate::cache::TtlCell;
use crate::device;
use crate::directory::RouterDirectory;
use crate::error::{CoreError, ErrorKind};
use crate::pool::{ConnectionPool, PooledConn};
use crate::types::{ActiveSubscriber, ConnectionTestResult, NatConfigView, Router};

/// Acquire+auth retry policy: two attempts, additive dial budget, fixed
/// backoff. The breaker sees only the final outcome.
const ACQUIRE_ATTEMPTS: u64 = 2;
const ACQUIRE_BASE_TIMEOUT: Duration = Duration::from_secs(8);
const ACQUIRE_BACKOFF: Duration = Duration::from_secs(1);

/// Per-router slot of a whole-fleet aggregate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FleetOutcome<T> {
    Found { value: T },
    Missing { failure: FleetFailure },
}

impl<T> FleetOutcome<T> {
    pub fn found(&self) -> Option<&T> {
        match self {
            FleetOutcome::Found { value } => Some(value),
            FleetOutcome::Missing { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<&FleetFailure> {
        match self {
            FleetOutcome::Found { .. } => None,
            FleetOutcome::Missing { failure } => Some(failure),
        }
    }
}

/// A branch failure, flattened for transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FleetFailure {
    pub kind: ErrorKind,
    pub message: String,
    /// Remaining breaker cooldown, when the branch was refused outright.
    pub retry_after_ms: Option<u64>,
}

impl From<&CoreError> for FleetFailure {
    fn from(err: &CoreError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            retry_after_ms: err.retry_after().map(|d| d.as_millis() as u64),
        }
    }
}

pub type NatFleetView = HashMap<String, FleetOutcome<NatConfigView>>;
pub type ClientsFleetView = HashMap<String, FleetOutcome<Vec<ActiveSubscriber>>>;
pub type LivenessFleetView = HashMap<String, ConnectionTestResult>;

/// The three whole-fleet caches. Shared between the fleet engine (reads)
/// and the NAT mutator (invalidation) so neither holds a reference to the
/// other.
pub struct FleetCaches {
    nat: TtlCell<NatFleetView>,
    clients: TtlCell<ClientsFleetView>,
    liveness: TtlCell<LivenessFleetView>,
}

impl FleetCaches {
    pub fn new(config: &CacheConfig) -> Self {
        let ttl = config.fleet_ttl();
        Self {
            nat: TtlCell::new(ttl),
            clients: TtlCell::new(ttl),
            liveness: TtlCell::new(ttl),
        }
    }

    /// Drop all three snapshots. Runs before any NAT write returns success.
    pub async fn invalidate_all(&self) {
        self.nat.invalidate().await;
        self.clients.invalidate().await;
        self.liveness.invalidate().await;
        debug!("fleet caches invalidated");
    }
}

impl std::fmt::Debug for FleetCaches {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetCaches").finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct FleetEngine {
    directory: Arc<RouterDirectory>,
    pool: ConnectionPool,
    breakers: Arc<BreakerRegistry>,
    caches: Arc<FleetCaches>,
}

impl FleetEngine {
    pub fn new(
        directory: Arc<RouterDirectory>,
        pool: ConnectionPool,
        breakers: Arc<BreakerRegistry>,
        caches: Arc<FleetCaches>,
    ) -> Self {
        Self {
            directory,
            pool,
            breakers,
            caches,
        }
    }

    pub fn caches(&self) -> &Arc<FleetCaches> {
        &self.caches
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub fn directory(&self) -> &Arc<RouterDirectory> {
        &self.directory
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    // ---- single-router reads ------------------------------------------------

    /// The remote-ONT mapping on one router.
    pub async fn nat_config(&self, router_name: &str) -> Result<NatConfigView, CoreError> {
        let router = self.router(router_name)?;
        self.breakers
            .call(router_name, || self.nat_config_branch(router.clone()))
            .await
    }

    /// Live PPPoE sessions on one router.
    pub async fn clients(&self, router_name: &str) -> Result<Vec<ActiveSubscriber>, CoreError> {
        let router = self.router(router_name)?;
        self.breakers
            .call(router_name, || self.clients_branch(router.clone()))
            .await
    }

    /// Connectivity probe for one router. Infrastructure failures embed in
    /// the result; only an unknown router name errors.
    pub async fn test_connection(
        &self,
        router_name: &str,
    ) -> Result<ConnectionTestResult, CoreError> {
        let router = self.router(router_name)?;
        Ok(self.test_branch(router).await)
    }

    /// Active sessions plus the secret table's profile map, on one
    /// connection. The fuzzy search engine's per-router fetch.
    pub async fn active_with_profiles(
        &self,
        router: Arc<Router>,
    ) -> Result<(Vec<ActiveSubscriber>, HashMap<String, String>), CoreError> {
        let name = router.name.clone();
        self.breakers
            .call(&name, || async move {
                let mut conn = self.acquire_with_retry(&router).await?;
                let active = match device::ppp_active(conn.client(), &router.name, None).await {
                    Ok(active) => active,
                    Err(e) => return Err(self.fail(conn, &router.name, e).await),
                };
                let profiles = match device::ppp_secret_profiles(conn.client()).await {
                    Ok(profiles) => profiles,
                    Err(e) => return Err(self.fail(conn, &router.name, e).await),
                };
                self.pool.release(conn).await;
                Ok((active, profiles))
            })
            .await
    }

    // ---- whole-fleet reads --------------------------------------------------

    /// Remote-ONT mappings across the fleet.
    pub async fn get_all_nat_configs(&self) -> NatFleetView {
        if let Some(hit) = self.caches.nat.get().await {
            debug!("nat fleet view served from cache");
            return (*hit).clone();
        }
        let view = self
            .fan_out(|engine, router| async move {
                let name = router.name.clone();
                match engine
                    .breakers
                    .call(&name, || engine.nat_config_branch(router.clone()))
                    .await
                {
                    Ok(value) => FleetOutcome::Found { value },
                    Err(err) => FleetOutcome::Missing {
                        failure: FleetFailure::from(&err),
                    },
                }
            })
            .await;
        self.caches.nat.put(view.clone()).await;
        view
    }

    /// Active subscriber lists across the fleet.
    pub async fn get_all_active_clients(&self) -> ClientsFleetView {
        if let Some(hit) = self.caches.clients.get().await {
            debug!("clients fleet view served from cache");
            return (*hit).clone();
        }
        let view = self
            .fan_out(|engine, router| async move {
                let name = router.name.clone();
                match engine
                    .breakers
                    .call(&name, || engine.clients_branch(router.clone()))
                    .await
                {
                    Ok(value) => FleetOutcome::Found { value },
                    Err(err) => FleetOutcome::Missing {
                        failure: FleetFailure::from(&err),
                    },
                }
            })
            .await;
        self.caches.clients.put(view.clone()).await;
        view
    }

    /// Connectivity probes across the fleet.
    pub async fn test_all_connections(&self) -> LivenessFleetView {
        if let Some(hit) = self.caches.liveness.get().await {
            debug!("liveness fleet view served from cache");
            return (*hit).clone();
        }
        let view = self
            .fan_out(|engine, router| async move { engine.test_branch(router).await })
            .await;
        self.caches.liveness.put(view.clone()).await;
        view
    }

    // ---- internals ----------------------------------------------------------

    fn router(&self, name: &str) -> Result<Arc<Router>, CoreError> {
        self.directory
            .get(name)
            .ok_or_else(|| CoreError::NotFound(format!("router '{name}' is not in the directory")))
    }

    /// Spawn one task per enabled router; collect slots under a mutex and
    /// return only when every branch has finished. Branch order is
    /// unspecified by design.
    async fn fan_out<T, F, Fut>(&self, branch: F) -> HashMap<String, T>
    where
        T: Send + 'static,
        F: Fn(FleetEngine, Arc<Router>) -> Fut,
        Fut: std::future::Future<Output = T> + Send + 'static,
    {
        let routers = self.directory.enabled();
        let results: Arc<Mutex<HashMap<String, T>>> =
            Arc::new(Mutex::new(HashMap::with_capacity(routers.len())));
        let mut set = JoinSet::new();
        for router in routers {
            let name = router.name.clone();
            let results = results.clone();
            let fut = branch(self.clone(), router);
            set.spawn(async move {
                let slot = fut.await;
                results.lock().await.insert(name, slot);
            });
        }
        while set.join_next().await.is_some() {}
        let branches = results.lock().await.len();
        debug!(branches, "fan-out complete");
        match Arc::try_unwrap(results) {
            Ok(mutex) => mutex.into_inner(),
            Err(arc) => arc.lock().await.drain().collect(),
        }
    }

    async fn nat_config_branch(&self, router: Arc<Router>) -> Result<NatConfigView, CoreError> {
        let mut conn = self.acquire_with_retry(&router).await?;
        let rules = match device::nat_rules(conn.client()).await {
            Ok(rules) => rules,
            Err(e) => return Err(self.fail(conn, &router.name, e).await),
        };
        self.pool.release(conn).await;
        let rule = rules
            .iter()
            .find(|r| r.is_ont_rule())
            .ok_or_else(|| {
                CoreError::NotFound(format!("no remote-ONT rule on router '{}'", router.name))
            })?;
        Ok(NatConfigView::project(&router, rule))
    }

    async fn clients_branch(&self, router: Arc<Router>) -> Result<Vec<ActiveSubscriber>, CoreError> {
        let mut conn = self.acquire_with_retry(&router).await?;
        match device::ppp_active(conn.client(), &router.name, None).await {
            Ok(active) => {
                self.pool.release(conn).await;
                Ok(active)
            }
            Err(e) => Err(self.fail(conn, &router.name, e).await),
        }
    }

    async fn test_branch(&self, router: Arc<Router>) -> ConnectionTestResult {
        let name = router.name.clone();
        let started = Instant::now();
        let identity = self
            .breakers
            .call(&name, || async move {
                let mut conn = self.acquire_with_retry(&router).await?;
                match device::identity(conn.client()).await {
                    Ok(identity) => {
                        self.pool.release(conn).await;
                        Ok(identity)
                    }
                    Err(e) => Err(self.fail(conn, &router.name, e).await),
                }
            })
            .await;
        let response_ms = started.elapsed().as_millis() as u64;
        match identity {
            Ok(identity) => ConnectionTestResult {
                router: name,
                reachable: true,
                identity: Some(identity),
                response_ms,
                error: None,
            },
            Err(err) => ConnectionTestResult {
                router: name,
                reachable: false,
                identity: None,
                response_ms,
                error: Some(err.to_string()),
            },
        }
    }

    /// Borrow a connection with the read-path retry policy.
    pub(crate) async fn acquire_with_retry(
        &self,
        router: &Arc<Router>,
    ) -> Result<PooledConn, CoreError> {
        let mut last: Option<CoreError> = None;
        for attempt in 1..=ACQUIRE_ATTEMPTS {
            let dial_timeout = ACQUIRE_BASE_TIMEOUT * attempt as u32;
            match self.pool.acquire(router, dial_timeout).await {
                Ok(conn) => return Ok(conn),
                Err(err)
                    if matches!(
                        err.kind(),
                        ErrorKind::NetworkUnreachable | ErrorKind::Timeout
                    ) =>
                {
                    debug!(router = %router.name, attempt, error = %err, "acquire attempt failed");
                    last = Some(err);
                    if attempt < ACQUIRE_ATTEMPTS {
                        tokio::time::sleep(ACQUIRE_BACKOFF).await;
                    }
                }
                Err(err) => return Err(err),
            }
        }
        Err(last.unwrap_or_else(|| {
            CoreError::Internal("acquire retry loop ended without an error".into())
        }))
    }

    /// Convert a wire error and dispose of the borrowed connection. Any
    /// failure that touched the stream (dead peer, trap, timeout) discards
    /// it; only failures that never reached the wire release it intact.
    pub(crate) async fn fail(
        &self,
        conn: PooledConn,
        router: &str,
        err: rosproto::ProtoError,
    ) -> CoreError {
        let err = CoreError::from_proto(router, err);
        match err.kind() {
            ErrorKind::NetworkUnreachable | ErrorKind::ProtocolError | ErrorKind::Timeout => {
                self.pool.close(conn).await;
            }
            _ => self.pool.release(conn).await,
        }
        err
    }
}

impl std::fmt::Debug for FleetEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetEngine")
            .field("directory", &self.directory)
            .finish_non_exhaustive()
    }
}
