//! Background health monitor.
//!
//! Probes every router in the directory on a fixed interval, concurrently.
//! A probe is the same connectivity test the fleet engine exposes; on
//! success it additionally samples the active session count and the
//! device's cpu/memory figures. Records live in a TTL cache with a janitor
//! that removes entries for routers nobody has probed in a while (for
//! example after a directory reload drops them).

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ontconf::{CacheConfig, HealthConfig};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::device;
use crate::fleet::FleetEngine;
use crate::types::Router;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Down,
    Unknown,
}

/// Everything the read APIs report about one router's health.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    pub router: String,
    pub status: HealthStatus,
    pub last_checked: DateTime<Utc>,
    pub last_seen_healthy: Option<DateTime<Utc>>,
    pub consecutive_fails: u32,
    pub down_since: Option<DateTime<Utc>>,
    pub uptime_percent: f64,
    pub check_count: u64,
    pub fail_count: u64,
    pub response_ms: u64,
    pub active_subscribers: Option<u32>,
    pub cpu_percent: Option<f64>,
    pub ram_used_mb: Option<f64>,
    pub ram_total_mb: Option<f64>,
    pub error: Option<String>,
}

impl HealthRecord {
    fn new(router: &str) -> Self {
        Self {
            router: router.to_string(),
            status: HealthStatus::Unknown,
            last_checked: Utc::now(),
            last_seen_healthy: None,
            consecutive_fails: 0,
            down_since: None,
            uptime_percent: 100.0,
            check_count: 0,
            fail_count: 0,
            response_ms: 0,
            active_subscribers: None,
            cpu_percent: None,
            ram_used_mb: None,
            ram_total_mb: None,
            error: None,
        }
    }

    /// Fold in a failed probe. Status flips to `Down` only once the
    /// consecutive-failure threshold is reached.
    fn record_failure(&mut self, error: String, config: &HealthConfig) {
        let now = Utc::now();
        self.last_checked = now;
        self.check_count += 1;
        self.fail_count += 1;
        self.consecutive_fails += 1;
        self.error = Some(error);
        self.active_subscribers = None;
        self.cpu_percent = None;
        if self.consecutive_fails >= config.fail_threshold && self.status != HealthStatus::Down {
            self.status = HealthStatus::Down;
            self.down_since = Some(now);
        }
        self.update_uptime();
    }

    /// Fold in a successful probe; classification is by response time.
    /// Returns how long the router had been down, when this ends an outage.
    fn record_success(
        &mut self,
        response_ms: u64,
        config: &HealthConfig,
    ) -> Option<chrono::Duration> {
        let now = Utc::now();
        let outage = self.down_since.map(|since| now - since);
        self.last_checked = now;
        self.last_seen_healthy = Some(now);
        self.check_count += 1;
        self.consecutive_fails = 0;
        self.down_since = None;
        self.response_ms = response_ms;
        self.error = None;
        self.status = if response_ms > config.degraded_threshold_ms {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        self.update_uptime();
        outage
    }

    fn update_uptime(&mut self) {
        if self.check_count > 0 {
            self.uptime_percent =
                100.0 * (self.check_count - self.fail_count) as f64 / self.check_count as f64;
        }
    }
}

struct CachedRecord {
    stored_at: Instant,
    record: HealthRecord,
}

pub struct HealthMonitor {
    fleet: FleetEngine,
    health: HealthConfig,
    cache_config: CacheConfig,
    cache: DashMap<String, CachedRecord>,
}

impl HealthMonitor {
    pub fn new(fleet: FleetEngine, health: HealthConfig, cache_config: CacheConfig) -> Self {
        Self {
            fleet,
            health,
            cache_config,
            cache: DashMap::new(),
        }
    }

    /// Snapshot copy of every cached record, fresh or not, sorted by name.
    pub fn snapshot(&self) -> Vec<HealthRecord> {
        let mut records: Vec<HealthRecord> =
            self.cache.iter().map(|e| e.value().record.clone()).collect();
        records.sort_by(|a, b| a.router.cmp(&b.router));
        records
    }

    /// Snapshot copy for one router.
    pub fn get(&self, router: &str) -> Option<HealthRecord> {
        self.cache.get(router).map(|e| e.value().record.clone())
    }

    /// Probe every enabled router once, concurrently, and fold the results
    /// into the cache.
    pub async fn probe_fleet(self: &Arc<Self>) {
        let routers = self.fleet.directory().enabled();
        let mut set = JoinSet::new();
        for router in routers {
            let monitor = self.clone();
            set.spawn(async move {
                monitor.probe_router(router).await;
            });
        }
        while set.join_next().await.is_some() {}
    }

    async fn probe_router(&self, router: Arc<Router>) {
        let name = router.name.clone();
        let test = self.fleet.test_connection(&name).await;

        let (success_ms, error) = match &test {
            Ok(result) if result.reachable => (Some(result.response_ms), None),
            Ok(result) => (
                None,
                Some(
                    result
                        .error
                        .clone()
                        .unwrap_or_else(|| "connection test failed".to_string()),
                ),
            ),
            Err(err) => (None, Some(err.to_string())),
        };

        // Detail sampling happens outside the cache entry lock.
        let details = match success_ms {
            Some(_) => self.sample_details(&router).await,
            None => None,
        };

        let mut entry = self
            .cache
            .entry(name.clone())
            .or_insert_with(|| CachedRecord {
                stored_at: Instant::now(),
                record: HealthRecord::new(&name),
            });
        entry.stored_at = Instant::now();
        match (success_ms, error) {
            (Some(response_ms), _) => {
                let was_down = entry.record.status == HealthStatus::Down;
                if let Some(outage) = entry.record.record_success(response_ms, &self.health) {
                    if was_down {
                        info!(
                            router = %name,
                            outage_secs = outage.num_seconds(),
                            "router recovered"
                        );
                    }
                }
                if let Some((subscribers, cpu, ram_used, ram_total)) = details {
                    entry.record.active_subscribers = Some(subscribers);
                    entry.record.cpu_percent = Some(cpu);
                    entry.record.ram_used_mb = Some(ram_used);
                    entry.record.ram_total_mb = Some(ram_total);
                }
            }
            (None, error) => {
                let was_down = entry.record.status == HealthStatus::Down;
                entry
                    .record
                    .record_failure(error.unwrap_or_default(), &self.health);
                if !was_down && entry.record.status == HealthStatus::Down {
                    warn!(
                        router = %name,
                        fails = entry.record.consecutive_fails,
                        "router marked down"
                    );
                }
            }
        }
    }

    /// Active subscriber count and resource figures, on one pooled
    /// connection under the breaker.
    async fn sample_details(&self, router: &Arc<Router>) -> Option<(u32, f64, f64, f64)> {
        let name = router.name.clone();
        let router = router.clone();
        let fleet = self.fleet.clone();
        let breakers = fleet.breakers().clone();
        let result = breakers
            .call(&name, || async move {
                let mut conn = fleet.acquire_with_retry(&router).await?;
                let active = match device::ppp_active(conn.client(), &router.name, None).await {
                    Ok(active) => active,
                    Err(e) => return Err(fleet.fail(conn, &router.name, e).await),
                };
                let resources = match device::resources(conn.client()).await {
                    Ok(resources) => resources,
                    Err(e) => return Err(fleet.fail(conn, &router.name, e).await),
                };
                fleet.pool().release(conn).await;
                Ok((
                    active.len() as u32,
                    resources.cpu_load_percent,
                    resources.used_memory_mb(),
                    resources.total_memory_mb(),
                ))
            })
            .await;
        match result {
            Ok(details) => Some(details),
            Err(err) => {
                debug!(router = %name, error = %err, "resource sampling failed");
                None
            }
        }
    }

    /// Drop records older than the health TTL.
    pub fn evict_expired(&self) {
        let ttl = self.cache_config.health_ttl();
        let before = self.cache.len();
        self.cache.retain(|_, cached| cached.stored_at.elapsed() < ttl);
        let evicted = before.saturating_sub(self.cache.len());
        if evicted > 0 {
            debug!(evicted, "health janitor evicted expired records");
        }
    }

    /// Probe loop. In-flight probes drain before the loop exits.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let interval = self.health.probe_interval();
        info!(
            interval_secs = interval.as_secs(),
            "health monitor running"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => self.probe_fleet().await,
            }
        }
        debug!("health monitor stopped");
    }

    /// Janitor loop for the record cache.
    pub async fn run_janitor(self: Arc<Self>, cancel: CancellationToken) {
        let interval = self.cache_config.health_janitor_interval();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => self.evict_expired(),
            }
        }
        debug!("health janitor stopped");
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("records", &self.cache.len())
            .finish_non_exhaustive()
    }
}
