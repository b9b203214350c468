//! Per-router connection pool.
//!
//! Pools amortize the TCP+login handshake and cap concurrent management
//! connections per router. One mutex guards the whole router → slots map;
//! it is held for bookkeeping and the bounded on-borrow liveness probe, and
//! never across a dial. New connections are dialed against a reserved slot
//! so the per-router cap holds while the lock is released.
//!
//! Connections are lent out by move: a [`PooledConn`] owns the client until
//! `release` or `close`, so two callers can never share a connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ontconf::PoolConfig;
use rosproto::{Client, DialConfig};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::device;
use crate::error::CoreError;
use crate::types::Router;

struct PoolSlot {
    id: Uuid,
    /// None while the connection is lent out or still being dialed.
    client: Option<Client>,
    created: Instant,
    last_used: Instant,
    in_use: bool,
}

/// A borrowed connection. Hand it back with [`ConnectionPool::release`] on
/// every success path, or [`ConnectionPool::close`] when the connection is
/// known bad.
#[derive(Debug)]
pub struct PooledConn {
    router: String,
    slot_id: Uuid,
    client: Client,
}

impl PooledConn {
    pub fn client(&mut self) -> &mut Client {
        &mut self.client
    }

    pub fn router(&self) -> &str {
        &self.router
    }

    /// Identity of the underlying slot; stable across borrows of the same
    /// connection.
    pub fn slot_id(&self) -> Uuid {
        self.slot_id
    }
}

#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    config: PoolConfig,
    slots: Mutex<HashMap<String, Vec<PoolSlot>>>,
    closed: AtomicBool,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                slots: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Borrow a live connection to `router`, reusing an idle one when the
    /// liveness probe passes, dialing a new one while the router is under
    /// its cap, and failing with `PoolExhausted` otherwise.
    pub async fn acquire(
        &self,
        router: &Router,
        dial_timeout: Duration,
    ) -> Result<PooledConn, CoreError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(CoreError::Internal("connection pool is shut down".into()));
        }

        let reservation = {
            let mut map = self.inner.slots.lock().await;
            let list = map.entry(router.name.clone()).or_default();

            let mut i = 0;
            while i < list.len() {
                if list[i].in_use || list[i].client.is_none() {
                    i += 1;
                    continue;
                }
                if list[i].created.elapsed() > self.inner.config.max_lifetime() {
                    let mut slot = list.remove(i);
                    if let Some(mut client) = slot.client.take() {
                        client.close().await;
                    }
                    debug!(router = %router.name, "evicted connection past max lifetime");
                    continue;
                }
                // Probe the candidate before handing it out. Bounded by the
                // probe timeout, so the map lock stays short-held.
                let Some(mut client) = list[i].client.take() else {
                    i += 1;
                    continue;
                };
                let probe = timeout(self.inner.config.probe_timeout(), device::identity(&mut client));
                match probe.await {
                    Ok(Ok(_)) => {
                        list[i].in_use = true;
                        list[i].last_used = Instant::now();
                        let slot_id = list[i].id;
                        return Ok(PooledConn {
                            router: router.name.clone(),
                            slot_id,
                            client,
                        });
                    }
                    _ => {
                        client.close().await;
                        list.remove(i);
                        debug!(router = %router.name, "evicted connection that failed liveness probe");
                    }
                }
            }

            if list.len() >= self.inner.config.max_per_router {
                return Err(CoreError::PoolExhausted {
                    router: router.name.clone(),
                });
            }

            // Reserve a slot so concurrent acquires respect the cap while we
            // dial without holding the lock.
            let id = Uuid::new_v4();
            list.push(PoolSlot {
                id,
                client: None,
                created: Instant::now(),
                last_used: Instant::now(),
                in_use: true,
            });
            id
        };

        let dialed = Client::dial(
            &router.host,
            router.port,
            &router.username,
            &router.secret,
            DialConfig {
                connect_timeout: dial_timeout,
                ..DialConfig::default()
            },
        )
        .await;

        let mut map = self.inner.slots.lock().await;
        let list = map.entry(router.name.clone()).or_default();
        match dialed {
            Ok(client) => {
                let Some(slot) = list.iter_mut().find(|s| s.id == reservation) else {
                    // Shutdown raced the dial; do not leak the connection.
                    drop(map);
                    let mut client = client;
                    client.close().await;
                    return Err(CoreError::Internal("connection pool is shut down".into()));
                };
                let now = Instant::now();
                slot.created = now;
                slot.last_used = now;
                debug!(router = %router.name, total = list.len(), "opened new pooled connection");
                Ok(PooledConn {
                    router: router.name.clone(),
                    slot_id: reservation,
                    client,
                })
            }
            Err(err) => {
                list.retain(|s| s.id != reservation);
                if list.is_empty() {
                    map.remove(&router.name);
                }
                Err(CoreError::from_proto(&router.name, err))
            }
        }
    }

    /// Return a borrowed connection to the idle set.
    pub async fn release(&self, conn: PooledConn) {
        let PooledConn {
            router,
            slot_id,
            client,
        } = conn;
        let mut map = self.inner.slots.lock().await;
        if let Some(slot) = map
            .get_mut(&router)
            .and_then(|list| list.iter_mut().find(|s| s.id == slot_id))
        {
            slot.client = Some(client);
            slot.in_use = false;
            slot.last_used = Instant::now();
        } else {
            // The slot was pruned (shutdown); tear the stray connection down.
            drop(map);
            let mut client = client;
            client.close().await;
        }
    }

    /// Tear down a borrowed connection known to be bad and free its slot.
    pub async fn close(&self, conn: PooledConn) {
        let PooledConn {
            router,
            slot_id,
            mut client,
        } = conn;
        {
            let mut map = self.inner.slots.lock().await;
            if let Some(list) = map.get_mut(&router) {
                list.retain(|s| s.id != slot_id);
                if list.is_empty() {
                    map.remove(&router);
                }
            }
        }
        client.close().await;
    }

    /// One reaper pass: evict idle-beyond-timeout, past-lifetime, and
    /// probe-failing connections; drop empty router entries.
    pub async fn sweep(&self) {
        let mut map = self.inner.slots.lock().await;
        for (router, list) in map.iter_mut() {
            let mut i = 0;
            while i < list.len() {
                if list[i].in_use || list[i].client.is_none() {
                    i += 1;
                    continue;
                }
                let stale = list[i].last_used.elapsed() > self.inner.config.idle_timeout()
                    || list[i].created.elapsed() > self.inner.config.max_lifetime();
                if stale {
                    let mut slot = list.remove(i);
                    if let Some(mut client) = slot.client.take() {
                        client.close().await;
                    }
                    debug!(%router, "reaper evicted stale connection");
                    continue;
                }
                let Some(mut client) = list[i].client.take() else {
                    i += 1;
                    continue;
                };
                let probe = timeout(self.inner.config.probe_timeout(), device::identity(&mut client));
                match probe.await {
                    Ok(Ok(_)) => {
                        list[i].client = Some(client);
                        i += 1;
                    }
                    _ => {
                        client.close().await;
                        list.remove(i);
                        debug!(%router, "reaper evicted dead connection");
                    }
                }
            }
        }
        map.retain(|_, list| !list.is_empty());
    }

    /// Run the reaper until cancelled.
    pub async fn run_reaper(&self, cancel: CancellationToken) {
        let interval = self.inner.config.cleanup_interval();
        info!(interval_secs = interval.as_secs(), "connection reaper running");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => self.sweep().await,
            }
        }
        debug!("connection reaper stopped");
    }

    /// Refuse new borrows and close every pooled connection. Lent-out
    /// connections are closed when their holders return them.
    pub async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let mut map = self.inner.slots.lock().await;
        let mut closed = 0usize;
        for (_, list) in map.drain() {
            for mut slot in list {
                if let Some(mut client) = slot.client.take() {
                    client.close().await;
                    closed += 1;
                }
            }
        }
        if closed > 0 {
            info!(closed, "connection pool shut down");
        }
    }

    /// Connections currently tracked for `router` (idle + lent out).
    pub async fn connection_count(&self, router: &str) -> usize {
        self.inner
            .slots
            .lock()
            .await
            .get(router)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Idle connections currently pooled for `router`.
    pub async fn idle_count(&self, router: &str) -> usize {
        self.inner
            .slots
            .lock()
            .await
            .get(router)
            .map(|list| list.iter().filter(|s| !s.in_use).count())
            .unwrap_or(0)
    }

    pub fn max_per_router(&self) -> usize {
        self.inner.config.max_per_router
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("max_per_router", &self.inner.config.max_per_router)
            .finish_non_exhaustive()
    }
}
