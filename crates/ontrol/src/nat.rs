//! NAT rule mutator: the one write path in the control plane.
//!
//! `update_ont_rule` validates its inputs before any connection is opened,
//! locates the sentinel-tagged rule, and rewrites only `to-addresses` and
//! `to-ports` on the device-assigned id. No rule is ever created and no
//! other field is touched. Nothing is retried: the write is not idempotent
//! at the device, so a blind retry could double-apply a concurrent edit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::audit::{AuditEvent, AuditSink};
use crate::breaker::BreakerRegistry;
use crate::device;
use crate::directory::RouterDirectory;
use crate::error::CoreError;
use crate::fleet::FleetCaches;
use crate::pool::ConnectionPool;
use crate::types::NatRule;
use crate::validate;

/// Dial budget for the single connection attempt a write makes.
const WRITE_DIAL_TIMEOUT: Duration = Duration::from_secs(8);

/// Outcome of a successful rewrite, echoing the before/after targets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NatUpdate {
    pub router: String,
    pub rule_id: String,
    pub previous_ip: String,
    pub previous_port: String,
    pub new_ip: String,
    pub new_port: String,
}

pub struct NatMutator {
    directory: Arc<RouterDirectory>,
    pool: ConnectionPool,
    breakers: Arc<BreakerRegistry>,
    caches: Arc<FleetCaches>,
    audit: Arc<dyn AuditSink>,
}

impl NatMutator {
    pub fn new(
        directory: Arc<RouterDirectory>,
        pool: ConnectionPool,
        breakers: Arc<BreakerRegistry>,
        caches: Arc<FleetCaches>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            directory,
            pool,
            breakers,
            caches,
            audit,
        }
    }

    /// Rewrite the remote-ONT rule on `router_name` to forward to
    /// `new_ip:new_port`.
    pub async fn update_ont_rule(
        &self,
        actor: &str,
        router_name: &str,
        new_ip: &str,
        new_port: &str,
    ) -> Result<NatUpdate, CoreError> {
        validate::ipv4(new_ip)?;
        validate::port(new_port)?;

        let router = self.directory.get(router_name).ok_or_else(|| {
            CoreError::NotFound(format!("router '{router_name}' is not in the directory"))
        })?;

        let started = Instant::now();
        let result = self
            .breakers
            .call(router_name, || async move {
                let mut conn = self.pool.acquire(&router, WRITE_DIAL_TIMEOUT).await?;

                let rules = match device::nat_rules(conn.client()).await {
                    Ok(rules) => rules,
                    Err(e) => return Err(self.dispose(conn, router_name, e).await),
                };

                let rule = match self.select_ont_rule(router_name, &rules) {
                    Ok(rule) => rule.clone(),
                    Err(e) => {
                        self.pool.release(conn).await;
                        return Err(e);
                    }
                };

                match device::set_nat_target(conn.client(), &rule.id, new_ip, new_port).await {
                    Ok(()) => {
                        self.pool.release(conn).await;
                        Ok(NatUpdate {
                            router: router_name.to_string(),
                            rule_id: rule.id.clone(),
                            previous_ip: rule.to_addresses.clone(),
                            previous_port: rule.to_ports.clone(),
                            new_ip: new_ip.to_string(),
                            new_port: new_port.to_string(),
                        })
                    }
                    Err(e) => Err(self.dispose(conn, router_name, e).await),
                }
            })
            .await;

        let latency_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(update) => {
                // Invalidate before returning so the caller's next read
                // observes a miss, never the pre-write snapshot.
                self.caches.invalidate_all().await;
                self.emit(actor, router_name, latency_ms, Some(update), "success");
                info!(
                    router = router_name,
                    rule = %update.rule_id,
                    from = %format!("{}:{}", update.previous_ip, update.previous_port),
                    to = %format!("{new_ip}:{new_port}"),
                    "remote-ONT rule rewritten"
                );
            }
            Err(err) => {
                // Fast-fail rejections (breaker, pool cap) never reached the
                // device and are not audited as write attempts.
                if !matches!(
                    err.kind(),
                    crate::error::ErrorKind::BreakerOpen
                        | crate::error::ErrorKind::BreakerProbing
                        | crate::error::ErrorKind::PoolExhausted
                ) {
                    self.emit(actor, router_name, latency_ms, None, &err.to_string());
                }
            }
        }
        result
    }

    /// Pick the one sentinel-tagged rule. Zero matches is a clean not-found;
    /// more than one means provisioning broke the invariant, and a write
    /// against an ambiguous target is refused.
    fn select_ont_rule<'a>(
        &self,
        router_name: &str,
        rules: &'a [NatRule],
    ) -> Result<&'a NatRule, CoreError> {
        let mut matches = rules.iter().filter(|r| r.is_ont_rule());
        let first = matches.next().ok_or_else(|| {
            CoreError::NotFound(format!("no remote-ONT rule on router '{router_name}'"))
        })?;
        let extras = matches.count();
        if extras > 0 {
            warn!(
                router = router_name,
                duplicates = extras + 1,
                "multiple remote-ONT rules match the sentinel; refusing write"
            );
            return Err(CoreError::Internal(format!(
                "router '{router_name}' has {} rules matching the remote-ONT sentinel",
                extras + 1
            )));
        }
        Ok(first)
    }

    async fn dispose(
        &self,
        conn: crate::pool::PooledConn,
        router: &str,
        err: rosproto::ProtoError,
    ) -> CoreError {
        let err = CoreError::from_proto(router, err);
        match err.kind() {
            crate::error::ErrorKind::NetworkUnreachable
            | crate::error::ErrorKind::ProtocolError
            | crate::error::ErrorKind::Timeout => self.pool.close(conn).await,
            _ => self.pool.release(conn).await,
        }
        err
    }

    fn emit(
        &self,
        actor: &str,
        router: &str,
        latency_ms: u64,
        update: Option<&NatUpdate>,
        outcome: &str,
    ) {
        let mut event = AuditEvent::new(actor, "nat.update", router);
        event.latency_ms = latency_ms;
        event.outcome = outcome.to_string();
        if let Some(update) = update {
            event.before = Some(serde_json::json!({
                "to_addresses": update.previous_ip,
                "to_ports": update.previous_port,
            }));
            event.after = Some(serde_json::json!({
                "to_addresses": update.new_ip,
                "to_ports": update.new_port,
            }));
        }
        self.audit.emit(event);
    }
}

impl std::fmt::Debug for NatMutator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatMutator").finish_non_exhaustive()
    }
}
