//! Audit event emission.
//!
//! The core emits one structured event per NAT write that reached a device;
//! login decisions are audited by the HTTP collaborator. Sinks are a
//! capability trait so hosts can forward events to their own store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Operator identity as supplied by the caller.
    pub actor: String,
    /// Machine-readable action, e.g. `nat.update`.
    pub action: String,
    /// Resource acted on, e.g. the router name.
    pub resource: String,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub latency_ms: u64,
    /// `success` or a failure description.
    pub outcome: String,
}

impl AuditEvent {
    pub fn new(actor: &str, action: &str, resource: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            actor: actor.to_string(),
            action: action.to_string(),
            resource: resource.to_string(),
            before: None,
            after: None,
            latency_ms: 0,
            outcome: "success".to_string(),
        }
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

/// Default sink: structured tracing events under the `audit` target.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        tracing::info!(
            target: "audit",
            id = %event.id,
            actor = %event.actor,
            action = %event.action,
            resource = %event.resource,
            before = %event.before.as_ref().map(|v| v.to_string()).unwrap_or_default(),
            after = %event.after.as_ref().map(|v| v.to_string()).unwrap_or_default(),
            latency_ms = event.latency_ms,
            outcome = %event.outcome,
        );
    }
}

/// Collecting sink for tests.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}
