//! Shared domain types.

use serde::{Deserialize, Serialize};

/// One managed edge router. Immutable within a query; the directory replaces
/// records wholesale on reload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Router {
    /// Stable identity in the external store.
    pub id: String,
    /// Human name, unique across the fleet; the key for every aggregate.
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub secret: String,
    /// Operator-side `IP:PORT` the remote-ONT rule forwards to.
    pub tunnel_endpoint: String,
    /// Externally reachable URL composed by the tunnel infrastructure.
    pub public_ont_url: String,
    pub enabled: bool,
}

impl From<ontconf::RouterEntry> for Router {
    fn from(entry: ontconf::RouterEntry) -> Self {
        Self {
            id: entry.id,
            name: entry.name,
            host: entry.host,
            port: entry.port,
            username: entry.username,
            secret: entry.secret,
            tunnel_endpoint: entry.tunnel_endpoint,
            public_ont_url: entry.public_ont_url,
            enabled: entry.enabled,
        }
    }
}

/// Projection of one destination-NAT entry as the device reports it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NatRule {
    /// Device-assigned id (`*7` style); the only handle `set` accepts.
    pub id: String,
    pub chain: String,
    pub action: String,
    pub src_address: String,
    pub dst_address: String,
    pub src_port: String,
    pub dst_port: String,
    pub to_addresses: String,
    pub to_ports: String,
    pub protocol: String,
    pub comment: String,
    pub disabled: bool,
    pub bytes: i64,
    pub packets: i64,
}

/// The sentinel phrase that marks the one rule the control plane manages.
/// Matched case-insensitively as a substring of the rule comment.
pub const ONT_RULE_SENTINEL: &str = "REMOTE ONT PELANGGAN";

impl NatRule {
    /// Whether this is the managed remote-ONT rule.
    pub fn is_ont_rule(&self) -> bool {
        self.comment.to_uppercase().contains(ONT_RULE_SENTINEL)
    }
}

/// Operator view of a router's remote-ONT mapping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NatConfigView {
    pub router: String,
    pub rule_id: String,
    /// Current rewrite target address (`to-addresses`).
    pub current_ip: String,
    /// Current rewrite target port (`to-ports`).
    pub current_port: String,
    /// Inbound port the rule matches (`dst-port`).
    pub dst_port: String,
    pub protocol: String,
    pub comment: String,
    pub disabled: bool,
    pub bytes: i64,
    pub packets: i64,
    /// Static tunnel metadata copied from the router record.
    pub tunnel_endpoint: String,
    pub public_ont_url: String,
}

impl NatConfigView {
    pub fn project(router: &Router, rule: &NatRule) -> Self {
        Self {
            router: router.name.clone(),
            rule_id: rule.id.clone(),
            current_ip: rule.to_addresses.clone(),
            current_port: rule.to_ports.clone(),
            dst_port: rule.dst_port.clone(),
            protocol: rule.protocol.clone(),
            comment: rule.comment.clone(),
            disabled: rule.disabled,
            bytes: rule.bytes,
            packets: rule.packets,
            tunnel_endpoint: router.tunnel_endpoint.clone(),
            public_ont_url: router.public_ont_url.clone(),
        }
    }
}

/// One live PPPoE session. Transient; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActiveSubscriber {
    pub router: String,
    pub username: String,
    /// Address assigned to the subscriber session.
    pub address: String,
    /// Line identity (MAC or circuit id) reported by the access device.
    pub caller_id: String,
    pub uptime: String,
    pub encoding: String,
    /// The session's `service` field; profile resolution happens in search.
    pub service: String,
}

/// Result of a single-router connectivity probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionTestResult {
    pub router: String,
    pub reachable: bool,
    /// Identity the device reported, when reachable.
    pub identity: Option<String>,
    pub response_ms: u64,
    pub error: Option<String>,
}

/// `/system/resource/print` projection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RouterResources {
    pub version: String,
    pub board_name: String,
    pub platform: String,
    pub architecture_name: String,
    pub cpu: String,
    pub cpu_count: String,
    pub cpu_load_percent: f64,
    pub total_memory_bytes: i64,
    pub free_memory_bytes: i64,
    pub uptime: String,
}

impl RouterResources {
    pub fn total_memory_mb(&self) -> f64 {
        self.total_memory_bytes as f64 / (1024.0 * 1024.0)
    }

    pub fn free_memory_mb(&self) -> f64 {
        self.free_memory_bytes as f64 / (1024.0 * 1024.0)
    }

    pub fn used_memory_mb(&self) -> f64 {
        self.total_memory_mb() - self.free_memory_mb()
    }
}
