//! ontrol - control plane for a fleet of PPPoE edge routers.
//!
//! Operators use this library (behind an external HTTP layer) to see each
//! router's remote-ONT destination-NAT mapping, atomically rewrite its
//! target so a live subscriber's ONT becomes reachable through the router's
//! tunnel endpoint, look subscribers up across the fleet, and watch
//! per-router health.
//!
//! The moving parts, leaves first: [`device`] speaks the router's
//! management protocol over [`rosproto`]; [`pool`] amortizes TCP+login
//! handshakes per router; [`breaker`] fast-fails known-broken routers;
//! [`directory`] snapshots the fleet; [`fleet`] fans reads out across it
//! with short-TTL caching; [`nat`] is the single write path; [`search`]
//! matches subscriber usernames fuzzily; [`health`] keeps the background
//! status cache. [`core::Core`] wires them together for a host.

pub mod audit;
pub mod breaker;
pub mod cache;
pub mod core;
pub mod device;
pub mod directory;
pub mod error;
pub mod fleet;
pub mod health;
pub mod nat;
pub mod pool;
pub mod scraper;
pub mod search;
pub mod similarity;
pub mod telemetry;
pub mod types;
pub mod validate;

pub use crate::core::Core;
pub use audit::{AuditEvent, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use breaker::{BreakerRegistry, CircuitState};
pub use directory::{InMemoryRouterStore, RouterDirectory, RouterStore};
pub use error::{CoreError, ErrorKind};
pub use fleet::{FleetCaches, FleetEngine, FleetOutcome};
pub use health::{HealthMonitor, HealthRecord, HealthStatus};
pub use nat::{NatMutator, NatUpdate};
pub use pool::{ConnectionPool, PooledConn};
pub use scraper::{ScraperInvoker, WifiCredentials};
pub use search::{SearchEngine, SearchMatch, SearchRequest};
pub use types::{ActiveSubscriber, ConnectionTestResult, NatConfigView, NatRule, Router};
