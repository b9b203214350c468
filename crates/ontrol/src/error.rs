//! Error taxonomy for the control plane.
//!
//! Every recoverable failure is one of these kinds; callers branch on
//! [`CoreError::kind`] rather than matching variants, and the HTTP layer
//! maps kinds to titles/suggestions via [`ErrorKind::title`].

use std::time::Duration;

use rosproto::ProtoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Input failed validation before any I/O.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Authoritative rule or router absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Per-router concurrency cap reached.
    #[error("connection pool exhausted for router {router}")]
    PoolExhausted { router: String },

    /// Circuit is open; retry after the cooldown.
    #[error("circuit open for router {router}, retry in {}s", retry_after.as_secs())]
    BreakerOpen {
        router: String,
        retry_after: Duration,
    },

    /// Circuit is half-open and the probe slot is taken.
    #[error("circuit probing router {router}")]
    BreakerProbing { router: String },

    /// TCP dial failed (timeout or refused).
    #[error("router {router} unreachable: {message}")]
    NetworkUnreachable { router: String, message: String },

    /// Protocol login rejected.
    #[error("authentication failed on router {router}: {message}")]
    AuthenticationFailed { router: String, message: String },

    /// Command executed but the device returned an error.
    #[error("protocol error on router {router}: {message}")]
    ProtocolError { router: String, message: String },

    /// Bounded operation exceeded its deadline.
    #[error("timeout talking to router {router}: {message}")]
    Timeout { router: String, message: String },

    /// Invariant violated; never caused by a counterparty.
    #[error("internal error: {0}")]
    Internal(String),
}

/// The kind behind a [`CoreError`], for classification and presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    PoolExhausted,
    BreakerOpen,
    BreakerProbing,
    NetworkUnreachable,
    AuthenticationFailed,
    ProtocolError,
    Timeout,
    Internal,
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            CoreError::NotFound(_) => ErrorKind::NotFound,
            CoreError::PoolExhausted { .. } => ErrorKind::PoolExhausted,
            CoreError::BreakerOpen { .. } => ErrorKind::BreakerOpen,
            CoreError::BreakerProbing { .. } => ErrorKind::BreakerProbing,
            CoreError::NetworkUnreachable { .. } => ErrorKind::NetworkUnreachable,
            CoreError::AuthenticationFailed { .. } => ErrorKind::AuthenticationFailed,
            CoreError::ProtocolError { .. } => ErrorKind::ProtocolError,
            CoreError::Timeout { .. } => ErrorKind::Timeout,
            CoreError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Remaining breaker cooldown, if this error carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            CoreError::BreakerOpen { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Whether this failure touched the wire toward the router. Only these
    /// count against the router's circuit breaker.
    pub fn touched_wire(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NetworkUnreachable
                | ErrorKind::AuthenticationFailed
                | ErrorKind::ProtocolError
                | ErrorKind::Timeout
        )
    }

    /// Map a wire error into the taxonomy, attaching the router name.
    pub fn from_proto(router: &str, err: ProtoError) -> Self {
        let router = router.to_string();
        match err {
            ProtoError::ConnectTimeout { addr, seconds } => CoreError::NetworkUnreachable {
                router,
                message: format!("connect to {addr} timed out after {seconds}s"),
            },
            ProtoError::Io(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::ConnectionRefused
                        | std::io::ErrorKind::HostUnreachable
                        | std::io::ErrorKind::NetworkUnreachable
                ) =>
            {
                CoreError::NetworkUnreachable {
                    router,
                    message: e.to_string(),
                }
            }
            ProtoError::LoginRejected(message) => {
                CoreError::AuthenticationFailed { router, message }
            }
            ProtoError::ReadTimeout { seconds } => CoreError::Timeout {
                router,
                message: format!("no reply within {seconds}s"),
            },
            ProtoError::Trap { message } => CoreError::ProtocolError { router, message },
            other => CoreError::ProtocolError {
                router,
                message: other.to_string(),
            },
        }
    }
}

impl ErrorKind {
    /// Deterministic display title for the API layer.
    pub fn title(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "Invalid input",
            ErrorKind::NotFound => "Not found",
            ErrorKind::PoolExhausted => "Router busy",
            ErrorKind::BreakerOpen => "Router temporarily unavailable",
            ErrorKind::BreakerProbing => "Router recovery in progress",
            ErrorKind::NetworkUnreachable => "Router unreachable",
            ErrorKind::AuthenticationFailed => "Router authentication failed",
            ErrorKind::ProtocolError => "Router rejected the command",
            ErrorKind::Timeout => "Router timed out",
            ErrorKind::Internal => "Internal error",
        }
    }

    /// Optional operator-facing suggestion.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            ErrorKind::InvalidArgument => Some("Check the request parameters and retry."),
            ErrorKind::PoolExhausted => Some("Too many concurrent operations; retry shortly."),
            ErrorKind::BreakerOpen => Some("The router failed repeatedly; wait for the cooldown."),
            ErrorKind::BreakerProbing => Some("A recovery probe is in flight; retry shortly."),
            ErrorKind::NetworkUnreachable => {
                Some("Verify the management address and upstream link.")
            }
            ErrorKind::AuthenticationFailed => Some("Verify the stored API credentials."),
            ErrorKind::Timeout => Some("The router is slow or saturated; retry shortly."),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proto_errors_map_to_the_taxonomy() {
        let err = CoreError::from_proto(
            "edge-1",
            ProtoError::ConnectTimeout {
                addr: "10.0.0.1:8728".into(),
                seconds: 8,
            },
        );
        assert_eq!(err.kind(), ErrorKind::NetworkUnreachable);

        let err = CoreError::from_proto("edge-1", ProtoError::LoginRejected("nope".into()));
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);

        let err = CoreError::from_proto(
            "edge-1",
            ProtoError::Trap {
                message: "no such item".into(),
            },
        );
        assert_eq!(err.kind(), ErrorKind::ProtocolError);

        let err = CoreError::from_proto("edge-1", ProtoError::ReadTimeout { seconds: 15 });
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn wire_classification_for_breaker() {
        assert!(CoreError::NetworkUnreachable {
            router: "r".into(),
            message: String::new()
        }
        .touched_wire());
        assert!(!CoreError::PoolExhausted { router: "r".into() }.touched_wire());
        assert!(!CoreError::InvalidArgument("x".into()).touched_wire());
        assert!(!CoreError::BreakerOpen {
            router: "r".into(),
            retry_after: Duration::from_secs(1)
        }
        .touched_wire());
    }

    #[test]
    fn every_kind_has_a_title() {
        for kind in [
            ErrorKind::InvalidArgument,
            ErrorKind::NotFound,
            ErrorKind::PoolExhausted,
            ErrorKind::BreakerOpen,
            ErrorKind::BreakerProbing,
            ErrorKind::NetworkUnreachable,
            ErrorKind::AuthenticationFailed,
            ErrorKind::ProtocolError,
            ErrorKind::Timeout,
            ErrorKind::Internal,
        ] {
            assert!(!kind.title().is_empty());
        }
    }
}
