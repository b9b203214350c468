//! Per-router circuit breakers.
//!
//! Each router gets a three-state breaker: CLOSED counts consecutive
//! failures, OPEN rejects calls until the cooldown elapses, HALF_OPEN lets
//! exactly one probe through to test recovery. The state machine takes
//! `Instant` parameters explicitly so tests control time; the registry
//! wraps it for async callers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ontconf::BreakerConfig;
use tracing::{debug, warn};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

/// Why a call was rejected without touching the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Circuit is open; retry after the remaining cooldown.
    Open { retry_after: Duration },
    /// Circuit is half-open and the single probe slot is taken.
    Probing,
}

/// Point-in-time view of one breaker, for operators.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BreakerSnapshot {
    pub router: String,
    #[serde(serialize_with = "serialize_state")]
    pub state: CircuitState,
    pub consecutive_failures: u32,
}

fn serialize_state<S: serde::Serializer>(s: &CircuitState, ser: S) -> Result<S::Ok, S::Error> {
    ser.serialize_str(s.as_str())
}

/// The state machine proper. No I/O, no clocks of its own.
#[derive(Debug)]
struct BreakerCore {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    last_success: Option<Instant>,
    /// Half-open probes in flight; budget is exactly one.
    probes_inflight: u32,
}

impl BreakerCore {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure: None,
            last_success: None,
            probes_inflight: 0,
        }
    }

    /// Admit or reject a call. `Ok(true)` means the call is the half-open
    /// probe and must report back through `on_success`/`on_failure`/
    /// `on_ignored` with `probe = true`.
    fn try_acquire(&mut self, config: &BreakerConfig, now: Instant) -> Result<bool, Rejection> {
        match self.state {
            CircuitState::Closed => Ok(false),
            CircuitState::Open => {
                let elapsed = self
                    .last_failure
                    .map(|t| now.duration_since(t))
                    .unwrap_or(Duration::MAX);
                if elapsed < config.open_timeout() {
                    Err(Rejection::Open {
                        retry_after: config.open_timeout() - elapsed,
                    })
                } else {
                    self.state = CircuitState::HalfOpen;
                    self.probes_inflight = 1;
                    Ok(true)
                }
            }
            CircuitState::HalfOpen => {
                if self.probes_inflight > 0 {
                    Err(Rejection::Probing)
                } else {
                    self.probes_inflight = 1;
                    Ok(true)
                }
            }
        }
    }

    fn on_success(&mut self, now: Instant) {
        self.last_success = Some(now);
        self.consecutive_failures = 0;
        self.probes_inflight = 0;
        self.state = CircuitState::Closed;
    }

    /// Returns true when this failure tripped the breaker open.
    fn on_failure(&mut self, probe: bool, config: &BreakerConfig, now: Instant) -> bool {
        self.last_failure = Some(now);
        if probe || self.state == CircuitState::HalfOpen {
            // A failed probe reopens with the full penalty.
            self.consecutive_failures = config.failure_threshold;
            self.probes_inflight = 0;
            self.state = CircuitState::Open;
            return true;
        }
        self.consecutive_failures += 1;
        if self.consecutive_failures >= config.failure_threshold {
            self.state = CircuitState::Open;
            return true;
        }
        false
    }

    /// The call never touched the wire (pool cap, bad input); release the
    /// probe budget without a transition.
    fn on_ignored(&mut self, probe: bool) {
        if probe {
            self.probes_inflight = 0;
        }
    }
}

/// One breaker per router, created on first use.
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: Mutex<HashMap<String, Arc<Mutex<BreakerCore>>>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    fn breaker_for(&self, router: &str) -> Arc<Mutex<BreakerCore>> {
        let mut map = self.breakers.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(router.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(BreakerCore::new())))
            .clone()
    }

    /// Run `thunk` under the router's breaker.
    ///
    /// Rejections surface as `BreakerOpen`/`BreakerProbing` without invoking
    /// the thunk. Only failures that touched the wire count toward the trip
    /// threshold; anything else leaves the breaker untouched.
    pub async fn call<T, F, Fut>(&self, router: &str, thunk: F) -> Result<T, CoreError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let breaker = self.breaker_for(router);

        let probe = {
            let mut core = breaker.lock().unwrap_or_else(|e| e.into_inner());
            match core.try_acquire(&self.config, Instant::now()) {
                Ok(probe) => {
                    if probe {
                        debug!(%router, "circuit half-open, admitting probe");
                    }
                    probe
                }
                Err(Rejection::Open { retry_after }) => {
                    return Err(CoreError::BreakerOpen {
                        router: router.to_string(),
                        retry_after,
                    })
                }
                Err(Rejection::Probing) => {
                    return Err(CoreError::BreakerProbing {
                        router: router.to_string(),
                    })
                }
            }
        };

        let result = thunk().await;

        let mut core = breaker.lock().unwrap_or_else(|e| e.into_inner());
        match &result {
            Ok(_) => {
                let was_half_open = core.state == CircuitState::HalfOpen;
                core.on_success(Instant::now());
                if was_half_open {
                    debug!(%router, "circuit closed after successful probe");
                }
            }
            Err(err) if err.touched_wire() => {
                if core.on_failure(probe, &self.config, Instant::now()) {
                    warn!(%router, error = %err, "circuit opened");
                }
            }
            Err(_) => core.on_ignored(probe),
        }
        result
    }

    /// Current state for `router` (Closed if never used).
    pub fn state(&self, router: &str) -> CircuitState {
        let map = self.breakers.lock().unwrap_or_else(|e| e.into_inner());
        map.get(router)
            .map(|b| b.lock().unwrap_or_else(|e| e.into_inner()).state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let map = self.breakers.lock().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<BreakerSnapshot> = map
            .iter()
            .map(|(router, b)| {
                let core = b.lock().unwrap_or_else(|e| e.into_inner());
                BreakerSnapshot {
                    router: router.clone(),
                    state: core.state,
                    consecutive_failures: core.consecutive_failures,
                }
            })
            .collect();
        out.sort_by(|a, b| a.router.cmp(&b.router));
        out
    }
}

impl std::fmt::Debug for BreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerRegistry")
            .field("failure_threshold", &self.config.failure_threshold)
            .finish_non_exhaustive()
    }
}
