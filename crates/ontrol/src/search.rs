//! Fuzzy subscriber search across the fleet.
//!
//! Scores every active username on the candidate routers against the search
//! term, keeps matches at or above the threshold, resolves the configured
//! profile from the secret table, and merges the per-router results into one
//! descending, stably sorted list.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::debug;

use crate::error::CoreError;
use crate::fleet::FleetEngine;
use crate::similarity::{self, SCORE_THRESHOLD};
use crate::types::{ActiveSubscriber, Router};

/// One search request. `allowed_routers` is the ACL the external
/// authorization layer derived for the caller; the engine honours it
/// verbatim and computes nothing itself.
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub term: String,
    /// Restrict to one router by name.
    pub router: Option<String>,
    /// Caller-requested result cap.
    pub limit: Option<usize>,
    /// ACL-derived candidate set. `None` means the call came without an ACL
    /// and gets the hard default cap.
    pub allowed_routers: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchMatch {
    pub router: String,
    pub username: String,
    pub address: String,
    pub caller_id: String,
    pub uptime: String,
    pub encoding: String,
    /// Secret-table profile, falling back to the session's service field,
    /// then the literal `default`.
    pub profile: String,
    pub score: f64,
}

pub struct SearchEngine {
    fleet: FleetEngine,
    tokens: Vec<String>,
    default_limit: usize,
    max_unscoped_limit: usize,
}

impl SearchEngine {
    pub fn new(fleet: FleetEngine, config: &ontconf::SearchConfig) -> Self {
        let tokens = if config.locality_tokens.is_empty() {
            similarity::default_tokens()
        } else {
            config.locality_tokens.clone()
        };
        Self {
            fleet,
            tokens,
            default_limit: config.default_limit,
            max_unscoped_limit: config.max_unscoped_limit,
        }
    }

    /// Replace the locality token set (operator override).
    pub fn with_locality_tokens(mut self, tokens: Vec<String>) -> Self {
        if !tokens.is_empty() {
            self.tokens = tokens;
        }
        self
    }

    /// Run the search. Routers that fail to answer are skipped; the
    /// remaining results still merge.
    pub async fn search(&self, request: SearchRequest) -> Result<Vec<SearchMatch>, CoreError> {
        let term = request.term.trim().to_string();
        if term.is_empty() {
            return Err(CoreError::InvalidArgument(
                "search term must not be empty".into(),
            ));
        }

        let candidates = self.candidate_routers(&request)?;
        let cap = self.effective_cap(&request);

        let results: Arc<Mutex<Vec<SearchMatch>>> = Arc::new(Mutex::new(Vec::new()));
        let mut set = JoinSet::new();
        for router in candidates {
            let fleet = self.fleet.clone();
            let tokens = self.tokens.clone();
            let term = term.clone();
            let results = results.clone();
            set.spawn(async move {
                match fleet.active_with_profiles(router.clone()).await {
                    Ok((active, profiles)) => {
                        let matches = score_router(&term, &active, &profiles, &tokens);
                        results.lock().await.extend(matches);
                    }
                    Err(err) => {
                        debug!(router = %router.name, error = %err, "search branch skipped");
                    }
                }
            });
        }
        while set.join_next().await.is_some() {}

        let mut merged = match Arc::try_unwrap(results) {
            Ok(mutex) => mutex.into_inner(),
            Err(arc) => arc.lock().await.drain(..).collect(),
        };

        // Stable sort keeps router iteration order among equal scores.
        merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        merged.truncate(cap);
        Ok(merged)
    }

    fn candidate_routers(&self, request: &SearchRequest) -> Result<Vec<Arc<Router>>, CoreError> {
        let mut routers = self.fleet.directory().enabled();
        if let Some(allowed) = &request.allowed_routers {
            routers.retain(|r| allowed.iter().any(|name| name == &r.name));
        }
        if let Some(name) = &request.router {
            routers.retain(|r| &r.name == name);
            if routers.is_empty() {
                return Err(CoreError::NotFound(format!(
                    "router '{name}' is not available for this search"
                )));
            }
        }
        Ok(routers)
    }

    /// Default 5; hard ceiling 10 without an ACL, caller-chosen with one.
    fn effective_cap(&self, request: &SearchRequest) -> usize {
        match (request.limit, request.allowed_routers.is_some()) {
            (None, _) => self.default_limit,
            (Some(limit), true) => limit,
            (Some(limit), false) => limit.min(self.max_unscoped_limit),
        }
    }
}

/// Score one router's active sessions against the term.
fn score_router(
    term: &str,
    active: &[ActiveSubscriber],
    profiles: &HashMap<String, String>,
    tokens: &[String],
) -> Vec<SearchMatch> {
    active
        .iter()
        .filter_map(|session| {
            let score = similarity::composite_score(term, &session.username, tokens);
            if score < SCORE_THRESHOLD {
                return None;
            }
            let profile = profiles
                .get(&session.username)
                .filter(|p| !p.is_empty())
                .cloned()
                .or_else(|| {
                    (!session.service.is_empty()).then(|| session.service.clone())
                })
                .unwrap_or_else(|| "default".to_string());
            Some(SearchMatch {
                router: session.router.clone(),
                username: session.username.clone(),
                address: session.address.clone(),
                caller_id: session.caller_id.clone(),
                uptime: session.uptime.clone(),
                encoding: session.encoding.clone(),
                profile,
                score,
            })
        })
        .collect()
}

impl std::fmt::Debug for SearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchEngine")
            .field("tokens", &self.tokens.len())
            .finish_non_exhaustive()
    }
}
