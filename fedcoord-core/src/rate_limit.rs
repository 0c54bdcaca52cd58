//! Per-client sliding-window rate limiting.
//!
//! Two independent windows per client: one covering all API requests, one
//! covering update submissions. A denied check does not consume quota, so a
//! client that backs off recovers as its window slides.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use fedcoord_common::config::RateLimitConfig;

/// Which window a request counts against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitKind {
    /// Any client-facing API request.
    Request,
    /// An update submission.
    Update,
}

/// Per-client request statistics, for operator introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientRateStats {
    pub requests_in_window: usize,
    pub updates_in_window: usize,
}

#[derive(Debug, Default)]
struct ClientWindows {
    requests: VecDeque<Instant>,
    updates: VecDeque<Instant>,
}

impl ClientWindows {
    fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.updates.is_empty()
    }
}

/// Sliding-window rate limiter keyed by client id.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: HashMap<String, ClientWindows>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: HashMap::new(),
        }
    }

    /// Checks whether the client may perform one more event of `kind` at
    /// `now`, recording it when allowed. This is the limiter's sole mutator.
    pub fn check(&mut self, client_id: &str, kind: LimitKind, now: Instant) -> bool {
        let limit = match kind {
            LimitKind::Request => self.config.requests,
            LimitKind::Update => self.config.updates,
        };

        let windows = self.windows.entry(client_id.to_string()).or_default();
        let queue = match kind {
            LimitKind::Request => &mut windows.requests,
            LimitKind::Update => &mut windows.updates,
        };

        while let Some(front) = queue.front() {
            if now.duration_since(*front) >= limit.window {
                queue.pop_front();
            } else {
                break;
            }
        }

        let allowed = (queue.len() as u32) < limit.limit;
        if allowed {
            queue.push_back(now);
        }
        allowed
    }

    /// Drops every timestamp older than its window, removing clients whose
    /// windows drained entirely.
    pub fn prune(&mut self, now: Instant) {
        let request_window = self.config.requests.window;
        let update_window = self.config.updates.window;
        self.windows.retain(|_, windows| {
            windows
                .requests
                .retain(|t| now.duration_since(*t) < request_window);
            windows
                .updates
                .retain(|t| now.duration_since(*t) < update_window);
            !windows.is_empty()
        });
    }

    /// Current in-window counts for a client.
    pub fn stats(&self, client_id: &str) -> ClientRateStats {
        match self.windows.get(client_id) {
            Some(windows) => ClientRateStats {
                requests_in_window: windows.requests.len(),
                updates_in_window: windows.updates.len(),
            },
            None => ClientRateStats::default(),
        }
    }

    /// Number of clients with live window state.
    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }
}
