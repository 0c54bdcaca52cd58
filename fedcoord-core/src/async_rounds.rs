//! Time/quorum-driven round completion.
//!
//! When enabled, a round becomes ready for aggregation as soon as either
//! the update quorum (`min_updates`) is met or the round deadline
//! (`max_duration`) has passed with at least one update in hand. A deadline
//! expiring on an empty round triggers nothing; the round keeps waiting for
//! its first update. Clients left behind at the cutoff are the round's
//! stragglers.

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use fedcoord_common::config::AsyncRoundConfig;

/// Async bookkeeping for one round, served by `get_async_stats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsyncRoundStats {
    pub round_id: u64,
    pub enabled: bool,
    pub assigned: usize,
    pub received: usize,
    pub min_updates: usize,
    pub max_duration_seconds: f64,
    /// Seconds since the round opened; absent once the round closed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_seconds: Option<f64>,
    /// Seconds until the deadline fires; absent once the round closed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_seconds: Option<f64>,
    pub ready: bool,
    pub stragglers: Vec<String>,
}

/// Deadline tracking and straggler records for async rounds.
#[derive(Debug)]
pub struct AsyncRoundController {
    config: AsyncRoundConfig,
    /// Open-round start instants.
    started: HashMap<u64, Instant>,
    /// Stragglers recorded when each round closed.
    stragglers: HashMap<u64, Vec<String>>,
}

impl AsyncRoundController {
    pub fn new(config: AsyncRoundConfig) -> Self {
        Self {
            config,
            started: HashMap::new(),
            stragglers: HashMap::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn min_updates(&self) -> usize {
        self.config.min_updates
    }

    /// Starts deadline tracking for a newly opened round.
    pub fn round_opened(&mut self, round_id: u64, at: Instant) {
        if self.config.enabled {
            self.started.insert(round_id, at);
        }
    }

    /// Whether the controller would fire aggregation for this round now.
    pub fn is_ready(&self, round_id: u64, received: usize, now: Instant) -> bool {
        if !self.config.enabled || received == 0 {
            return false;
        }
        if received >= self.config.min_updates {
            return true;
        }
        match self.started.get(&round_id) {
            Some(&opened) => now.duration_since(opened) >= self.config.max_duration,
            None => false,
        }
    }

    /// Stops tracking a closed round and remembers its stragglers.
    pub fn round_closed(&mut self, round_id: u64, stragglers: Vec<String>) {
        self.started.remove(&round_id);
        self.stragglers.insert(round_id, stragglers);
    }

    /// Stragglers recorded when the round closed (empty while open).
    pub fn stragglers(&self, round_id: u64) -> &[String] {
        self.stragglers
            .get(&round_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Builds the `get_async_stats` view for a round.
    pub fn stats(
        &self,
        round_id: u64,
        assigned: usize,
        received: usize,
        now: Instant,
    ) -> AsyncRoundStats {
        let elapsed = self
            .started
            .get(&round_id)
            .map(|&opened| now.duration_since(opened).as_secs_f64());
        let max = self.config.max_duration.as_secs_f64();

        AsyncRoundStats {
            round_id,
            enabled: self.config.enabled,
            assigned,
            received,
            min_updates: self.config.min_updates,
            max_duration_seconds: max,
            elapsed_seconds: elapsed,
            remaining_seconds: elapsed.map(|e| (max - e).max(0.0)),
            ready: self.is_ready(round_id, received, now),
            stragglers: self.stragglers(round_id).to_vec(),
        }
    }
}
