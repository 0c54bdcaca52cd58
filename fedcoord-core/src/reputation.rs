//! Per-client participation scoring.
//!
//! The ledger observes intake and round-completion events and derives a
//! reputation score in [0, 1]:
//!
//! ```text
//! score = 0.4 * completion_rate
//!       + 0.3 * acceptance_rate
//!       + 0.2 * (1 - dropout_rate)
//!       + 0.1 * latency_score
//! ```
//!
//! with `latency_score = clamp(1 - mean_latency / 60s, 0, 1)`.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use fedcoord_common::unix_time_ms;

/// Latency at or beyond which the latency component scores zero.
pub const LATENCY_CEIL: Duration = Duration::from_secs(60);

/// Mutable reputation state for one client.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReputationRecord {
    pub rounds_participated: u64,
    pub rounds_completed: u64,
    pub rounds_dropped: u64,
    pub updates_submitted: u64,
    pub updates_accepted: u64,
    pub updates_rejected: u64,
    total_latency: Duration,
    latency_samples: u64,
    pub first_seen_ms: u64,
    pub last_seen_ms: u64,
}

impl ReputationRecord {
    pub fn completion_rate(&self) -> f64 {
        self.rounds_completed as f64 / (self.rounds_participated.max(1)) as f64
    }

    pub fn acceptance_rate(&self) -> f64 {
        self.updates_accepted as f64 / (self.updates_submitted.max(1)) as f64
    }

    pub fn dropout_rate(&self) -> f64 {
        self.rounds_dropped as f64 / (self.rounds_participated.max(1)) as f64
    }

    pub fn mean_latency(&self) -> Duration {
        if self.latency_samples == 0 {
            Duration::ZERO
        } else {
            self.total_latency / self.latency_samples as u32
        }
    }

    fn latency_score(&self) -> f64 {
        let ratio = self.mean_latency().as_secs_f64() / LATENCY_CEIL.as_secs_f64();
        (1.0 - ratio).clamp(0.0, 1.0)
    }

    /// The weighted score in [0, 1].
    pub fn score(&self) -> f64 {
        let score = 0.4 * self.completion_rate()
            + 0.3 * self.acceptance_rate()
            + 0.2 * (1.0 - self.dropout_rate())
            + 0.1 * self.latency_score();
        score.clamp(0.0, 1.0)
    }
}

/// Serializable view of one client's reputation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationSnapshot {
    pub client_id: String,
    pub score: f64,
    pub rounds_participated: u64,
    pub rounds_completed: u64,
    pub rounds_dropped: u64,
    pub completion_rate: f64,
    pub dropout_rate: f64,
    pub updates_submitted: u64,
    pub updates_accepted: u64,
    pub updates_rejected: u64,
    pub acceptance_rate: f64,
    pub mean_latency_seconds: f64,
    pub first_seen_ms: u64,
    pub last_seen_ms: u64,
}

/// Reputation ledger keyed by client id.
#[derive(Debug, Default)]
pub struct ReputationLedger {
    records: HashMap<String, ReputationRecord>,
}

impl ReputationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, client_id: &str) -> &mut ReputationRecord {
        let record = self
            .records
            .entry(client_id.to_string())
            .or_insert_with(|| {
                let now = unix_time_ms();
                ReputationRecord {
                    first_seen_ms: now,
                    ..Default::default()
                }
            });
        record.last_seen_ms = unix_time_ms();
        record
    }

    /// Creates the record at registration time.
    pub fn client_registered(&mut self, client_id: &str) {
        self.entry(client_id);
    }

    /// The client was assigned to a round.
    pub fn round_joined(&mut self, client_id: &str) {
        self.entry(client_id).rounds_participated += 1;
    }

    /// An update was accepted; `latency` is the time between round start
    /// and submission. Counts as submitted and accepted.
    pub fn update_accepted(&mut self, client_id: &str, latency: Duration) {
        let record = self.entry(client_id);
        record.updates_submitted += 1;
        record.updates_accepted += 1;
        record.total_latency += latency;
        record.latency_samples += 1;
    }

    /// An update was rejected by the intake pipeline. Counts as submitted
    /// and rejected; rejected submissions contribute no latency sample.
    pub fn update_rejected(&mut self, client_id: &str) {
        let record = self.entry(client_id);
        record.updates_submitted += 1;
        record.updates_rejected += 1;
    }

    /// The round the client contributed to closed successfully.
    pub fn round_completed(&mut self, client_id: &str) {
        self.entry(client_id).rounds_completed += 1;
    }

    /// The client was assigned but its update never arrived before the
    /// round closed.
    pub fn round_dropped(&mut self, client_id: &str) {
        self.entry(client_id).rounds_dropped += 1;
    }

    pub fn record(&self, client_id: &str) -> Option<&ReputationRecord> {
        self.records.get(client_id)
    }

    pub fn snapshot(&self, client_id: &str) -> Option<ReputationSnapshot> {
        self.records
            .get(client_id)
            .map(|r| make_snapshot(client_id, r))
    }

    /// All snapshots, highest score first.
    pub fn all(&self) -> Vec<ReputationSnapshot> {
        let mut all: Vec<_> = self
            .records
            .iter()
            .map(|(id, r)| make_snapshot(id, r))
            .collect();
        all.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.client_id.cmp(&b.client_id))
        });
        all
    }

    /// The `n` highest-scoring clients.
    pub fn top_clients(&self, n: usize) -> Vec<ReputationSnapshot> {
        let mut all = self.all();
        all.truncate(n);
        all
    }
}

fn make_snapshot(client_id: &str, record: &ReputationRecord) -> ReputationSnapshot {
    ReputationSnapshot {
        client_id: client_id.to_string(),
        score: record.score(),
        rounds_participated: record.rounds_participated,
        rounds_completed: record.rounds_completed,
        rounds_dropped: record.rounds_dropped,
        completion_rate: record.completion_rate(),
        dropout_rate: record.dropout_rate(),
        updates_submitted: record.updates_submitted,
        updates_accepted: record.updates_accepted,
        updates_rejected: record.updates_rejected,
        acceptance_rate: record.acceptance_rate(),
        mean_latency_seconds: record.mean_latency().as_secs_f64(),
        first_seen_ms: record.first_seen_ms,
        last_seen_ms: record.last_seen_ms,
    }
}
