//! Per-round and global metrics.
//!
//! Snapshots live in memory for the coordinator's lifetime. When a round
//! closes, its finished snapshot is also written to `metrics/round_<N>.json`
//! and summarized in `logs/rounds.log` so operators can diff across
//! restarts; both writes are best-effort and run off the serialized region.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write as _};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use fedcoord_common::{unix_time_ms, ModelVersion};

/// Metrics for one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSnapshot {
    pub round_id: u64,
    pub model_version: ModelVersion,
    pub clients_assigned: u32,
    /// Submissions that reached the intake pipeline for this round.
    pub updates_received: u32,
    pub updates_accepted: u32,
    /// Rejections keyed by error code.
    pub updates_rejected: BTreeMap<String, u32>,
    pub started_at_ms: u64,
    pub closed_at_ms: Option<u64>,
    pub aggregation_ms: Option<u64>,
    /// Clients assigned to the round whose update never arrived.
    pub stragglers: Vec<String>,
}

impl RoundSnapshot {
    fn new(round_id: u64, model_version: ModelVersion) -> Self {
        Self {
            round_id,
            model_version,
            clients_assigned: 0,
            updates_received: 0,
            updates_accepted: 0,
            updates_rejected: BTreeMap::new(),
            started_at_ms: unix_time_ms(),
            closed_at_ms: None,
            aggregation_ms: None,
            stragglers: Vec::new(),
        }
    }

    pub fn rejected_total(&self) -> u32 {
        self.updates_rejected.values().sum()
    }
}

/// Coordinator-wide counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GlobalCounters {
    pub clients_registered: u64,
    pub updates_accepted: u64,
    pub updates_rejected: u64,
    pub rounds_closed: u64,
}

/// Full metrics export (`get_metrics` with no round argument).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsExport {
    pub global: GlobalCounters,
    pub rounds: Vec<RoundSnapshot>,
}

/// In-memory metrics ledger.
#[derive(Debug, Default)]
pub struct MetricsLedger {
    rounds: BTreeMap<u64, RoundSnapshot>,
    global: GlobalCounters,
}

impl MetricsLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn round_started(&mut self, round_id: u64, model_version: ModelVersion) {
        self.rounds
            .insert(round_id, RoundSnapshot::new(round_id, model_version));
    }

    pub fn client_registered(&mut self) {
        self.global.clients_registered += 1;
    }

    pub fn client_assigned(&mut self, round_id: u64) {
        if let Some(snapshot) = self.rounds.get_mut(&round_id) {
            snapshot.clients_assigned += 1;
        }
    }

    pub fn update_accepted(&mut self, round_id: u64) {
        if let Some(snapshot) = self.rounds.get_mut(&round_id) {
            snapshot.updates_received += 1;
            snapshot.updates_accepted += 1;
        }
        self.global.updates_accepted += 1;
    }

    pub fn update_rejected(&mut self, round_id: u64, reason: &str) {
        if let Some(snapshot) = self.rounds.get_mut(&round_id) {
            snapshot.updates_received += 1;
            *snapshot
                .updates_rejected
                .entry(reason.to_string())
                .or_default() += 1;
        }
        self.global.updates_rejected += 1;
    }

    /// Closes the round's snapshot and returns a copy for persistence.
    pub fn round_closed(
        &mut self,
        round_id: u64,
        aggregation: Option<Duration>,
        stragglers: &[String],
    ) -> Option<RoundSnapshot> {
        let snapshot = self.rounds.get_mut(&round_id)?;
        self.global.rounds_closed += 1;
        snapshot.closed_at_ms = Some(unix_time_ms());
        snapshot.aggregation_ms = aggregation.map(|d| d.as_millis() as u64);
        snapshot.stragglers = stragglers.to_vec();
        Some(snapshot.clone())
    }

    pub fn get(&self, round_id: u64) -> Option<&RoundSnapshot> {
        self.rounds.get(&round_id)
    }

    pub fn latest(&self) -> Option<&RoundSnapshot> {
        self.rounds.values().next_back()
    }

    pub fn global(&self) -> GlobalCounters {
        self.global
    }

    pub fn export(&self) -> MetricsExport {
        MetricsExport {
            global: self.global,
            rounds: self.rounds.values().cloned().collect(),
        }
    }
}

/// Writes a closed round's snapshot to disk and appends the round summary
/// log line. Failures are logged and swallowed; metrics persistence never
/// fails a round.
pub fn persist_round_snapshot(metrics_dir: &Path, logs_dir: &Path, snapshot: &RoundSnapshot) {
    if let Err(e) = write_snapshot_json(metrics_dir, snapshot) {
        warn!(round = snapshot.round_id, error = %e, "failed to persist round metrics");
    }
    if let Err(e) = append_round_log(logs_dir, snapshot) {
        warn!(round = snapshot.round_id, error = %e, "failed to append round log");
    }
}

fn write_snapshot_json(metrics_dir: &Path, snapshot: &RoundSnapshot) -> io::Result<()> {
    fs::create_dir_all(metrics_dir)?;
    let path = metrics_dir.join(format!("round_{}.json", snapshot.round_id));
    let data = serde_json::to_vec_pretty(snapshot)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    fs::write(path, data)
}

fn append_round_log(logs_dir: &Path, snapshot: &RoundSnapshot) -> io::Result<()> {
    fs::create_dir_all(logs_dir)?;
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(logs_dir.join("rounds.log"))?;
    writeln!(
        file,
        "[{}] round {} (model {}): assigned={} received={} accepted={} rejected={} stragglers={} aggregation_ms={}",
        snapshot.closed_at_ms.unwrap_or_else(unix_time_ms),
        snapshot.round_id,
        snapshot.model_version,
        snapshot.clients_assigned,
        snapshot.updates_received,
        snapshot.updates_accepted,
        snapshot.rejected_total(),
        snapshot.stragglers.len(),
        snapshot.aggregation_ms.unwrap_or(0),
    )
}
