//! Round lifecycle state machine and client assignment tracking.
//!
//! States move monotonically OPEN → COLLECTING → AGGREGATING → CLOSED. At
//! most one round is accepting work at any time (the current round); its
//! successor opens the moment it closes. A client holds an assignment in at
//! most one non-closed round, and a round's received set is always a subset
//! of its assigned set.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use fedcoord_common::{unix_time_ms, CoordError, ModelVersion, WeightDelta};

/// Lifecycle state of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundState {
    Open,
    Collecting,
    Aggregating,
    Closed,
}

impl std::fmt::Display for RoundState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RoundState::Open => "OPEN",
            RoundState::Collecting => "COLLECTING",
            RoundState::Aggregating => "AGGREGATING",
            RoundState::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

/// Why a round reached CLOSED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Aggregation succeeded and published this version.
    Aggregated { new_version: ModelVersion },
    /// Aggregation was abandoned (shape mismatch or internal failure); the
    /// successor round reuses the same input version.
    AggregationFailed,
}

/// A buffered client submission.
#[derive(Debug, Clone)]
pub struct ReceivedUpdate {
    pub delta: WeightDelta,
    pub final_loss: Option<f64>,
    pub submitted_at_ms: u64,
    /// Time between round opening and this submission.
    pub latency: Duration,
}

/// One training round.
#[derive(Debug)]
pub struct Round {
    pub id: u64,
    /// The model version clients of this round train against. Authoritative
    /// for shape compatibility and as the aggregation base.
    pub input_version: ModelVersion,
    pub state: RoundState,
    assigned: BTreeSet<String>,
    received: BTreeMap<String, ReceivedUpdate>,
    pub opened_at: Instant,
    pub opened_at_ms: u64,
    pub closed_at_ms: Option<u64>,
    pub close_reason: Option<CloseReason>,
}

impl Round {
    fn new(id: u64, input_version: ModelVersion) -> Self {
        Self {
            id,
            input_version,
            state: RoundState::Open,
            assigned: BTreeSet::new(),
            received: BTreeMap::new(),
            opened_at: Instant::now(),
            opened_at_ms: unix_time_ms(),
            closed_at_ms: None,
            close_reason: None,
        }
    }

    pub fn assigned(&self) -> &BTreeSet<String> {
        &self.assigned
    }

    pub fn received(&self) -> &BTreeMap<String, ReceivedUpdate> {
        &self.received
    }

    /// True while the round can still take assignments or updates.
    pub fn is_active(&self) -> bool {
        matches!(self.state, RoundState::Open | RoundState::Collecting)
    }

    /// Assigned clients whose update has not arrived.
    pub fn stragglers(&self) -> Vec<String> {
        self.assigned
            .iter()
            .filter(|c| !self.received.contains_key(*c))
            .cloned()
            .collect()
    }
}

/// Read-only round view for status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundStatusView {
    pub round_id: u64,
    pub model_version: ModelVersion,
    pub state: RoundState,
    pub assigned: Vec<String>,
    pub received: Vec<String>,
    pub total_assigned: usize,
    pub total_received: usize,
    pub opened_at_ms: u64,
    pub closed_at_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<CloseReason>,
}

/// Outcome of an assignment request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub round_id: u64,
    pub input_version: ModelVersion,
    /// False when an existing assignment was returned idempotently.
    pub newly_assigned: bool,
}

/// Ledger-settlement data produced when a round closes.
#[derive(Debug)]
pub struct ClosedRound {
    pub round_id: u64,
    /// Clients whose accepted update contributed, with submission latency.
    pub contributors: Vec<(String, Duration)>,
    /// Assigned clients that never delivered.
    pub stragglers: Vec<String>,
    pub successor_id: u64,
    pub successor_version: ModelVersion,
}

/// Holds the rounds mapping, the registered-client set, and the per-client
/// assignment index.
#[derive(Debug)]
pub struct RoundManager {
    clients: BTreeSet<String>,
    rounds: BTreeMap<u64, Round>,
    /// client id -> round id of its live assignment (at most one).
    assignments: HashMap<String, u64>,
    current_round_id: u64,
    next_round_id: u64,
}

impl RoundManager {
    /// Creates the manager with round 1 open against the given version.
    pub fn new(initial_version: ModelVersion) -> Self {
        let mut rounds = BTreeMap::new();
        rounds.insert(1, Round::new(1, initial_version));
        Self {
            clients: BTreeSet::new(),
            rounds,
            assignments: HashMap::new(),
            current_round_id: 1,
            next_round_id: 2,
        }
    }

    /// Registers a client id, rejecting duplicates.
    pub fn register(&mut self, client_id: &str) -> Result<(), CoordError> {
        if !self.clients.insert(client_id.to_string()) {
            return Err(CoordError::DuplicateClient);
        }
        Ok(())
    }

    pub fn is_registered(&self, client_id: &str) -> bool {
        self.clients.contains(client_id)
    }

    pub fn registered_count(&self) -> usize {
        self.clients.len()
    }

    pub fn round(&self, round_id: u64) -> Option<&Round> {
        self.rounds.get(&round_id)
    }

    pub fn current_round(&self) -> &Round {
        &self.rounds[&self.current_round_id]
    }

    pub fn current_round_id(&self) -> u64 {
        self.current_round_id
    }

    /// Assigns the client to the current round, idempotently returning an
    /// existing live assignment.
    ///
    /// A client that already submitted for the current round gets nothing
    /// until that round closes, and no assignment is handed out while the
    /// current round is aggregating.
    pub fn assign(&mut self, client_id: &str) -> Result<Assignment, CoordError> {
        if !self.is_registered(client_id) {
            return Err(CoordError::UnknownClient);
        }

        if let Some(&round_id) = self.assignments.get(client_id) {
            let round = &self.rounds[&round_id];
            if round.is_active() {
                if round.received.contains_key(client_id) {
                    // Task done; the next task exists only once this round
                    // closes.
                    return Err(CoordError::NoTaskAvailable);
                }
                return Ok(Assignment {
                    round_id,
                    input_version: round.input_version,
                    newly_assigned: false,
                });
            }
            self.assignments.remove(client_id);
        }

        let round = self
            .rounds
            .get_mut(&self.current_round_id)
            .expect("current round always exists");
        if !round.is_active() {
            return Err(CoordError::NoTaskAvailable);
        }

        round.assigned.insert(client_id.to_string());
        if round.state == RoundState::Open {
            round.state = RoundState::Collecting;
        }
        self.assignments.insert(client_id.to_string(), round.id);

        Ok(Assignment {
            round_id: round.id,
            input_version: round.input_version,
            newly_assigned: true,
        })
    }

    /// Buffers an accepted update and returns its submission latency.
    ///
    /// Enforces that the round is collecting, the client is assigned to it,
    /// and this is the client's first update for the round.
    pub fn record_update(
        &mut self,
        client_id: &str,
        round_id: u64,
        delta: WeightDelta,
        final_loss: Option<f64>,
    ) -> Result<Duration, CoordError> {
        let round = self.rounds.get_mut(&round_id).ok_or(CoordError::UnknownRound)?;

        if !round.assigned.contains(client_id) {
            return Err(CoordError::NoAssignment);
        }
        if round.state != RoundState::Collecting {
            return Err(CoordError::RoundNotCollecting);
        }
        if round.received.contains_key(client_id) {
            return Err(CoordError::DuplicateUpdate);
        }

        let latency = round.opened_at.elapsed();
        round.received.insert(
            client_id.to_string(),
            ReceivedUpdate {
                delta,
                final_loss,
                submitted_at_ms: unix_time_ms(),
                latency,
            },
        );
        Ok(latency)
    }

    /// Transitions the round to AGGREGATING and snapshots its deltas in
    /// ascending client-id order.
    pub fn begin_aggregation(
        &mut self,
        round_id: u64,
    ) -> Result<(ModelVersion, Vec<(String, WeightDelta)>), CoordError> {
        let round = self.rounds.get_mut(&round_id).ok_or(CoordError::UnknownRound)?;

        match round.state {
            RoundState::Collecting => {}
            RoundState::Open => return Err(CoordError::NotReady),
            RoundState::Aggregating | RoundState::Closed => {
                return Err(CoordError::RoundNotCollecting)
            }
        }
        if round.received.is_empty() {
            return Err(CoordError::NotReady);
        }

        round.state = RoundState::Aggregating;
        let deltas = round
            .received
            .iter()
            .map(|(client, update)| (client.clone(), update.delta.clone()))
            .collect();
        Ok((round.input_version, deltas))
    }

    /// Closes an aggregating round and opens its successor.
    ///
    /// On success the successor trains against the published version; on
    /// failure it reuses the closed round's input version. All of the
    /// round's assignments are released either way.
    pub fn complete_aggregation(
        &mut self,
        round_id: u64,
        reason: CloseReason,
    ) -> Result<ClosedRound, CoordError> {
        let round = self.rounds.get_mut(&round_id).ok_or(CoordError::UnknownRound)?;
        if round.state != RoundState::Aggregating {
            return Err(CoordError::Internal(format!(
                "round {round_id} closed while in state {}",
                round.state
            )));
        }

        round.state = RoundState::Closed;
        round.closed_at_ms = Some(unix_time_ms());
        round.close_reason = Some(reason);

        let contributors: Vec<(String, Duration)> = round
            .received
            .iter()
            .map(|(client, update)| (client.clone(), update.latency))
            .collect();
        let stragglers = round.stragglers();
        let successor_version = match reason {
            CloseReason::Aggregated { new_version } => new_version,
            CloseReason::AggregationFailed => round.input_version,
        };

        for client in round.assigned.clone() {
            if self.assignments.get(&client) == Some(&round_id) {
                self.assignments.remove(&client);
            }
        }

        let successor_id = self.next_round_id;
        self.next_round_id += 1;
        self.rounds
            .insert(successor_id, Round::new(successor_id, successor_version));
        self.current_round_id = successor_id;

        Ok(ClosedRound {
            round_id,
            contributors,
            stragglers,
            successor_id,
            successor_version,
        })
    }

    /// Drops the buffered deltas of a closed round. Called after the
    /// metrics snapshot is written; the payloads are not needed again.
    pub fn discard_updates(&mut self, round_id: u64) {
        if let Some(round) = self.rounds.get_mut(&round_id) {
            if round.state == RoundState::Closed {
                round.received.clear();
            }
        }
    }

    pub fn status(&self, round_id: u64) -> Option<RoundStatusView> {
        let round = self.rounds.get(&round_id)?;
        Some(RoundStatusView {
            round_id: round.id,
            model_version: round.input_version,
            state: round.state,
            assigned: round.assigned.iter().cloned().collect(),
            received: round.received.keys().cloned().collect(),
            total_assigned: round.assigned.len(),
            total_received: round.received.len(),
            opened_at_ms: round.opened_at_ms,
            closed_at_ms: round.closed_at_ms,
            close_reason: round.close_reason,
        })
    }
}
