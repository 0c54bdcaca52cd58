//! The coordinator context: all mutable engine state behind one owner.
//!
//! Every component ledger hangs off this struct, and the coordinator task
//! is its only holder, which gives the single-writer discipline: requests
//! mutate state strictly in arrival order. The context also implements the
//! two composite components, the task assigner (`assign_task`) and the
//! update-intake pipeline (`submit_update`), plus the two-phase aggregation
//! handoff (`begin_aggregation` / `finish_aggregation`) whose compute runs
//! outside this state.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use fedcoord_common::{CoordError, CoordinatorConfig, ModelVersion, WeightDelta};

use crate::aggregate::{AggregateError, AggregationJob};
use crate::async_rounds::{AsyncRoundController, AsyncRoundStats};
use crate::auth::AuthRegistry;
use crate::incentives::{IncentiveLedger, IncentiveSnapshot};
use crate::metrics::{MetricsExport, MetricsLedger, RoundSnapshot};
use crate::model_store::{ModelStore, StoredModel};
use crate::privacy::PrivacyGuard;
use crate::rate_limit::{LimitKind, RateLimiter};
use crate::reputation::{ReputationLedger, ReputationSnapshot};
use crate::rounds::{CloseReason, RoundManager, RoundState, RoundStatusView};

/// Result of `register_client`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub client_id: String,
    pub token: String,
}

/// Result of `assign_task`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskAssignment {
    pub round_id: u64,
    pub model_version: ModelVersion,
}

/// Result of a finished aggregation, success or failure.
#[derive(Debug)]
pub struct AggregationOutcome {
    pub round_id: u64,
    pub new_version: Option<ModelVersion>,
    pub num_updates: usize,
    /// Set when the round closed with `aggregation_failed`.
    pub failure: Option<String>,
    /// The closed round's metrics snapshot, handed to the caller for
    /// best-effort persistence off the serialized region.
    pub snapshot: Option<RoundSnapshot>,
}

/// Coordinator-level status summary for operator queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorStatus {
    pub current_round: u64,
    pub current_round_state: String,
    pub model_version: ModelVersion,
    pub registered_clients: usize,
    pub rounds_closed: u64,
    pub async_rounds_enabled: bool,
}

/// All engine state. See the module docs for the ownership rules.
pub struct CoordinatorContext {
    config: CoordinatorConfig,
    auth: AuthRegistry,
    limiter: RateLimiter,
    guard: PrivacyGuard,
    store: ModelStore,
    metrics: MetricsLedger,
    reputation: ReputationLedger,
    incentives: IncentiveLedger,
    rounds: RoundManager,
    async_ctrl: AsyncRoundController,
    /// The latest published model, kept resident: it is the advertised
    /// version for new assignments, the shape authority for format checks,
    /// and the aggregation base.
    current_model: StoredModel,
}

impl CoordinatorContext {
    /// Opens the model store (synthesizing `v1` on first run) and starts
    /// round 1 against the latest version.
    pub fn new(config: CoordinatorConfig) -> Result<Self, CoordError> {
        let mut store = ModelStore::open(config.storage.models_dir())
            .map_err(|e| CoordError::Internal(format!("cannot open model store: {e}")))?;
        let current_model = store.ensure_initial(&config.initial_model_shape)?;

        let rounds = RoundManager::new(current_model.version);
        let mut metrics = MetricsLedger::new();
        metrics.round_started(1, current_model.version);

        let mut async_ctrl = AsyncRoundController::new(config.async_rounds.clone());
        async_ctrl.round_opened(1, rounds.current_round().opened_at);

        info!(
            version = %current_model.version,
            async_rounds = config.async_rounds.enabled,
            "coordinator context ready"
        );

        Ok(Self {
            limiter: RateLimiter::new(config.rate_limits),
            guard: PrivacyGuard::new(config.privacy),
            incentives: IncentiveLedger::new(config.incentives.clone()),
            config,
            auth: AuthRegistry::new(),
            store,
            metrics,
            reputation: ReputationLedger::new(),
            rounds,
            async_ctrl,
            current_model,
        })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Registration and task assignment
    // ------------------------------------------------------------------

    /// Registers a new client and issues its token.
    pub fn register_client(&mut self, client_name: &str) -> Result<Registration, CoordError> {
        let token = self.auth.issue(client_name)?;
        self.rounds.register(client_name)?;
        self.reputation.client_registered(client_name);
        self.metrics.client_registered();

        info!(client = client_name, "client registered");
        Ok(Registration {
            client_id: client_name.to_string(),
            token,
        })
    }

    /// Assigns the client a training task for the current round.
    ///
    /// Idempotent until the client submits: repeated calls return the same
    /// `(round_id, model_version)` pair without re-crediting ledgers.
    pub fn assign_task(
        &mut self,
        client_id: &str,
        token: &str,
    ) -> Result<TaskAssignment, CoordError> {
        if !self.auth.is_registered(client_id) {
            return Err(CoordError::UnknownClient);
        }
        if !self.auth.verify(client_id, token) {
            return Err(CoordError::Unauthorized);
        }
        self.auth.touch(client_id);

        if !self.limiter.check(client_id, LimitKind::Request, Instant::now()) {
            return Err(CoordError::RateLimited);
        }

        let assignment = self.rounds.assign(client_id)?;
        if assignment.newly_assigned {
            self.metrics.client_assigned(assignment.round_id);
            self.reputation.round_joined(client_id);
            debug!(
                client = client_id,
                round = assignment.round_id,
                version = %assignment.input_version,
                "client assigned"
            );
        }

        Ok(TaskAssignment {
            round_id: assignment.round_id,
            model_version: assignment.input_version,
        })
    }

    // ------------------------------------------------------------------
    // Update intake pipeline
    // ------------------------------------------------------------------

    /// Runs a submission through the intake pipeline, short-circuiting on
    /// the first failing stage: authn, registration, assignment,
    /// rate-limit, duplicate, format, values.
    ///
    /// Failures before authentication leave every ledger untouched; later
    /// failures are visible as a rejection in the metrics and reputation
    /// ledgers.
    pub fn submit_update(
        &mut self,
        client_id: &str,
        token: &str,
        round_id: u64,
        wire_delta: &serde_json::Value,
        final_loss: Option<f64>,
    ) -> Result<(), CoordError> {
        // Stages 1-2: token, then registration. No ledger effects: an
        // unauthenticated caller must not be able to move another client's
        // counters.
        if !self.auth.is_registered(client_id) {
            return Err(CoordError::UnknownClient);
        }
        if !self.auth.verify(client_id, token) {
            return Err(CoordError::Unauthorized);
        }
        self.auth.touch(client_id);
        if !self.rounds.is_registered(client_id) {
            return Err(CoordError::UnknownClient);
        }

        match self.validate_and_record(client_id, round_id, wire_delta, final_loss) {
            Ok(latency) => {
                self.metrics.update_accepted(round_id);
                self.reputation.update_accepted(client_id, latency);
                let granted = self
                    .incentives
                    .update_accepted(client_id, round_id, latency);
                debug!(
                    client = client_id,
                    round = round_id,
                    latency_ms = latency.as_millis() as u64,
                    tokens = granted,
                    "update accepted"
                );
                Ok(())
            }
            Err(err) => {
                // Rejections are attributed to a round; a reference to a
                // round that never existed moves no counters.
                if err != CoordError::UnknownRound {
                    self.metrics.update_rejected(round_id, err.code());
                    self.reputation.update_rejected(client_id);
                }
                debug!(client = client_id, round = round_id, code = err.code(), "update rejected");
                Err(err)
            }
        }
    }

    /// Stages 3-7 of the pipeline plus the buffering of an accepted update.
    fn validate_and_record(
        &mut self,
        client_id: &str,
        round_id: u64,
        wire_delta: &serde_json::Value,
        final_loss: Option<f64>,
    ) -> Result<Duration, CoordError> {
        // Stage 3: assignment and round state.
        let round = self.rounds.round(round_id).ok_or(CoordError::UnknownRound)?;
        if !round.assigned().contains(client_id) {
            return Err(CoordError::NoAssignment);
        }
        if !matches!(round.state, RoundState::Collecting) {
            return Err(CoordError::RoundNotCollecting);
        }

        // Stage 4: rate limit (kind = update).
        if !self.limiter.check(client_id, LimitKind::Update, Instant::now()) {
            return Err(CoordError::RateLimited);
        }

        // Stage 5: duplicate.
        if round.received().contains_key(client_id) {
            return Err(CoordError::DuplicateUpdate);
        }

        // Stage 6: format. The round's input version is the shape
        // authority, and for the collecting round that is always the
        // resident model.
        let delta = WeightDelta::from_wire(wire_delta).map_err(CoordError::MalformedDelta)?;
        let expected = self.current_model.shape();
        if delta.shape() != expected {
            return Err(CoordError::MalformedDelta(format!(
                "delta shape {:?} does not match model shape {:?}",
                delta.shape(),
                expected
            )));
        }

        // Stage 7: values.
        self.guard
            .inspect(&delta)
            .map_err(|v| CoordError::InvalidValues(v.to_string()))?;

        self.rounds
            .record_update(client_id, round_id, delta, final_loss)
    }

    // ------------------------------------------------------------------
    // Aggregation
    // ------------------------------------------------------------------

    /// Moves the round to AGGREGATING and snapshots everything the worker
    /// needs. The returned job runs on a blocking thread; the engine feeds
    /// its result back through [`finish_aggregation`].
    pub fn begin_aggregation(&mut self, round_id: u64) -> Result<AggregationJob, CoordError> {
        let (input_version, deltas) = self.rounds.begin_aggregation(round_id)?;

        let base = if input_version == self.current_model.version {
            self.current_model.weights.clone()
        } else {
            // A failed round's successor reuses an older input version.
            self.store.get(input_version)?.weights
        };

        info!(round = round_id, updates = deltas.len(), base = %input_version, "aggregation started");
        Ok(AggregationJob {
            round_id,
            input_version,
            base,
            deltas,
        })
    }

    /// Publishes a finished aggregation: closes the round, settles the
    /// ledgers (completions, stragglers, dropout penalties), and opens the
    /// successor round.
    pub fn finish_aggregation(
        &mut self,
        round_id: u64,
        result: Result<StoredModel, AggregateError>,
        elapsed: Duration,
    ) -> Result<AggregationOutcome, CoordError> {
        let (reason, published, failure) = match result {
            Ok(model) => {
                self.store.commit_written(model.version);
                let version = model.version;
                let num_updates = model.num_updates;
                self.current_model = model;
                (
                    CloseReason::Aggregated {
                        new_version: version,
                    },
                    Some((version, num_updates)),
                    None,
                )
            }
            Err(err) => (CloseReason::AggregationFailed, None, Some(err.to_string())),
        };

        let closed = self.rounds.complete_aggregation(round_id, reason)?;
        let num_updates = closed.contributors.len();

        // Ledger settlement. Contributors complete the round only when a
        // model was actually published; stragglers dropped out either way.
        if published.is_some() {
            for (client, _) in &closed.contributors {
                self.reputation.round_completed(client);
            }
        }
        for client in &closed.stragglers {
            self.reputation.round_dropped(client);
            self.incentives.dropout(client);
        }

        let snapshot = self
            .metrics
            .round_closed(round_id, Some(elapsed), &closed.stragglers);
        self.async_ctrl
            .round_closed(round_id, closed.stragglers.clone());

        // Successor round bookkeeping.
        self.metrics
            .round_started(closed.successor_id, closed.successor_version);
        self.async_ctrl
            .round_opened(closed.successor_id, self.rounds.current_round().opened_at);

        // Buffered payloads are not needed once the snapshot is taken.
        self.rounds.discard_updates(round_id);

        match &failure {
            None => info!(
                round = round_id,
                version = %self.current_model.version,
                updates = num_updates,
                successor = closed.successor_id,
                "round aggregated"
            ),
            Some(reason) => warn!(
                round = round_id,
                successor = closed.successor_id,
                reason,
                "round closed without a new model"
            ),
        }

        Ok(AggregationOutcome {
            round_id,
            new_version: published.map(|(v, _)| v),
            num_updates,
            failure,
            snapshot,
        })
    }

    /// The round the async controller wants aggregated now, if any.
    ///
    /// Only the current round can be collecting, so only it is checked.
    pub fn due_round(&self, now: Instant) -> Option<u64> {
        let round = self.rounds.current_round();
        if !matches!(round.state, RoundState::Collecting) {
            return None;
        }
        self.async_ctrl
            .is_ready(round.id, round.received().len(), now)
            .then_some(round.id)
    }

    /// Periodic housekeeping (rate-limiter window pruning).
    pub fn tick(&mut self, now: Instant) {
        self.limiter.prune(now);
    }

    // ------------------------------------------------------------------
    // Read-side queries
    // ------------------------------------------------------------------

    pub fn round_status(&self, round_id: u64) -> Result<RoundStatusView, CoordError> {
        self.rounds.status(round_id).ok_or(CoordError::UnknownRound)
    }

    pub fn model(&self, version: ModelVersion) -> Result<StoredModel, CoordError> {
        if version == self.current_model.version {
            return Ok(self.current_model.clone());
        }
        self.store.get(version)
    }

    pub fn latest_model_version(&self) -> ModelVersion {
        self.current_model.version
    }

    pub fn metrics_for_round(&self, round_id: u64) -> Result<RoundSnapshot, CoordError> {
        self.metrics
            .get(round_id)
            .cloned()
            .ok_or(CoordError::UnknownRound)
    }

    pub fn metrics_export(&self) -> MetricsExport {
        self.metrics.export()
    }

    pub fn reputation_of(&self, client_id: &str) -> Result<ReputationSnapshot, CoordError> {
        self.reputation
            .snapshot(client_id)
            .ok_or(CoordError::UnknownClient)
    }

    pub fn reputation_all(&self) -> Vec<ReputationSnapshot> {
        self.reputation.all()
    }

    pub fn incentives_of(&self, client_id: &str) -> Result<IncentiveSnapshot, CoordError> {
        if !self.auth.is_registered(client_id) {
            return Err(CoordError::UnknownClient);
        }
        // A registered client that never earned or lost tokens has an
        // all-zero record.
        Ok(self.incentives.snapshot(client_id).unwrap_or(
            crate::incentives::IncentiveSnapshot {
                client_id: client_id.to_string(),
                token_balance: 0.0,
                consecutive_accepted_rounds: 0,
                last_reward_round: None,
                speed_bonuses: 0,
                consistency_bonuses: 0,
                total_rewards: 0,
            },
        ))
    }

    pub fn incentives_all(&self) -> Vec<IncentiveSnapshot> {
        self.incentives.all()
    }

    pub fn async_stats(&self, round_id: u64) -> Result<AsyncRoundStats, CoordError> {
        let round = self.rounds.round(round_id).ok_or(CoordError::UnknownRound)?;
        Ok(self.async_ctrl.stats(
            round_id,
            round.assigned().len(),
            round.received().len(),
            Instant::now(),
        ))
    }

    pub fn status_summary(&self) -> CoordinatorStatus {
        let round = self.rounds.current_round();
        CoordinatorStatus {
            current_round: round.id,
            current_round_state: round.state.to_string(),
            model_version: self.current_model.version,
            registered_clients: self.rounds.registered_count(),
            rounds_closed: self.metrics.global().rounds_closed,
            async_rounds_enabled: self.async_ctrl.enabled(),
        }
    }
}
