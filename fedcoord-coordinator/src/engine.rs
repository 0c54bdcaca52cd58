//! The engine task: single owner of all coordinator state.
//!
//! Every API operation is a message processed to completion before the
//! next one starts, which realizes the single-writer discipline. The two
//! pieces of work that leave the serialized region are the aggregation
//! compute (snapshotted out, run on a blocking thread, published back via
//! `AggregationFinished`) and the best-effort metrics persistence after a
//! round closes. When async rounds are enabled the run loop also ticks a
//! timer to fire quorum/deadline aggregations.

use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use fedcoord_common::{CoordError, ModelVersion};
use fedcoord_core::aggregate::{self, AggregateError};
use fedcoord_core::context::{AggregationOutcome, CoordinatorContext};
use fedcoord_core::metrics;

use crate::api::{
    AggregateResponse, ApiRequest, ApiResponse, IncentiveListResponse, RegisterResponse,
    ReputationListResponse, TaskResponse,
};
use crate::tasks::{EngineMessage, Task, TaskHandle, TaskMessage};

/// Housekeeping cadence: async-round deadlines and limiter pruning.
const TICK_INTERVAL: Duration = Duration::from_millis(500);

/// The coordinator engine actor.
pub struct EngineTask {
    ctx: CoordinatorContext,
    /// Handle to this task's own queue, cloned into aggregation workers so
    /// they can deliver their results.
    self_handle: TaskHandle<EngineMessage>,
}

impl EngineTask {
    pub fn new(ctx: CoordinatorContext, self_handle: TaskHandle<EngineMessage>) -> Self {
        Self { ctx, self_handle }
    }

    /// Read access for tests and status reporting.
    pub fn context(&self) -> &CoordinatorContext {
        &self.ctx
    }

    fn handle_api(&mut self, request: ApiRequest, respond_to: oneshot::Sender<ApiResponse>) {
        debug!(op = request.op(), client = request.client_id(), "api request");

        let response = match request {
            ApiRequest::RegisterClient { client_name } => {
                match self.ctx.register_client(&client_name) {
                    Ok(reg) => ApiResponse::Registered(RegisterResponse {
                        client_id: reg.client_id,
                        token: reg.token,
                    }),
                    Err(e) => e.into(),
                }
            }
            ApiRequest::GetTask { client_id, token } => {
                match self.ctx.assign_task(&client_id, &token) {
                    Ok(task) => ApiResponse::Task(TaskResponse {
                        round_id: task.round_id,
                        model_version: task.model_version,
                        task: "train".to_string(),
                    }),
                    Err(e) => e.into(),
                }
            }
            ApiRequest::SubmitUpdate {
                client_id,
                token,
                round_id,
                weight_delta,
                final_loss,
                ..
            } => match self
                .ctx
                .submit_update(&client_id, &token, round_id, &weight_delta, final_loss)
            {
                Ok(()) => ApiResponse::ok(),
                Err(e) => e.into(),
            },
            ApiRequest::AggregateRound { round_id } => {
                // Responds later, once the worker reports back.
                self.start_aggregation(round_id, Some(respond_to));
                return;
            }
            ApiRequest::GetRoundStatus { round_id } => match self.ctx.round_status(round_id) {
                Ok(status) => ApiResponse::RoundStatus(status),
                Err(e) => e.into(),
            },
            ApiRequest::GetModel { version } => match ModelVersion::parse(&version) {
                Some(version) => match self.ctx.model(version) {
                    Ok(model) => ApiResponse::Model(model),
                    Err(e) => e.into(),
                },
                None => CoordError::UnknownVersion.into(),
            },
            ApiRequest::GetMetrics { round_id } => match round_id {
                Some(round_id) => match self.ctx.metrics_for_round(round_id) {
                    Ok(snapshot) => ApiResponse::RoundMetrics(Box::new(snapshot)),
                    Err(e) => e.into(),
                },
                None => ApiResponse::Metrics(self.ctx.metrics_export()),
            },
            ApiRequest::GetReputation { client_id } => match client_id {
                Some(client_id) => match self.ctx.reputation_of(&client_id) {
                    Ok(snapshot) => ApiResponse::Reputation(Box::new(snapshot)),
                    Err(e) => e.into(),
                },
                None => ApiResponse::ReputationList(ReputationListResponse {
                    clients: self.ctx.reputation_all(),
                }),
            },
            ApiRequest::GetIncentives { client_id } => match client_id {
                Some(client_id) => match self.ctx.incentives_of(&client_id) {
                    Ok(snapshot) => ApiResponse::Incentives(Box::new(snapshot)),
                    Err(e) => e.into(),
                },
                None => ApiResponse::IncentiveList(IncentiveListResponse {
                    clients: self.ctx.incentives_all(),
                }),
            },
            ApiRequest::GetAsyncStats { round_id } => match self.ctx.async_stats(round_id) {
                Ok(stats) => ApiResponse::AsyncStats(stats),
                Err(e) => e.into(),
            },
            ApiRequest::GetStatus => ApiResponse::Status(self.ctx.status_summary()),
        };

        // A caller that timed out just loses the response; the state
        // change above is already complete.
        let _ = respond_to.send(response);
    }

    /// Snapshots the round and dispatches the compute to a blocking
    /// thread. The engine keeps serving requests meanwhile.
    fn start_aggregation(
        &mut self,
        round_id: u64,
        respond_to: Option<oneshot::Sender<ApiResponse>>,
    ) {
        let job = match self.ctx.begin_aggregation(round_id) {
            Ok(job) => job,
            Err(e) => {
                if let Some(tx) = respond_to {
                    let _ = tx.send(e.into());
                } else {
                    debug!(round = round_id, code = e.code(), "async trigger skipped");
                }
                return;
            }
        };

        let models_dir = self.ctx.config().storage.models_dir();
        let soft_timeout = self.ctx.config().aggregation_timeout;
        let handle = self.self_handle.clone();
        let started = Instant::now();

        tokio::spawn(async move {
            let worker =
                tokio::task::spawn_blocking(move || aggregate::execute_job(&job, &models_dir));
            // The soft timeout abandons the worker; its stray output file,
            // if any, is never indexed and gets overwritten atomically by
            // the next successful aggregation.
            let result = match tokio::time::timeout(soft_timeout, worker).await {
                Ok(joined) => joined.unwrap_or_else(|e| {
                    Err(AggregateError::Persist(format!(
                        "aggregation worker panicked: {e}"
                    )))
                }),
                Err(_) => Err(AggregateError::Timeout(soft_timeout)),
            };
            if handle
                .send(EngineMessage::AggregationFinished {
                    round_id,
                    result,
                    started,
                    respond_to,
                })
                .await
                .is_err()
            {
                warn!(round = round_id, "engine gone before aggregation result landed");
            }
        });
    }

    fn handle_finished(
        &mut self,
        round_id: u64,
        result: Result<fedcoord_core::model_store::StoredModel, AggregateError>,
        started: Instant,
        respond_to: Option<oneshot::Sender<ApiResponse>>,
    ) {
        let outcome = match self.ctx.finish_aggregation(round_id, result, started.elapsed()) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(round = round_id, error = %e, "could not finalize aggregation");
                if let Some(tx) = respond_to {
                    let _ = tx.send(e.into());
                }
                return;
            }
        };

        self.persist_snapshot(&outcome);

        let response = match (&outcome.failure, outcome.new_version) {
            (None, Some(version)) => ApiResponse::Aggregated(AggregateResponse {
                round_id,
                new_model_version: version,
                num_updates: outcome.num_updates,
                status: "aggregated".to_string(),
            }),
            (Some(reason), _) => {
                ApiResponse::from(CoordError::AggregationFailed(reason.clone()))
            }
            (None, None) => ApiResponse::from(CoordError::Internal(
                "aggregation finished without version or failure".into(),
            )),
        };

        if let Some(tx) = respond_to {
            let _ = tx.send(response);
        }
    }

    /// Hands the closed round's snapshot to the blocking pool; metrics
    /// persistence must not hold up the engine.
    fn persist_snapshot(&self, outcome: &AggregationOutcome) {
        let Some(snapshot) = outcome.snapshot.clone() else {
            return;
        };
        let metrics_dir = self.ctx.config().storage.metrics_dir();
        let logs_dir = self.ctx.config().storage.logs_dir();
        tokio::task::spawn_blocking(move || {
            metrics::persist_round_snapshot(&metrics_dir, &logs_dir, &snapshot);
        });
    }

    fn tick(&mut self) {
        let now = Instant::now();
        self.ctx.tick(now);
        if let Some(round_id) = self.ctx.due_round(now) {
            info!(round = round_id, "async round controller firing aggregation");
            self.start_aggregation(round_id, None);
        }
    }
}

#[async_trait::async_trait]
impl Task for EngineTask {
    type Message = EngineMessage;

    async fn run(&mut self, mut rx: mpsc::Receiver<TaskMessage<Self::Message>>) {
        info!("engine task started");
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(TaskMessage::Message(EngineMessage::Api { request, respond_to })) => {
                            self.handle_api(request, respond_to);
                        }
                        Some(TaskMessage::Message(EngineMessage::AggregationFinished {
                            round_id,
                            result,
                            started,
                            respond_to,
                        })) => {
                            self.handle_finished(round_id, result, started, respond_to);
                        }
                        Some(TaskMessage::Shutdown) => {
                            info!("engine task received shutdown signal");
                            break;
                        }
                        None => {
                            info!("engine task channel closed");
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.tick();
                }
            }
        }

        info!("engine task stopped");
    }
}
