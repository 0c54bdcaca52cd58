//! Federated averaging of weight deltas.
//!
//! `new = base + mean(deltas)`, element-wise, accumulated in f64. Deltas
//! are summed in ascending client-id order, so identical inputs produce
//! identical aggregates up to floating-point accumulation order. A shape
//! mismatch anywhere in the batch fails the whole round.

use std::path::Path;

use thiserror::Error;

use fedcoord_common::types::{shape_of, LayerWeights};
use fedcoord_common::{unix_time_ms, ModelVersion, WeightDelta};

use crate::model_store::{write_model_file, StoredModel};

/// Aggregation failure causes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregateError {
    #[error("delta from {client} has shape {got:?}, model expects {expected:?}")]
    ShapeMismatch {
        client: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("no deltas to aggregate")]
    Empty,

    #[error("model write failed: {0}")]
    Persist(String),

    #[error("aggregation did not finish within {0:?}")]
    Timeout(std::time::Duration),
}

/// Everything the aggregation worker needs, snapshotted from the engine
/// state so the computation runs outside the serialized region.
#[derive(Debug, Clone)]
pub struct AggregationJob {
    pub round_id: u64,
    pub input_version: ModelVersion,
    /// Weights of the round's input version.
    pub base: LayerWeights,
    /// Deltas in ascending client-id order.
    pub deltas: Vec<(String, WeightDelta)>,
}

impl AggregationJob {
    /// The version this job will publish on success.
    pub fn output_version(&self) -> ModelVersion {
        self.input_version.next()
    }
}

/// Runs one snapshotted aggregation job to completion: computes the
/// average and writes the new model file.
///
/// This is the aggregation worker's entry point. It holds no coordinator
/// state, so it runs on a blocking thread while the engine keeps serving
/// requests; the engine indexes the written version afterwards.
pub fn execute_job(job: &AggregationJob, models_dir: &Path) -> Result<StoredModel, AggregateError> {
    let weights = federated_average(&job.base, &job.deltas)?;

    let model = StoredModel {
        version: job.output_version(),
        weights,
        base_version: Some(job.input_version),
        round_id: Some(job.round_id),
        num_updates: job.deltas.len() as u32,
        created_at_ms: unix_time_ms(),
    };

    write_model_file(models_dir, &model).map_err(|e| AggregateError::Persist(e.to_string()))?;
    Ok(model)
}

/// Averages the deltas and adds them onto the base, element-wise.
pub fn federated_average(
    base: &LayerWeights,
    deltas: &[(String, WeightDelta)],
) -> Result<LayerWeights, AggregateError> {
    if deltas.is_empty() {
        return Err(AggregateError::Empty);
    }

    let expected = shape_of(base);
    for (client, delta) in deltas {
        let got = delta.shape();
        if got != expected {
            return Err(AggregateError::ShapeMismatch {
                client: client.clone(),
                expected,
                got,
            });
        }
    }

    let mut sums: LayerWeights = expected.iter().map(|&n| vec![0.0f64; n]).collect();
    for (_, delta) in deltas {
        for (sum_layer, delta_layer) in sums.iter_mut().zip(delta.layers()) {
            for (sum, value) in sum_layer.iter_mut().zip(delta_layer) {
                *sum += value;
            }
        }
    }

    let count = deltas.len() as f64;
    let new = base
        .iter()
        .zip(&sums)
        .map(|(base_layer, sum_layer)| {
            base_layer
                .iter()
                .zip(sum_layer)
                .map(|(b, s)| b + s / count)
                .collect()
        })
        .collect();

    Ok(new)
}
