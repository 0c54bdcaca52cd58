//! Shared helpers for the integration tests.

use std::sync::Once;
use std::time::Duration;

use tempfile::TempDir;

use fedcoord_common::{CoordinatorConfig, ModelVersion};
use fedcoord_core::aggregate;
use fedcoord_core::context::{AggregationOutcome, CoordinatorContext};
use fedcoord_core::model_store::{ModelStore, StoredModel};

/// Default initial model shape used by the tests: one layer of three
/// parameters.
pub const TEST_SHAPE: [usize; 1] = [3];

static INIT_LOGGING: Once = Once::new();

/// Installs a quiet tracing subscriber once per test binary.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("warn")
            .with_test_writer()
            .try_init();
    });
}

/// A coordinator configuration rooted in a temp dir.
pub fn test_config(dir: &TempDir) -> CoordinatorConfig {
    let mut config = CoordinatorConfig::default();
    config.storage.data_dir = dir.path().to_path_buf();
    config.initial_model_shape = TEST_SHAPE.to_vec();
    config
}

/// Builds a context over `dir`, applying `configure` first.
pub fn test_context(
    dir: &TempDir,
    configure: impl FnOnce(&mut CoordinatorConfig),
) -> CoordinatorContext {
    init_test_logging();
    let mut config = test_config(dir);
    configure(&mut config);
    CoordinatorContext::new(config).expect("context init")
}

/// Seeds `v1` with explicit weights before the context first opens the
/// store, so tests can assert exact aggregation arithmetic.
pub fn seed_initial_model(dir: &TempDir, weights: Vec<Vec<f64>>) {
    let mut store = ModelStore::open(dir.path().join("models")).expect("open store");
    store
        .put(&StoredModel {
            version: ModelVersion::INITIAL,
            weights,
            base_version: None,
            round_id: None,
            num_updates: 0,
            created_at_ms: 0,
        })
        .expect("seed v1");
}

/// Registers a client and returns its token.
pub fn register(ctx: &mut CoordinatorContext, name: &str) -> String {
    ctx.register_client(name).expect("register").token
}

/// A uniform all-`value` delta matching [`TEST_SHAPE`].
pub fn uniform_delta(value: f64) -> serde_json::Value {
    serde_json::json!([[value, value, value]])
}

/// Runs a round's aggregation synchronously through the same two-phase
/// handoff the engine task uses.
pub fn aggregate_round(ctx: &mut CoordinatorContext, round_id: u64) -> AggregationOutcome {
    let job = ctx.begin_aggregation(round_id).expect("begin aggregation");
    let models_dir = ctx.config().storage.models_dir();
    let result = aggregate::execute_job(&job, &models_dir);
    ctx.finish_aggregation(round_id, result, Duration::from_millis(1))
        .expect("finish aggregation")
}
