//! Coordinator configuration.
//!
//! Configuration is sourced from environment variables (the deployment
//! contract) with defaults suitable for local runs. `from_env` + `validate`
//! should be called once at startup; an invalid value fails startup rather
//! than being silently replaced.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoordError;

/// Asynchronous round completion settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsyncRoundConfig {
    /// Whether time/quorum-driven round completion is active. When false,
    /// aggregation only happens on an explicit `aggregate_round` request.
    pub enabled: bool,
    /// Quorum: the round becomes ready once this many updates arrived.
    pub min_updates: usize,
    /// Deadline: the round becomes ready once this much time elapsed since
    /// it was opened, regardless of quorum (as long as at least one update
    /// arrived).
    pub max_duration: Duration,
}

impl Default for AsyncRoundConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_updates: 2,
            max_duration: Duration::from_secs(300),
        }
    }
}

/// Token reward settings for the incentive ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncentiveConfig {
    /// Tokens granted per accepted update.
    pub base_reward: f64,
    /// Submission latency below which the speed bonus applies.
    pub speed_threshold: Duration,
    /// Extra tokens for a fast submission.
    pub speed_bonus: f64,
    /// Consecutive accepted rounds required for the consistency bonus.
    pub consistency_threshold: u32,
    /// Extra tokens once the consistency streak is reached.
    pub consistency_bonus: f64,
    /// Tokens deducted when an assigned client misses a round.
    pub dropout_penalty: f64,
}

impl Default for IncentiveConfig {
    fn default() -> Self {
        Self {
            base_reward: 10.0,
            speed_threshold: Duration::from_secs(30),
            speed_bonus: 5.0,
            consistency_threshold: 5,
            consistency_bonus: 3.0,
            dropout_penalty: 2.0,
        }
    }
}

/// One sliding-window limit: at most `limit` events per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowLimit {
    pub limit: u32,
    pub window: Duration,
}

impl WindowLimit {
    pub const fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }

    /// Parses a `LIMIT/WINDOW` expression such as `60/min`, `1/min`,
    /// `120/60s`, or `1000/hour`. A bare integer means "per minute".
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let (limit, window) = match s.split_once('/') {
            Some((l, w)) => (l.trim().parse::<u32>().ok()?, parse_window(w.trim())?),
            None => (s.parse::<u32>().ok()?, Duration::from_secs(60)),
        };
        if limit == 0 {
            return None;
        }
        Some(Self { limit, window })
    }
}

fn parse_window(s: &str) -> Option<Duration> {
    match s {
        "s" | "sec" | "second" => Some(Duration::from_secs(1)),
        "min" | "minute" => Some(Duration::from_secs(60)),
        "hour" | "hr" => Some(Duration::from_secs(3600)),
        other => {
            let digits = other
                .strip_suffix('s')
                .filter(|d| !d.is_empty() && d.bytes().all(|b| b.is_ascii_digit()))?;
            let secs: u64 = digits.parse().ok()?;
            if secs == 0 {
                None
            } else {
                Some(Duration::from_secs(secs))
            }
        }
    }
}

/// Per-client rate limit windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Window for all API requests from one client.
    pub requests: WindowLimit,
    /// Window for update submissions from one client.
    pub updates: WindowLimit,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: WindowLimit::new(120, Duration::from_secs(60)),
            updates: WindowLimit::new(30, Duration::from_secs(60)),
        }
    }
}

/// Privacy guard bounds for incoming delta values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrivacyConfig {
    /// Maximum accepted magnitude for any single delta value.
    pub max_value: f64,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self { max_value: 1e6 }
    }
}

/// On-disk layout roots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base data directory; `models/`, `metrics/`, and `logs/` live below it.
    pub data_dir: PathBuf,
}

impl StorageConfig {
    pub fn models_dir(&self) -> PathBuf {
        self.data_dir.join("models")
    }

    pub fn metrics_dir(&self) -> PathBuf {
        self.data_dir.join("metrics")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

/// Top-level coordinator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// UDP port of the command server.
    pub command_port: u16,
    /// Layer shape used when the model store has to synthesize `v1`.
    pub initial_model_shape: Vec<usize>,
    /// Soft ceiling on one aggregation run; past it the round is closed
    /// as failed even if the worker is still grinding.
    pub aggregation_timeout: Duration,
    pub async_rounds: AsyncRoundConfig,
    pub incentives: IncentiveConfig,
    pub rate_limits: RateLimitConfig,
    pub privacy: PrivacyConfig,
    pub storage: StorageConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            command_port: 4710,
            initial_model_shape: vec![8],
            aggregation_timeout: Duration::from_secs(60),
            async_rounds: AsyncRoundConfig::default(),
            incentives: IncentiveConfig::default(),
            rate_limits: RateLimitConfig::default(),
            privacy: PrivacyConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Builds a configuration from the process environment.
    ///
    /// Unset variables keep their defaults; set-but-invalid variables are a
    /// startup error.
    pub fn from_env() -> Result<Self, CoordError> {
        let mut cfg = Self::default();

        if let Some(v) = env_var("ENABLE_ASYNC_ROUNDS") {
            cfg.async_rounds.enabled = parse_bool("ENABLE_ASYNC_ROUNDS", &v)?;
        }
        if let Some(v) = env_var("ASYNC_MIN_UPDATES") {
            cfg.async_rounds.min_updates = parse_number("ASYNC_MIN_UPDATES", &v)?;
        }
        if let Some(v) = env_var("ASYNC_MAX_DURATION") {
            cfg.async_rounds.max_duration = parse_duration_secs("ASYNC_MAX_DURATION", &v)?;
        }

        if let Some(v) = env_var("INCENTIVE_BASE_REWARD") {
            cfg.incentives.base_reward = parse_number("INCENTIVE_BASE_REWARD", &v)?;
        }
        if let Some(v) = env_var("INCENTIVE_SPEED_THRESHOLD") {
            cfg.incentives.speed_threshold = parse_duration_secs("INCENTIVE_SPEED_THRESHOLD", &v)?;
        }
        if let Some(v) = env_var("INCENTIVE_SPEED_BONUS") {
            cfg.incentives.speed_bonus = parse_number("INCENTIVE_SPEED_BONUS", &v)?;
        }
        if let Some(v) = env_var("INCENTIVE_CONSISTENCY_THRESHOLD") {
            cfg.incentives.consistency_threshold =
                parse_number("INCENTIVE_CONSISTENCY_THRESHOLD", &v)?;
        }
        if let Some(v) = env_var("INCENTIVE_CONSISTENCY_BONUS") {
            cfg.incentives.consistency_bonus = parse_number("INCENTIVE_CONSISTENCY_BONUS", &v)?;
        }
        if let Some(v) = env_var("INCENTIVE_DROPOUT_PENALTY") {
            cfg.incentives.dropout_penalty = parse_number("INCENTIVE_DROPOUT_PENALTY", &v)?;
        }

        if let Some(v) = env_var("RATE_LIMIT_REQUESTS") {
            cfg.rate_limits.requests = WindowLimit::parse(&v)
                .ok_or_else(|| bad_value("RATE_LIMIT_REQUESTS", &v))?;
        }
        if let Some(v) = env_var("RATE_LIMIT_UPDATES") {
            cfg.rate_limits.updates =
                WindowLimit::parse(&v).ok_or_else(|| bad_value("RATE_LIMIT_UPDATES", &v))?;
        }

        if let Some(v) = env_var("PRIVACY_MAX_VALUE") {
            cfg.privacy.max_value = parse_number("PRIVACY_MAX_VALUE", &v)?;
        }
        if let Some(v) = env_var("COORDINATOR_PORT") {
            cfg.command_port = parse_number("COORDINATOR_PORT", &v)?;
        }
        if let Some(v) = env_var("FEDCOORD_DATA_DIR") {
            cfg.storage.data_dir = PathBuf::from(v);
        }
        if let Some(v) = env_var("MODEL_INITIAL_SHAPE") {
            cfg.initial_model_shape = parse_shape("MODEL_INITIAL_SHAPE", &v)?;
        }
        if let Some(v) = env_var("AGGREGATION_TIMEOUT") {
            cfg.aggregation_timeout = parse_duration_secs("AGGREGATION_TIMEOUT", &v)?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks cross-field consistency.
    pub fn validate(&self) -> Result<(), CoordError> {
        if self.async_rounds.min_updates == 0 {
            return Err(CoordError::Config(
                "ASYNC_MIN_UPDATES must be at least 1".into(),
            ));
        }
        if self.async_rounds.max_duration.is_zero() {
            return Err(CoordError::Config(
                "ASYNC_MAX_DURATION must be positive".into(),
            ));
        }
        if self.incentives.base_reward < 0.0
            || self.incentives.speed_bonus < 0.0
            || self.incentives.consistency_bonus < 0.0
            || self.incentives.dropout_penalty < 0.0
        {
            return Err(CoordError::Config(
                "incentive amounts must be non-negative".into(),
            ));
        }
        if !(self.privacy.max_value.is_finite() && self.privacy.max_value > 0.0) {
            return Err(CoordError::Config(
                "PRIVACY_MAX_VALUE must be a positive finite number".into(),
            ));
        }
        if self.initial_model_shape.is_empty() || self.initial_model_shape.contains(&0) {
            return Err(CoordError::Config(
                "MODEL_INITIAL_SHAPE must name at least one non-empty layer".into(),
            ));
        }
        if self.aggregation_timeout.is_zero() {
            return Err(CoordError::Config(
                "AGGREGATION_TIMEOUT must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn bad_value(name: &str, value: &str) -> CoordError {
    CoordError::Config(format!("invalid value for {name}: {value:?}"))
}

fn parse_bool(name: &str, value: &str) -> Result<bool, CoordError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(bad_value(name, value)),
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, CoordError> {
    value.trim().parse().map_err(|_| bad_value(name, value))
}

fn parse_duration_secs(name: &str, value: &str) -> Result<Duration, CoordError> {
    let secs: f64 = parse_number(name, value)?;
    if !(secs.is_finite() && secs > 0.0) {
        return Err(bad_value(name, value));
    }
    Ok(Duration::from_secs_f64(secs))
}

fn parse_shape(name: &str, value: &str) -> Result<Vec<usize>, CoordError> {
    value
        .split(',')
        .map(|p| p.trim().parse::<usize>().map_err(|_| bad_value(name, value)))
        .collect()
}
