//! The coordinator error taxonomy.
//!
//! Every rejection the coordinator can hand back to a caller is one of these
//! variants. The [`CoordError::code`] string is the stable identifier that
//! crosses the wire; the `Display` text is a human-readable elaboration and
//! never contains token material.

use thiserror::Error;

/// Errors surfaced at the coordinator API boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordError {
    /// Token missing or does not match the claimed client.
    #[error("token missing or does not match client")]
    Unauthorized,

    /// The client id is not present in the auth registry.
    #[error("client is not registered")]
    UnknownClient,

    /// A client with this id is already registered.
    #[error("client id is already registered")]
    DuplicateClient,

    /// The client holds no assignment for the referenced round.
    #[error("client has no assignment for this round")]
    NoAssignment,

    /// No open round can currently accept this client.
    #[error("no task available for this client right now")]
    NoTaskAvailable,

    /// The round exists but is not accepting updates.
    #[error("round is not collecting updates")]
    RoundNotCollecting,

    /// A rate-limit window for this client is exhausted.
    #[error("rate limit exceeded")]
    RateLimited,

    /// The client already submitted an update for this round.
    #[error("update for this round was already submitted")]
    DuplicateUpdate,

    /// The delta payload does not parse or its shape does not match the
    /// advertised model.
    #[error("malformed weight delta: {0}")]
    MalformedDelta(String),

    /// The delta contains non-finite or out-of-range values.
    #[error("invalid delta values: {0}")]
    InvalidValues(String),

    /// The referenced round does not exist.
    #[error("round does not exist")]
    UnknownRound,

    /// The referenced model version does not exist.
    #[error("model version does not exist")]
    UnknownVersion,

    /// Aggregation was requested before any update was received.
    #[error("round has no updates to aggregate")]
    NotReady,

    /// Aggregation was attempted and failed (for example, shape mismatch
    /// across deltas).
    #[error("aggregation failed: {0}")]
    AggregationFailed(String),

    /// Configuration was invalid at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// An internal storage or bookkeeping failure. The detail string is
    /// logged with a correlation id but is safe to return verbatim.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoordError {
    /// The stable identifier presented to clients.
    pub fn code(&self) -> &'static str {
        match self {
            CoordError::Unauthorized => "unauthorized",
            CoordError::UnknownClient => "unknown_client",
            CoordError::DuplicateClient => "duplicate_client",
            CoordError::NoAssignment => "no_assignment",
            CoordError::NoTaskAvailable => "no_task_available",
            CoordError::RoundNotCollecting => "round_not_collecting",
            CoordError::RateLimited => "rate_limited",
            CoordError::DuplicateUpdate => "duplicate_update",
            CoordError::MalformedDelta(_) => "malformed_delta",
            CoordError::InvalidValues(_) => "invalid_values",
            CoordError::UnknownRound => "unknown_round",
            CoordError::UnknownVersion => "unknown_version",
            CoordError::NotReady => "not_ready",
            CoordError::AggregationFailed(_) => "aggregation_failed",
            CoordError::Config(_) => "internal_error",
            CoordError::Internal(_) => "internal_error",
        }
    }
}
