//! fedcoord orchestration engine.
//!
//! This crate implements the coordinator's round-based training machinery:
//! client authentication, the round lifecycle state machine, the
//! update-intake pipeline, federated averaging, the versioned model store,
//! and the metrics/reputation/incentive ledgers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ CoordinatorContext (single-writer state)                         │
//! │  ┌───────────┐ ┌────────────┐ ┌─────────────┐ ┌───────────────┐  │
//! │  │ Auth      │ │ Rate       │ │ Privacy     │ │ Model Store   │  │
//! │  │ Registry  │ │ Limiter    │ │ Guard       │ │ (versioned)   │  │
//! │  └───────────┘ └────────────┘ └─────────────┘ └───────────────┘  │
//! │  ┌───────────┐ ┌────────────┐ ┌─────────────┐ ┌───────────────┐  │
//! │  │ Round     │ │ Metrics    │ │ Reputation  │ │ Incentive     │  │
//! │  │ Manager   │ │ Ledger     │ │ Ledger      │ │ Ledger        │  │
//! │  └───────────┘ └────────────┘ └─────────────┘ └───────────────┘  │
//! │  ┌──────────────────────────┐                                    │
//! │  │ Async Round Controller   │  quorum / deadline round readiness │
//! │  └──────────────────────────┘                                    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All mutation goes through [`context::CoordinatorContext`]; the
//! coordinator binary wraps it in a single actor task. Aggregation itself
//! (the CPU-bound average plus the model file write) is a pure job
//! ([`aggregate`]) executed outside the serialized region.

pub mod aggregate;
pub mod async_rounds;
pub mod auth;
pub mod context;
pub mod incentives;
pub mod metrics;
pub mod model_store;
pub mod privacy;
pub mod rate_limit;
pub mod reputation;
pub mod rounds;

pub use aggregate::{federated_average, AggregationJob};
pub use context::CoordinatorContext;
pub use model_store::{ModelStore, StoredModel};
pub use rounds::{RoundManager, RoundState};
