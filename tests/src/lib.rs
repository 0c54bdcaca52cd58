//! Integration tests for the fedcoord coordinator.
//!
//! These tests drive whole subsystems together rather than single modules:
//! the coordinator context with all of its ledgers, and the engine task
//! behind the API facade.
//!
//! # Test categories
//!
//! 1. **Round scenarios** - registration through aggregation, including
//!    stragglers, duplicates, and rate limiting
//! 2. **Invariant checks** - the cross-ledger properties that must hold
//!    after every accepted request
//! 3. **Facade tests** - operations and error codes through the engine task

pub mod test_utils;

#[cfg(test)]
mod facade;
#[cfg(test)]
mod invariants;
#[cfg(test)]
mod scenarios;
