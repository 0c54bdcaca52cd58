//! Cross-ledger invariants checked after a mixed workload.

use std::time::Duration;

use tempfile::TempDir;

use fedcoord_common::ModelVersion;
use fedcoord_core::context::CoordinatorContext;
use fedcoord_core::rounds::RoundState;

use crate::test_utils::*;

/// Asserts every system-wide invariant that must hold between requests.
fn check_invariants(ctx: &CoordinatorContext, rounds: u64, clients: &[&str]) {
    let mut open_assignments: std::collections::HashMap<String, u32> = Default::default();

    for round_id in 1..=rounds {
        let status = ctx.round_status(round_id).expect("round exists");

        // Received is a subset of assigned.
        for client in &status.received {
            assert!(
                status.assigned.contains(client),
                "round {round_id}: {client} received but not assigned"
            );
        }

        // A client appears in at most one non-closed round.
        if status.state != RoundState::Closed {
            for client in &status.assigned {
                let count = open_assignments.entry(client.clone()).or_insert(0);
                *count += 1;
                assert!(*count <= 1, "{client} assigned in two open rounds");
            }
        }

        // A closed round either published a model or failed.
        if status.state == RoundState::Closed {
            match status.close_reason {
                Some(fedcoord_core::rounds::CloseReason::Aggregated { new_version }) => {
                    assert!(ctx.model(new_version).is_ok());
                }
                Some(fedcoord_core::rounds::CloseReason::AggregationFailed) => {}
                None => panic!("round {round_id} closed without a reason"),
            }
        }
    }

    // Versions are consecutive from v1, no gaps.
    let latest = ctx.latest_model_version();
    for n in 1..=latest.number() {
        assert!(
            ctx.model(ModelVersion::new(n)).is_ok(),
            "missing version v{n}"
        );
    }

    // Reputation accounting and non-negative balances.
    for client in clients {
        let rep = ctx.reputation_of(client).expect("registered");
        assert_eq!(
            rep.updates_accepted + rep.updates_rejected,
            rep.updates_submitted,
            "{client}: accepted + rejected != submitted"
        );
        assert!(
            ctx.incentives_of(client).unwrap().token_balance >= 0.0,
            "{client}: negative token balance"
        );
    }
}

#[test]
fn invariants_hold_across_a_mixed_workload() {
    let dir = TempDir::new().unwrap();
    let mut ctx = test_context(&dir, |config| {
        config.async_rounds.enabled = true;
        config.async_rounds.min_updates = 2;
        config.async_rounds.max_duration = Duration::from_secs(300);
    });

    let clients = ["a", "b", "c"];
    let tokens: Vec<String> = clients.iter().map(|c| register(&mut ctx, c)).collect();

    // Round 1: everyone assigned, "c" drops out.
    for (i, client) in clients.iter().enumerate() {
        ctx.assign_task(client, &tokens[i]).unwrap();
    }
    ctx.submit_update("a", &tokens[0], 1, &uniform_delta(0.5), None)
        .unwrap();
    // A few rejected attempts along the way.
    let _ = ctx.submit_update("b", &tokens[1], 1, &serde_json::json!("garbage"), None);
    let _ = ctx.submit_update("b", &tokens[1], 9, &uniform_delta(0.5), None);
    ctx.submit_update("b", &tokens[1], 1, &uniform_delta(0.5), None)
        .unwrap();
    let _ = ctx.submit_update("b", &tokens[1], 1, &uniform_delta(0.5), None);
    check_invariants(&ctx, 1, &clients);

    aggregate_round(&mut ctx, 1);
    check_invariants(&ctx, 2, &clients);

    // Round 2: only "a" participates and submits.
    ctx.assign_task("a", &tokens[0]).unwrap();
    ctx.submit_update("a", &tokens[0], 2, &uniform_delta(-0.25), None)
        .unwrap();
    aggregate_round(&mut ctx, 2);
    check_invariants(&ctx, 3, &clients);

    // Two published versions plus the initial.
    assert_eq!(ctx.latest_model_version(), ModelVersion::new(3));
}
