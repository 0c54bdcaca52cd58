//! End-to-end round scenarios against the coordinator context.

use std::time::{Duration, Instant};

use tempfile::TempDir;

use fedcoord_common::{CoordError, ModelVersion, WeightDelta};
use fedcoord_core::aggregate;
use fedcoord_core::rounds::RoundState;

use crate::test_utils::*;

#[test]
fn happy_path_two_clients() {
    let dir = TempDir::new().unwrap();
    seed_initial_model(&dir, vec![vec![1.0, 2.0, 3.0]]);
    let mut ctx = test_context(&dir, |_| {});

    let token_a = register(&mut ctx, "a");
    let token_b = register(&mut ctx, "b");

    let task_a = ctx.assign_task("a", &token_a).unwrap();
    let task_b = ctx.assign_task("b", &token_b).unwrap();
    assert_eq!(task_a.round_id, 1);
    assert_eq!(task_b.round_id, 1);
    assert_eq!(task_a.model_version, ModelVersion::INITIAL);

    ctx.submit_update("a", &token_a, 1, &uniform_delta(0.5), None)
        .unwrap();
    ctx.submit_update("b", &token_b, 1, &uniform_delta(0.5), None)
        .unwrap();

    let outcome = aggregate_round(&mut ctx, 1);
    assert_eq!(outcome.new_version, Some(ModelVersion::new(2)));
    assert_eq!(outcome.num_updates, 2);

    let v2 = ctx.model(ModelVersion::new(2)).unwrap();
    assert_eq!(v2.weights, vec![vec![1.5, 2.5, 3.5]]);

    for client in ["a", "b"] {
        let rep = ctx.reputation_of(client).unwrap();
        assert_eq!(rep.updates_accepted, 1);
        assert_eq!(rep.rounds_completed, 1);
    }
}

#[test]
fn unauthorized_submission_changes_nothing() {
    let dir = TempDir::new().unwrap();
    let mut ctx = test_context(&dir, |_| {});

    let token_a = register(&mut ctx, "a");
    ctx.assign_task("a", &token_a).unwrap();

    // A random token of the right length and alphabet.
    let forged = "5f".repeat(16);
    assert_ne!(forged, token_a);
    assert_eq!(
        ctx.submit_update("a", &forged, 1, &uniform_delta(0.5), None)
            .unwrap_err(),
        CoordError::Unauthorized
    );

    let rep = ctx.reputation_of("a").unwrap();
    assert_eq!(rep.updates_submitted, 0);
    assert_eq!(ctx.metrics_for_round(1).unwrap().updates_received, 0);
    assert_eq!(ctx.incentives_of("a").unwrap().token_balance, 0.0);

    // The legitimate token still works afterwards.
    ctx.submit_update("a", &token_a, 1, &uniform_delta(0.5), None)
        .unwrap();
}

#[test]
fn dropout_under_async_quorum() {
    let dir = TempDir::new().unwrap();
    let mut ctx = test_context(&dir, |config| {
        config.async_rounds.enabled = true;
        config.async_rounds.min_updates = 2;
        config.async_rounds.max_duration = Duration::from_secs(5);
    });

    let tokens: Vec<String> = ["a", "b", "c"]
        .iter()
        .map(|c| register(&mut ctx, c))
        .collect();
    for (i, client) in ["a", "b", "c"].iter().enumerate() {
        let task = ctx.assign_task(client, &tokens[i]).unwrap();
        assert_eq!(task.round_id, 1);
    }

    ctx.submit_update("a", &tokens[0], 1, &uniform_delta(0.5), None)
        .unwrap();
    ctx.submit_update("b", &tokens[1], 1, &uniform_delta(0.5), None)
        .unwrap();
    // "c" never submits. Quorum of 2 makes the round due.
    assert_eq!(ctx.due_round(Instant::now()), Some(1));

    let outcome = aggregate_round(&mut ctx, 1);
    assert_eq!(outcome.num_updates, 2);

    // Straggler accounting: metrics, async stats, reputation, incentives.
    assert_eq!(
        outcome.snapshot.unwrap().stragglers,
        vec!["c".to_string()]
    );
    assert_eq!(ctx.async_stats(1).unwrap().stragglers, vec!["c".to_string()]);
    assert_eq!(ctx.reputation_of("c").unwrap().rounds_dropped, 1);
    // Dropout penalty applied to a zero balance floors at zero.
    assert_eq!(ctx.incentives_of("c").unwrap().token_balance, 0.0);

    // Contributors keep their streak; "c" does not carry into round 2.
    assert_eq!(
        ctx.incentives_of("a").unwrap().consecutive_accepted_rounds,
        1
    );
    assert!(ctx.round_status(2).unwrap().assigned.is_empty());
}

#[test]
fn deadline_fires_below_quorum() {
    let dir = TempDir::new().unwrap();
    let mut ctx = test_context(&dir, |config| {
        config.async_rounds.enabled = true;
        config.async_rounds.min_updates = 3;
        config.async_rounds.max_duration = Duration::from_secs(5);
    });

    let tokens: Vec<String> = ["a", "b", "c"]
        .iter()
        .map(|c| register(&mut ctx, c))
        .collect();
    for (i, client) in ["a", "b", "c"].iter().enumerate() {
        ctx.assign_task(client, &tokens[i]).unwrap();
    }
    ctx.submit_update("a", &tokens[0], 1, &uniform_delta(0.5), None)
        .unwrap();
    ctx.submit_update("b", &tokens[1], 1, &uniform_delta(0.5), None)
        .unwrap();

    let now = Instant::now();
    // Two of three before the deadline: not due.
    assert_eq!(ctx.due_round(now), None);
    // Deadline elapsed: fires with the two updates in hand.
    assert_eq!(ctx.due_round(now + Duration::from_secs(6)), Some(1));

    let outcome = aggregate_round(&mut ctx, 1);
    assert_eq!(outcome.num_updates, 2);
    assert_eq!(ctx.reputation_of("c").unwrap().rounds_dropped, 1);
}

#[test]
fn mismatched_shape_is_stopped_at_intake() {
    let dir = TempDir::new().unwrap();
    let mut ctx = test_context(&dir, |_| {});

    let token_a = register(&mut ctx, "a");
    let token_b = register(&mut ctx, "b");
    ctx.assign_task("a", &token_a).unwrap();
    ctx.assign_task("b", &token_b).unwrap();

    ctx.submit_update("a", &token_a, 1, &uniform_delta(0.1), None)
        .unwrap();
    // Four elements against a three-element model: the format stage
    // rejects it, so a mixed-shape batch never reaches the aggregator.
    let wide = serde_json::json!([[0.1, 0.1, 0.1, 0.1]]);
    assert!(matches!(
        ctx.submit_update("b", &token_b, 1, &wide, None).unwrap_err(),
        CoordError::MalformedDelta(_)
    ));

    let outcome = aggregate_round(&mut ctx, 1);
    assert_eq!(outcome.num_updates, 1);
    assert!(outcome.failure.is_none());
}

#[test]
fn aggregation_failure_closes_round_and_reuses_version() {
    let dir = TempDir::new().unwrap();
    let mut ctx = test_context(&dir, |_| {});

    let token = register(&mut ctx, "a");
    ctx.assign_task("a", &token).unwrap();
    ctx.submit_update("a", &token, 1, &uniform_delta(0.1), None)
        .unwrap();

    // Force a mixed-shape batch into the worker to exercise the round's
    // failure path end to end.
    let mut job = ctx.begin_aggregation(1).unwrap();
    job.deltas
        .push(("rogue".to_string(), WeightDelta::new(vec![vec![0.1; 4]])));
    let result = aggregate::execute_job(&job, &ctx.config().storage.models_dir());
    let outcome = ctx
        .finish_aggregation(1, result, Duration::from_millis(1))
        .unwrap();

    assert!(outcome.failure.is_some());
    assert_eq!(outcome.new_version, None);

    let closed = ctx.round_status(1).unwrap();
    assert_eq!(closed.state, RoundState::Closed);

    // Round 2 opens against the same input version; no v2 exists.
    let next = ctx.round_status(2).unwrap();
    assert_eq!(next.model_version, ModelVersion::INITIAL);
    assert_eq!(
        ctx.model(ModelVersion::new(2)).unwrap_err(),
        CoordError::UnknownVersion
    );

    // The next round can aggregate successfully against v1.
    let token_b = register(&mut ctx, "b");
    ctx.assign_task("b", &token_b).unwrap();
    ctx.submit_update("b", &token_b, 2, &uniform_delta(0.5), None)
        .unwrap();
    let outcome = aggregate_round(&mut ctx, 2);
    assert_eq!(outcome.new_version, Some(ModelVersion::new(2)));
}

#[test]
fn duplicate_replay_is_observable_but_single_credited() {
    let dir = TempDir::new().unwrap();
    let mut ctx = test_context(&dir, |_| {});

    let token = register(&mut ctx, "a");
    ctx.assign_task("a", &token).unwrap();

    ctx.submit_update("a", &token, 1, &uniform_delta(0.5), None)
        .unwrap();
    let balance_after_first = ctx.incentives_of("a").unwrap().token_balance;

    assert_eq!(
        ctx.submit_update("a", &token, 1, &uniform_delta(0.5), None)
            .unwrap_err(),
        CoordError::DuplicateUpdate
    );

    let rep = ctx.reputation_of("a").unwrap();
    assert_eq!(rep.updates_accepted, 1);
    assert_eq!(rep.updates_submitted, 2);
    // No second credit anywhere.
    assert_eq!(
        ctx.incentives_of("a").unwrap().token_balance,
        balance_after_first
    );
    assert_eq!(ctx.metrics_for_round(1).unwrap().updates_accepted, 1);

    let outcome = aggregate_round(&mut ctx, 1);
    assert_eq!(outcome.num_updates, 1);
}

#[test]
fn update_rate_limit_carries_across_rounds() {
    let dir = TempDir::new().unwrap();
    let mut ctx = test_context(&dir, |config| {
        // One update per minute per client.
        config.rate_limits.updates =
            fedcoord_common::config::WindowLimit::new(1, Duration::from_secs(60));
    });

    let token = register(&mut ctx, "a");
    ctx.assign_task("a", &token).unwrap();
    ctx.submit_update("a", &token, 1, &uniform_delta(0.5), None)
        .unwrap();
    aggregate_round(&mut ctx, 1);

    // Round 2 within the same minute: the window is still full.
    let task = ctx.assign_task("a", &token).unwrap();
    assert_eq!(task.round_id, 2);
    assert_eq!(
        ctx.submit_update("a", &token, 2, &uniform_delta(0.5), None)
            .unwrap_err(),
        CoordError::RateLimited
    );

    let rep = ctx.reputation_of("a").unwrap();
    assert_eq!(rep.updates_rejected, 1);
    assert_eq!(
        ctx.metrics_for_round(2)
            .unwrap()
            .updates_rejected
            .get("rate_limited"),
        Some(&1)
    );
}

#[test]
fn get_task_idempotent_until_round_turns_over() {
    let dir = TempDir::new().unwrap();
    let mut ctx = test_context(&dir, |_| {});

    let token = register(&mut ctx, "a");
    let first = ctx.assign_task("a", &token).unwrap();
    for _ in 0..5 {
        assert_eq!(ctx.assign_task("a", &token).unwrap(), first);
    }

    ctx.submit_update("a", &token, 1, &uniform_delta(0.5), None)
        .unwrap();
    // Task done, successor round not open yet.
    assert_eq!(
        ctx.assign_task("a", &token).unwrap_err(),
        CoordError::NoTaskAvailable
    );

    aggregate_round(&mut ctx, 1);
    let next = ctx.assign_task("a", &token).unwrap();
    assert_eq!(next.round_id, 2);
    assert_eq!(next.model_version, ModelVersion::new(2));
}
