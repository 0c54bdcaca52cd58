//! Operations and error codes through the engine task's API facade.

use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::oneshot;

use fedcoord_common::ModelVersion;
use fedcoord_coordinator::api::{ApiRequest, ApiResponse};
use fedcoord_coordinator::tasks::{task_channel, EngineMessage, TaskHandle};
use fedcoord_coordinator::{EngineTask, Task};
use fedcoord_core::context::CoordinatorContext;

use crate::test_utils::{init_test_logging, test_config};

fn spawn_engine(dir: &TempDir) -> TaskHandle<EngineMessage> {
    init_test_logging();
    let ctx = CoordinatorContext::new(test_config(dir)).unwrap();
    let (handle, rx) = task_channel();
    let mut engine = EngineTask::new(ctx, handle.clone());
    tokio::spawn(async move { engine.run(rx).await });
    handle
}

async fn call(handle: &TaskHandle<EngineMessage>, request: ApiRequest) -> ApiResponse {
    let (tx, rx) = oneshot::channel();
    handle
        .send(EngineMessage::Api {
            request,
            respond_to: tx,
        })
        .await
        .unwrap();
    rx.await.unwrap()
}

async fn register(handle: &TaskHandle<EngineMessage>, name: &str) -> String {
    match call(
        handle,
        ApiRequest::RegisterClient {
            client_name: name.to_string(),
        },
    )
    .await
    {
        ApiResponse::Registered(r) => r.token,
        other => panic!("register failed: {other:?}"),
    }
}

#[tokio::test]
async fn every_read_operation_answers() {
    let dir = TempDir::new().unwrap();
    let handle = spawn_engine(&dir);
    let token = register(&handle, "a").await;

    let task = call(
        &handle,
        ApiRequest::GetTask {
            client_id: "a".to_string(),
            token: token.clone(),
        },
    )
    .await;
    assert!(matches!(task, ApiResponse::Task(_)));

    assert!(matches!(
        call(&handle, ApiRequest::GetRoundStatus { round_id: 1 }).await,
        ApiResponse::RoundStatus(_)
    ));
    assert!(matches!(
        call(
            &handle,
            ApiRequest::GetModel {
                version: "v1".to_string()
            }
        )
        .await,
        ApiResponse::Model(_)
    ));
    assert!(matches!(
        call(&handle, ApiRequest::GetMetrics { round_id: None }).await,
        ApiResponse::Metrics(_)
    ));
    assert!(matches!(
        call(&handle, ApiRequest::GetMetrics { round_id: Some(1) }).await,
        ApiResponse::RoundMetrics(_)
    ));
    assert!(matches!(
        call(
            &handle,
            ApiRequest::GetReputation {
                client_id: Some("a".to_string())
            }
        )
        .await,
        ApiResponse::Reputation(_)
    ));
    assert!(matches!(
        call(&handle, ApiRequest::GetReputation { client_id: None }).await,
        ApiResponse::ReputationList(_)
    ));
    assert!(matches!(
        call(
            &handle,
            ApiRequest::GetIncentives {
                client_id: Some("a".to_string())
            }
        )
        .await,
        ApiResponse::Incentives(_)
    ));
    assert!(matches!(
        call(&handle, ApiRequest::GetIncentives { client_id: None }).await,
        ApiResponse::IncentiveList(_)
    ));
    assert!(matches!(
        call(&handle, ApiRequest::GetAsyncStats { round_id: 1 }).await,
        ApiResponse::AsyncStats(_)
    ));
    assert!(matches!(
        call(&handle, ApiRequest::GetStatus).await,
        ApiResponse::Status(_)
    ));
}

#[tokio::test]
async fn unknown_resources_map_to_stable_codes() {
    let dir = TempDir::new().unwrap();
    let handle = spawn_engine(&dir);

    let cases = [
        (
            ApiRequest::GetRoundStatus { round_id: 99 },
            "unknown_round",
        ),
        (
            ApiRequest::GetModel {
                version: "v99".to_string(),
            },
            "unknown_version",
        ),
        (
            ApiRequest::GetMetrics { round_id: Some(99) },
            "unknown_round",
        ),
        (
            ApiRequest::GetReputation {
                client_id: Some("nobody".to_string()),
            },
            "unknown_client",
        ),
        (
            ApiRequest::GetIncentives {
                client_id: Some("nobody".to_string()),
            },
            "unknown_client",
        ),
        (ApiRequest::GetAsyncStats { round_id: 99 }, "unknown_round"),
        (ApiRequest::AggregateRound { round_id: 99 }, "unknown_round"),
    ];

    for (request, expected) in cases {
        let op = request.op();
        let response = call(&handle, request).await;
        assert_eq!(
            response.error_code(),
            Some(expected),
            "operation {op} returned {response:?}"
        );
    }
}

#[tokio::test]
async fn facade_round_trip_produces_new_version() {
    let dir = TempDir::new().unwrap();
    let handle = spawn_engine(&dir);
    let token = register(&handle, "solo").await;

    let response = call(
        &handle,
        ApiRequest::GetTask {
            client_id: "solo".to_string(),
            token: token.clone(),
        },
    )
    .await;
    let round_id = match response {
        ApiResponse::Task(task) => task.round_id,
        other => panic!("get_task failed: {other:?}"),
    };

    let response = call(
        &handle,
        ApiRequest::SubmitUpdate {
            client_id: "solo".to_string(),
            token,
            round_id,
            weight_delta: serde_json::json!([[0.5, 0.5, 0.5]]),
            model_version: Some("v1".to_string()),
            final_loss: Some(0.1),
            training_config: Some(serde_json::json!({"epochs": 1})),
        },
    )
    .await;
    assert!(matches!(response, ApiResponse::Ack(_)), "{response:?}");

    match call(&handle, ApiRequest::AggregateRound { round_id }).await {
        ApiResponse::Aggregated(agg) => {
            assert_eq!(agg.new_model_version, ModelVersion::new(2));
        }
        other => panic!("aggregate failed: {other:?}"),
    }

    // Aggregating again: the round is closed now.
    let response = call(&handle, ApiRequest::AggregateRound { round_id }).await;
    assert_eq!(response.error_code(), Some("round_not_collecting"));

    // Metrics snapshot written, give the blocking pool a moment.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(dir.path().join("metrics").join("round_1.json").exists());
}
