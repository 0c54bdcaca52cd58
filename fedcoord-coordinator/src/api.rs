//! API facade request/response types.
//!
//! Operation names and field names are the wire contract. Requests arrive
//! as JSON objects tagged by `op`; responses are plain JSON objects, with
//! failures carrying the stable error code plus a human-readable message.
//! The token travels in the request body and is never echoed back or
//! logged.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use fedcoord_common::{CoordError, ModelVersion};
use fedcoord_core::async_rounds::AsyncRoundStats;
use fedcoord_core::context::CoordinatorStatus;
use fedcoord_core::incentives::IncentiveSnapshot;
use fedcoord_core::metrics::{MetricsExport, RoundSnapshot};
use fedcoord_core::model_store::StoredModel;
use fedcoord_core::reputation::ReputationSnapshot;
use fedcoord_core::rounds::RoundStatusView;

/// One API facade operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ApiRequest {
    RegisterClient {
        client_name: String,
    },
    GetTask {
        client_id: String,
        token: String,
    },
    SubmitUpdate {
        client_id: String,
        token: String,
        round_id: u64,
        weight_delta: Value,
        /// Advisory: the version the client claims to have trained against.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model_version: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        final_loss: Option<f64>,
        /// Advisory training parameters; the coordinator ignores them.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        training_config: Option<Value>,
    },
    AggregateRound {
        round_id: u64,
    },
    GetRoundStatus {
        round_id: u64,
    },
    GetModel {
        version: String,
    },
    GetMetrics {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        round_id: Option<u64>,
    },
    GetReputation {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },
    GetIncentives {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },
    GetAsyncStats {
        round_id: u64,
    },
    GetStatus,
}

impl ApiRequest {
    /// Operation name, safe to log.
    pub fn op(&self) -> &'static str {
        match self {
            ApiRequest::RegisterClient { .. } => "register_client",
            ApiRequest::GetTask { .. } => "get_task",
            ApiRequest::SubmitUpdate { .. } => "submit_update",
            ApiRequest::AggregateRound { .. } => "aggregate_round",
            ApiRequest::GetRoundStatus { .. } => "get_round_status",
            ApiRequest::GetModel { .. } => "get_model",
            ApiRequest::GetMetrics { .. } => "get_metrics",
            ApiRequest::GetReputation { .. } => "get_reputation",
            ApiRequest::GetIncentives { .. } => "get_incentives",
            ApiRequest::GetAsyncStats { .. } => "get_async_stats",
            ApiRequest::GetStatus => "get_status",
        }
    }

    /// Acting client id, safe to log (never the token).
    pub fn client_id(&self) -> Option<&str> {
        match self {
            ApiRequest::RegisterClient { client_name } => Some(client_name),
            ApiRequest::GetTask { client_id, .. }
            | ApiRequest::SubmitUpdate { client_id, .. } => Some(client_id),
            _ => None,
        }
    }
}

/// Error body carried by every failure response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable identifier from the error taxonomy.
    pub error: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub client_id: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResponse {
    pub round_id: u64,
    pub model_version: ModelVersion,
    pub task: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckResponse {
    pub ok: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateResponse {
    pub round_id: u64,
    pub new_model_version: ModelVersion,
    pub num_updates: usize,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationListResponse {
    pub clients: Vec<ReputationSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncentiveListResponse {
    pub clients: Vec<IncentiveSnapshot>,
}

/// One API facade response.
///
/// Serialized untagged: success responses are their DTO object, failures
/// are `{error, message}`.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ApiResponse {
    Error(ErrorBody),
    Registered(RegisterResponse),
    Task(TaskResponse),
    Ack(AckResponse),
    Aggregated(AggregateResponse),
    RoundStatus(RoundStatusView),
    Model(StoredModel),
    RoundMetrics(Box<RoundSnapshot>),
    Metrics(MetricsExport),
    Reputation(Box<ReputationSnapshot>),
    ReputationList(ReputationListResponse),
    Incentives(Box<IncentiveSnapshot>),
    IncentiveList(IncentiveListResponse),
    AsyncStats(AsyncRoundStats),
    Status(CoordinatorStatus),
}

impl ApiResponse {
    pub fn ok() -> Self {
        ApiResponse::Ack(AckResponse { ok: true })
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ApiResponse::Error(ErrorBody {
            error: code.to_string(),
            message: message.into(),
        })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ApiResponse::Error(_))
    }

    /// The error code, if this is a failure response.
    pub fn error_code(&self) -> Option<&str> {
        match self {
            ApiResponse::Error(body) => Some(body.error.as_str()),
            _ => None,
        }
    }
}

impl From<CoordError> for ApiResponse {
    fn from(err: CoordError) -> Self {
        ApiResponse::error(err.code(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_parses_by_op_tag() {
        let request: ApiRequest = serde_json::from_value(json!({
            "op": "register_client",
            "client_name": "edge-7",
        }))
        .unwrap();
        assert!(matches!(
            request,
            ApiRequest::RegisterClient { ref client_name } if client_name == "edge-7"
        ));
        assert_eq!(request.op(), "register_client");
        assert_eq!(request.client_id(), Some("edge-7"));
    }

    #[test]
    fn test_submit_update_optional_fields_default() {
        let request: ApiRequest = serde_json::from_value(json!({
            "op": "submit_update",
            "client_id": "a",
            "token": "ff00",
            "round_id": 1,
            "weight_delta": [[0.5, 0.5]],
        }))
        .unwrap();

        match request {
            ApiRequest::SubmitUpdate {
                final_loss,
                training_config,
                model_version,
                ..
            } => {
                assert_eq!(final_loss, None);
                assert!(training_config.is_none());
                assert!(model_version.is_none());
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_get_metrics_with_and_without_round() {
        let all: ApiRequest = serde_json::from_value(json!({"op": "get_metrics"})).unwrap();
        assert!(matches!(all, ApiRequest::GetMetrics { round_id: None }));

        let one: ApiRequest =
            serde_json::from_value(json!({"op": "get_metrics", "round_id": 3})).unwrap();
        assert!(matches!(one, ApiRequest::GetMetrics { round_id: Some(3) }));
    }

    #[test]
    fn test_unknown_op_fails_to_parse() {
        let result: Result<ApiRequest, _> =
            serde_json::from_value(json!({"op": "drop_tables"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_error_response_serialization() {
        let response = ApiResponse::from(CoordError::Unauthorized);
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["error"], "unauthorized");
        assert!(value["message"].is_string());
        assert_eq!(response.error_code(), Some("unauthorized"));
    }

    #[test]
    fn test_success_response_serializes_flat() {
        let response = ApiResponse::Task(TaskResponse {
            round_id: 1,
            model_version: ModelVersion::INITIAL,
            task: "train".to_string(),
        });
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value, json!({"round_id": 1, "model_version": "v1", "task": "train"}));
        assert!(!response.is_error());
    }

    #[test]
    fn test_token_never_serialized_in_responses() {
        let response = ApiResponse::ok();
        let text = serde_json::to_string(&response).unwrap();
        assert!(!text.contains("token"));
    }
}
