//! Issues cases against the remote service and normalises the results.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{HarnessError, Result};
use crate::types::{
    ApiResponse, BatchResponse, ConcreteKind, ModerationVerdict, Outcome, Payload,
    PriceSuggestion, RequestBody, TestCase,
};

/// Executes one case. Implementations must not panic or return faults: every
/// problem is reported as [`Outcome::Failure`].
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, kind: ConcreteKind, case: &TestCase) -> Outcome;

    /// Executes `cases` as one unit and returns one outcome per case, in input
    /// order. Executors without a batch facility run the cases one by one.
    async fn execute_batch(&self, kind: ConcreteKind, cases: &[TestCase]) -> Vec<Outcome> {
        let mut outcomes = Vec::with_capacity(cases.len());
        for case in cases {
            outcomes.push(self.execute(kind, case).await);
        }
        outcomes
    }
}

/// Executor backed by the marketplace HTTP API.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: reqwest::Client,
    base_url: String,
}

impl HttpExecutor {
    pub fn new(base_url: impl Into<String>, config: &Config) -> Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent(config.user_agent.as_str());
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| HarnessError::Usage(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, base_url: base_url.into().trim_end_matches('/').to_string() })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Probes `GET /health`.
    pub async fn health(&self) -> Result<()> {
        let response = self
            .client
            .get(self.url("/health"))
            .send()
            .await
            .map_err(|e| HarnessError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.bytes().await.unwrap_or_default();
        let value = serde_json::from_slice::<Value>(&body).ok();
        Err(HarnessError::Server(
            error_message(value.as_ref()).unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
        ))
    }

    async fn fetch<B>(&self, path: &str, body: &B) -> Result<(StatusCode, Vec<u8>)>
    where
        B: Serialize + ?Sized + Sync,
    {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| HarnessError::Network(e.to_string()))?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| HarnessError::Network(e.to_string()))?;
        Ok((status, bytes.to_vec()))
    }
}

#[async_trait]
impl Executor for HttpExecutor {
    async fn execute(&self, kind: ConcreteKind, case: &TestCase) -> Outcome {
        let body = match RequestBody::from_case(kind, case) {
            Ok(body) => body,
            Err(err) => {
                warn!(?kind, error = %err, "case rejected before send");
                return Outcome::from_error(&err, 0.0);
            }
        };

        let start = Instant::now();
        let fetched = self.fetch(kind.endpoint(), &body).await;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        match fetched.and_then(|(status, bytes)| decode_response(kind, status, &bytes)) {
            Ok(payload) => {
                debug!(?kind, latency_ms, "request succeeded");
                Outcome::Success { payload, latency_ms }
            }
            Err(err) => {
                warn!(?kind, latency_ms, error = %err, "request failed");
                Outcome::from_error(&err, latency_ms)
            }
        }
    }

    /// Sends every valid case in one request to the kind's batch endpoint.
    /// Cases that do not convert are failed locally and left out of the
    /// request. Every sent case reports the latency of the whole request.
    async fn execute_batch(&self, kind: ConcreteKind, cases: &[TestCase]) -> Vec<Outcome> {
        let mut outcomes = Vec::with_capacity(cases.len());
        let mut sent = Vec::new();
        let mut bodies = Vec::new();
        for (index, case) in cases.iter().enumerate() {
            match RequestBody::from_case(kind, case) {
                Ok(body) => {
                    sent.push(index);
                    bodies.push(body);
                }
                Err(err) => {
                    warn!(?kind, index, error = %err, "case rejected before send");
                    outcomes.push((index, Outcome::from_error(&err, 0.0)));
                }
            }
        }
        if bodies.is_empty() {
            return outcomes.into_iter().map(|(_, outcome)| outcome).collect();
        }

        let request = HashMap::from([(kind.batch_field(), bodies.as_slice())]);
        let start = Instant::now();
        let fetched = self.fetch(kind.batch_endpoint(), &request).await;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        let sent_outcomes: Vec<Outcome> = match fetched
            .and_then(|(status, bytes)| decode_batch_response(kind, status, &bytes, bodies.len()))
        {
            Ok(items) => {
                debug!(?kind, latency_ms, items = items.len(), "batch request answered");
                items
                    .into_iter()
                    .map(|item| match item {
                        Ok(payload) => Outcome::Success { payload, latency_ms },
                        Err(err) => Outcome::from_error(&err, latency_ms),
                    })
                    .collect()
            }
            Err(err) => {
                warn!(?kind, latency_ms, error = %err, "batch request failed");
                sent.iter().map(|_| Outcome::from_error(&err, latency_ms)).collect()
            }
        };

        outcomes.extend(sent.into_iter().zip(sent_outcomes));
        outcomes.sort_by_key(|(index, _)| *index);
        outcomes.into_iter().map(|(_, outcome)| outcome).collect()
    }
}

/// Classifies a raw response. Non-2xx and `success: false` are server errors;
/// anything that does not decode into the typed result is a parse error.
pub fn decode_response(kind: ConcreteKind, status: StatusCode, body: &[u8]) -> Result<Payload> {
    let value = accepted_body(status, body)?;
    let envelope: ApiResponse<Value> = serde_json::from_value(value)
        .map_err(|e| HarnessError::Parse(format!("invalid response envelope: {e}")))?;
    let result =
        envelope.result.ok_or_else(|| HarnessError::Parse("response has no result".into()))?;
    decode_result(kind, result)
}

/// Classifies a batch response carrying `expected` items.
///
/// The outer `Err` fails the whole batch. Otherwise each item is classified
/// like a single response; an item the service did not report is a parse error.
pub fn decode_batch_response(
    kind: ConcreteKind,
    status: StatusCode,
    body: &[u8],
    expected: usize,
) -> Result<Vec<Result<Payload>>> {
    let value = accepted_body(status, body)?;
    let response: BatchResponse = serde_json::from_value(value)
        .map_err(|e| HarnessError::Parse(format!("invalid batch response: {e}")))?;

    if let Some(processed) = response.total_processed {
        if processed != response.results.len() {
            warn!(processed, reported = response.results.len(), "batch item count mismatch");
        }
    }

    let mut items: Vec<Option<Result<Payload>>> = (0..expected).map(|_| None).collect();
    for item in response.results {
        let Some(slot) = items.get_mut(item.index) else {
            warn!(index = item.index, expected, "batch item index out of range");
            continue;
        };
        *slot = Some(if item.success {
            item.result
                .ok_or_else(|| HarnessError::Parse("batch item has no result".into()))
                .and_then(|result| decode_result(kind, result))
        } else {
            Err(HarnessError::Server(
                item.error.unwrap_or_else(|| "item reported failure".to_string()),
            ))
        });
    }

    Ok(items
        .into_iter()
        .map(|item| {
            item.unwrap_or_else(|| Err(HarnessError::Parse("missing from batch response".into())))
        })
        .collect())
}

/// Status and `success` flag checks shared by single and batch responses.
fn accepted_body(status: StatusCode, body: &[u8]) -> Result<Value> {
    if !status.is_success() {
        let value = serde_json::from_slice::<Value>(body).ok();
        return Err(HarnessError::Server(
            error_message(value.as_ref()).unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
        ));
    }

    let value: Value = serde_json::from_slice(body)
        .map_err(|e| HarnessError::Parse(format!("invalid response body: {e}")))?;

    if !value.get("success").and_then(Value::as_bool).unwrap_or(false) {
        return Err(HarnessError::Server(
            error_message(Some(&value)).unwrap_or_else(|| "request reported failure".to_string()),
        ));
    }
    Ok(value)
}

fn decode_result(kind: ConcreteKind, result: Value) -> Result<Payload> {
    let payload = match kind {
        ConcreteKind::Price => serde_json::from_value::<PriceSuggestion>(result).map(Payload::Price),
        ConcreteKind::Moderation => {
            serde_json::from_value::<ModerationVerdict>(result).map(Payload::Moderation)
        }
    };
    payload.map_err(|e| HarnessError::Parse(format!("unexpected {kind:?} result: {e}")))
}

/// Body `error`, else `result.error`.
fn error_message(value: Option<&Value>) -> Option<String> {
    let value = value?;
    value
        .get("error")
        .and_then(Value::as_str)
        .or_else(|| value.get("result").and_then(|r| r.get("error")).and_then(Value::as_str))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::{http::StatusCode as AxumStatus, routing::post, Json, Router};
    use serde_json::json;
    use tokio::net::TcpListener;

    use super::*;
    use crate::types::{ExecutionId, FailureKind};

    fn price_result() -> Value {
        json!({
            "suggested_price_range": { "min": 28000, "max": 42000 },
            "confidence": 0.82,
            "market_position": "fairly_priced",
            "reasoning": "Comparable listings in Mumbai",
            "recommendations": ["List at 36000"],
            "metadata": { "processing_time": 1.2, "agent_type": "PriceSuggestorAgent", "execution_id": 7 }
        })
    }

    fn moderation_result() -> Value {
        json!({
            "status": "phone_detected", "confidence": 0.93, "severity": "medium",
            "reason": "Contains a phone number", "action_recommended": "warn",
            "detected_elements": ["98765 43210"],
            "metadata": { "processing_time": 0.4, "agent_type": "ChatModeratorAgent", "execution_id": 3 }
        })
    }

    fn price_case() -> TestCase {
        json!({
            "title": "iPhone 12", "category": "Mobile", "brand": "Apple",
            "condition": "Good", "age_months": 24, "asking_price": 35000,
            "location": "Mumbai"
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    /// Starts a stub marketplace API on an ephemeral port.
    async fn start_test_server() -> SocketAddr {
        async fn negotiate(Json(body): Json<Value>) -> (AxumStatus, Json<Value>) {
            if body["asking_price"].as_i64() == Some(0) {
                return (AxumStatus::BAD_REQUEST, Json(json!({ "error": "asking_price must be positive" })));
            }
            (AxumStatus::OK, Json(json!({ "success": true, "result": price_result() })))
        }

        async fn moderate(Json(body): Json<Value>) -> (AxumStatus, Json<Value>) {
            if body["message"] == "boom" {
                return (AxumStatus::OK, Json(json!({ "success": false, "error": "model unavailable" })));
            }
            (AxumStatus::OK, Json(json!({ "success": true, "result": moderation_result() })))
        }

        // Items with asking_price 0 fail; the rest succeed.
        async fn batch_negotiate(Json(body): Json<Value>) -> (AxumStatus, Json<Value>) {
            let Some(items) = body["items"].as_array() else {
                return (AxumStatus::BAD_REQUEST, Json(json!({ "error": "Missing or invalid items array" })));
            };
            let results: Vec<Value> = items
                .iter()
                .enumerate()
                .map(|(index, item)| {
                    if item["asking_price"].as_i64() == Some(0) {
                        json!({ "index": index, "success": false, "error": "asking_price must be positive" })
                    } else {
                        json!({ "index": index, "success": true, "result": price_result() })
                    }
                })
                .collect();
            let total = results.len();
            (AxumStatus::OK, Json(json!({ "success": true, "results": results, "total_processed": total })))
        }

        // The catch-all failure path of the batch endpoints.
        async fn batch_moderate() -> (AxumStatus, Json<Value>) {
            (AxumStatus::INTERNAL_SERVER_ERROR, Json(json!({ "error": "Internal server error" })))
        }

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new()
            .route("/negotiate", post(negotiate))
            .route("/moderate", post(moderate))
            .route("/batch/negotiate", post(batch_negotiate))
            .route("/batch/moderate", post(batch_moderate))
            .route("/health", axum::routing::get(|| async { Json(json!({ "status": "healthy" })) }));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[test]
    fn test_decode_non_2xx_uses_body_error() {
        let err = decode_response(
            ConcreteKind::Price,
            StatusCode::BAD_REQUEST,
            br#"{"error":"Missing required field: brand"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, HarnessError::Server(ref m) if m == "Missing required field: brand"));
    }

    #[test]
    fn test_decode_non_2xx_without_body_is_generic() {
        let err = decode_response(ConcreteKind::Price, StatusCode::BAD_GATEWAY, b"<html>")
            .unwrap_err();
        assert!(matches!(err, HarnessError::Server(ref m) if m == "HTTP 502"));
    }

    #[test]
    fn test_decode_success_false_uses_result_error() {
        let err = decode_response(
            ConcreteKind::Moderation,
            StatusCode::OK,
            br#"{"success":false,"result":{"error":"llm timeout"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, HarnessError::Server(ref m) if m == "llm timeout"));
    }

    #[test]
    fn test_decode_malformed_body_is_parse_error() {
        let err = decode_response(ConcreteKind::Price, StatusCode::OK, b"not json").unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::Parse);
    }

    #[test]
    fn test_decode_wrong_shape_is_parse_error() {
        let err = decode_response(
            ConcreteKind::Price,
            StatusCode::OK,
            br#"{"success":true,"result":{"status":"safe"}}"#,
        )
        .unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::Parse);
    }

    #[test]
    fn test_decode_price_with_optional_fields() {
        let body = serde_json::to_vec(&json!({ "success": true, "result": price_result() })).unwrap();
        let Payload::Price(suggestion) =
            decode_response(ConcreteKind::Price, StatusCode::OK, &body).unwrap()
        else {
            panic!("expected price payload");
        };
        assert_eq!(suggestion.suggested_price_range.max, 42000.0);
        assert_eq!(suggestion.recommendations.as_deref(), Some(&["List at 36000".to_string()][..]));
        assert_eq!(suggestion.metadata.unwrap().execution_id, Some(ExecutionId::Number(7)));
    }

    #[test]
    fn test_decode_moderation_with_numeric_execution_id() {
        let body =
            serde_json::to_vec(&json!({ "success": true, "result": moderation_result() })).unwrap();
        let Payload::Moderation(verdict) =
            decode_response(ConcreteKind::Moderation, StatusCode::OK, &body).unwrap()
        else {
            panic!("expected moderation payload");
        };
        let metadata = verdict.metadata.unwrap();
        assert_eq!(metadata.execution_id, Some(ExecutionId::Number(3)));
        assert_eq!(metadata.agent_type.as_deref(), Some("ChatModeratorAgent"));
    }

    #[test]
    fn test_decode_price_fallback_with_uuid_execution_id() {
        let mut result = price_result();
        result["confidence"] = json!(0.6);
        result["metadata"] = json!({
            "processing_time": 0.01,
            "agent_type": "price_suggestor_fallback",
            "execution_id": "0b6f7c7e-2d55-4e0b-9a51-6d3f3f1f9c2a"
        });
        let body = serde_json::to_vec(&json!({ "success": true, "result": result })).unwrap();
        let Payload::Price(suggestion) =
            decode_response(ConcreteKind::Price, StatusCode::OK, &body).unwrap()
        else {
            panic!("expected price payload");
        };
        assert_eq!(
            suggestion.metadata.unwrap().execution_id,
            Some(ExecutionId::Text("0b6f7c7e-2d55-4e0b-9a51-6d3f3f1f9c2a".into()))
        );
    }

    #[test]
    fn test_decode_batch_keeps_per_item_failures() {
        let body = serde_json::to_vec(&json!({
            "success": true,
            "results": [
                { "index": 1, "success": false, "error": "Missing required field: brand" },
                { "index": 0, "success": true, "result": price_result() },
                { "index": 9, "success": true, "result": price_result() }
            ],
            "total_processed": 3
        }))
        .unwrap();
        let items = decode_batch_response(ConcreteKind::Price, StatusCode::OK, &body, 3).unwrap();

        assert_eq!(items.len(), 3);
        assert!(matches!(items[0], Ok(Payload::Price(_))));
        assert!(
            matches!(items[1], Err(HarnessError::Server(ref m)) if m == "Missing required field: brand")
        );
        assert!(matches!(items[2], Err(HarnessError::Parse(ref m)) if m.contains("missing")));
    }

    #[test]
    fn test_decode_batch_rejected_request_fails_whole_batch() {
        let err = decode_batch_response(
            ConcreteKind::Moderation,
            StatusCode::BAD_REQUEST,
            br#"{"error":"Missing or invalid messages array"}"#,
            2,
        )
        .unwrap_err();
        assert!(matches!(err, HarnessError::Server(ref m) if m == "Missing or invalid messages array"));
    }

    #[tokio::test]
    async fn test_execute_price_success() {
        let addr = start_test_server().await;
        let executor = HttpExecutor::new(format!("http://{addr}/"), &Config::default()).unwrap();

        let outcome = executor.execute(ConcreteKind::Price, &price_case()).await;
        assert!(outcome.is_success(), "{outcome:?}");
        assert!(outcome.latency_ms() >= 0.0);
    }

    #[tokio::test]
    async fn test_execute_bad_request_is_server_failure() {
        let addr = start_test_server().await;
        let executor = HttpExecutor::new(format!("http://{addr}"), &Config::default()).unwrap();

        let mut case = price_case();
        case.insert("asking_price".into(), json!("0"));
        let outcome = executor.execute(ConcreteKind::Price, &case).await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Server));
        assert_eq!(outcome.error(), Some("asking_price must be positive"));
    }

    #[tokio::test]
    async fn test_execute_moderation_paths() {
        let addr = start_test_server().await;
        let executor = HttpExecutor::new(format!("http://{addr}"), &Config::default()).unwrap();

        let ok = json!({ "message": "call me at 98765 43210", "context": "chat" });
        let outcome = executor.execute(ConcreteKind::Moderation, ok.as_object().unwrap()).await;
        match outcome {
            Outcome::Success { payload: Payload::Moderation(verdict), .. } => {
                assert_eq!(verdict.detected_elements, Some(vec!["98765 43210".to_string()]));
            }
            other => panic!("expected moderation success, got {other:?}"),
        }

        let failing = json!({ "message": "boom" });
        let outcome = executor.execute(ConcreteKind::Moderation, failing.as_object().unwrap()).await;
        assert_eq!(outcome.error(), Some("model unavailable"));
    }

    #[tokio::test]
    async fn test_execute_unreachable_is_network_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let executor = HttpExecutor::new(format!("http://{addr}"), &Config::default()).unwrap();
        let outcome = executor.execute(ConcreteKind::Price, &price_case()).await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Network));
    }

    #[tokio::test]
    async fn test_execute_invalid_case_never_sends() {
        let executor = HttpExecutor::new("http://127.0.0.1:9", &Config::default()).unwrap();
        let case = json!({ "title": "only a title" });
        let outcome = executor.execute(ConcreteKind::Price, case.as_object().unwrap()).await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Parse));
        assert_eq!(outcome.latency_ms(), 0.0);
    }

    #[tokio::test]
    async fn test_execute_batch_maps_items_to_cases() {
        let addr = start_test_server().await;
        let executor = HttpExecutor::new(format!("http://{addr}"), &Config::default()).unwrap();

        let mut zero_price = price_case();
        zero_price.insert("asking_price".into(), json!(0));
        let invalid = json!({ "title": "only a title" }).as_object().cloned().unwrap();
        let cases = vec![price_case(), invalid, zero_price, price_case()];

        let outcomes = executor.execute_batch(ConcreteKind::Price, &cases).await;
        assert_eq!(outcomes.len(), 4);
        assert!(outcomes[0].is_success(), "{:?}", outcomes[0]);
        assert_eq!(outcomes[1].failure_kind(), Some(FailureKind::Parse));
        assert_eq!(outcomes[1].latency_ms(), 0.0);
        assert_eq!(outcomes[2].error(), Some("asking_price must be positive"));
        assert!(outcomes[3].is_success(), "{:?}", outcomes[3]);
        assert_eq!(outcomes[0].latency_ms(), outcomes[3].latency_ms());
    }

    #[tokio::test]
    async fn test_execute_batch_server_error_fails_every_case() {
        let addr = start_test_server().await;
        let executor = HttpExecutor::new(format!("http://{addr}"), &Config::default()).unwrap();

        let cases: Vec<TestCase> = ["hello", "call me"]
            .iter()
            .map(|m| json!({ "message": m }).as_object().cloned().unwrap())
            .collect();
        let outcomes = executor.execute_batch(ConcreteKind::Moderation, &cases).await;
        assert_eq!(outcomes.len(), 2);
        for outcome in &outcomes {
            assert_eq!(outcome.failure_kind(), Some(FailureKind::Server));
            assert_eq!(outcome.error(), Some("Internal server error"));
        }
    }

    #[tokio::test]
    async fn test_execute_batch_without_valid_cases_never_sends() {
        let executor = HttpExecutor::new("http://127.0.0.1:9", &Config::default()).unwrap();
        let cases = vec![json!({ "context": "no message" }).as_object().cloned().unwrap()];
        let outcomes = executor.execute_batch(ConcreteKind::Moderation, &cases).await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].failure_kind(), Some(FailureKind::Parse));
    }

    #[tokio::test]
    async fn test_health_probe() {
        let addr = start_test_server().await;
        let executor = HttpExecutor::new(format!("http://{addr}"), &Config::default()).unwrap();
        executor.health().await.unwrap();
    }
}
