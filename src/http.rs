//! The HTTP surface (§6): pattern endpoints (direct, non-design), design endpoints, and
//! deployment endpoints, all behind one [`axum::Router`] built over a shared [`Engine`].
//!
//! Grounded on the `mcp_http_adapter::AxumHttpAdapter` HTTP adapter this crate started from: the
//! same `axum::Router` + per-route `Arc`-cloned-state idiom, generalized from that adapter's
//! single bearer-token-guarded JSON-RPC endpoint into this wider pattern/design/deployment
//! surface, with `axum::response::sse` added for the streaming endpoints that adapter never
//! needed.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::Agent;
use crate::design::{Block, Design, Pattern};
use crate::engine::Engine;
use crate::error::EngineError;
use crate::events::{EventKind, EventPayload, ExecutionEvent};
use crate::runner::block_result_json;
use crate::store::ExecutionRecord;

/// HTTP status codes for each [`EngineError`] variant (§7): `400` for malformed or cyclic
/// requests, `401` for credential failures, `500` for everything else (timeouts, internal vendor
/// errors, workspace/store failures, aggregated execution failures).
impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = match &self {
            EngineError::InvalidRequest(_) | EngineError::DesignCyclic => StatusCode::BAD_REQUEST,
            EngineError::AgentUnavailable(_) => StatusCode::UNAUTHORIZED,
            EngineError::AgentTimeout
            | EngineError::AgentCancelled
            | EngineError::AgentInternal(_)
            | EngineError::WorkspaceUnavailable(_)
            | EngineError::BlockFailed(_, _)
            | EngineError::ExecutionFailed(_)
            | EngineError::StoreUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// Build the engine's router. Callers serve it with `axum::serve` over whatever listener they
/// choose; this crate does not open a socket itself.
pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/patterns/{pattern}/execute", post(pattern_execute))
        .route("/patterns/{pattern}/stream", post(pattern_stream))
        .route("/designs/{id}/execute", post(design_execute))
        .route("/executions/{id}", get(get_execution))
        .route("/executions/{id}/cancel", post(cancel_execution))
        .route("/deployed/{*path}", get(deployment_trigger).post(deployment_trigger))
        .route("/deployments/{id}/logs/{log_id}", get(deployment_log))
        .route("/deployments/{id}/logs", get(deployment_logs_list))
        .with_state(engine)
}

/// Request body shared by both pattern endpoints. `model` is accepted for wire compatibility
/// with callers that always send it, but this engine routes every agent through the one
/// transport its [`Engine`] was built with (§4.1 doc: "one vendor identity in play per
/// process") — it does not select a different backing model per request.
#[derive(Debug, Deserialize)]
struct PatternRequest {
    agents: Vec<Agent>,
    task: String,
    #[serde(default)]
    rounds: Option<u32>,
    #[serde(default)]
    aggregator: Option<String>,
    #[serde(default)]
    manager: Option<String>,
    #[serde(default)]
    moderator: Option<String>,
    #[serde(default)]
    router: Option<String>,
    #[serde(default)]
    git_repo: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    model: Option<String>,
}

fn pattern_from_request(pattern: &str, req: &PatternRequest) -> Result<Pattern, EngineError> {
    match pattern {
        "sequential" => Ok(Pattern::Sequential),
        "parallel" => Ok(Pattern::Parallel { aggregator: req.aggregator.clone() }),
        "hierarchical" => req
            .manager
            .clone()
            .map(|manager| Pattern::Hierarchical { manager })
            .ok_or_else(|| EngineError::InvalidRequest("hierarchical pattern requires 'manager'".to_string())),
        "debate" => Ok(Pattern::Debate { moderator: req.moderator.clone(), rounds: req.rounds.unwrap_or(1) }),
        "routing" => req
            .router
            .clone()
            .map(|router| Pattern::Routing { router })
            .ok_or_else(|| EngineError::InvalidRequest("routing pattern requires 'router'".to_string())),
        other => Err(EngineError::InvalidRequest(format!("unknown pattern: {other}"))),
    }
}

fn standalone_block(pattern: Pattern, req: &PatternRequest) -> Result<Block, EngineError> {
    let block = Block { id: "standalone".to_string(), pattern, agents: req.agents.clone(), task: req.task.clone(), git_repo: req.git_repo.clone() };
    // Reuse Design::validate's pattern-reference checks (manager/router/aggregator/moderator
    // must name an agent actually present in the block) by wrapping the block in a throwaway,
    // single-block design; the design's own id/connections are irrelevant here.
    let design = Design { id: "standalone".to_string(), name: "standalone".to_string(), blocks: vec![block.clone()], connections: vec![] };
    design.validate()?;
    Ok(block)
}

#[derive(Debug, Serialize)]
struct PatternResponseBody {
    pattern: String,
    execution_id: Uuid,
    status: String,
    result: serde_json::Value,
    duration_ms: i64,
    created_at: chrono::DateTime<Utc>,
}

/// `POST /patterns/{pattern}/execute` (§6): run one block directly, outside any design, and wait
/// for it to settle.
async fn pattern_execute(
    State(engine): State<Arc<Engine>>,
    Path(pattern): Path<String>,
    Json(req): Json<PatternRequest>,
) -> Result<Json<PatternResponseBody>, EngineError> {
    let started = Utc::now();
    let pattern_kind = pattern_from_request(&pattern, &req)?;
    let block = standalone_block(pattern_kind, &req)?;

    let (result, _bus) = engine.runner.execute_block_standalone(&block, &req.task, CancellationToken::new()).await?;
    let duration_ms = (Utc::now() - started).num_milliseconds().max(0);

    Ok(Json(PatternResponseBody {
        pattern,
        execution_id: Uuid::new_v4(),
        status: "completed".to_string(),
        result: block_result_json(&result),
        duration_ms,
        created_at: started,
    }))
}

/// `POST /patterns/{pattern}/stream` (§6): run one block directly and relay its event stream as
/// Server-Sent Events as it runs, rather than waiting for it to settle.
async fn pattern_stream(
    State(engine): State<Arc<Engine>>,
    Path(pattern): Path<String>,
    Json(req): Json<PatternRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, EngineError> {
    let pattern_kind = pattern_from_request(&pattern, &req)?;
    let block = standalone_block(pattern_kind, &req)?;

    let bus = engine.runner.spawn_block_standalone(block, req.task.clone(), CancellationToken::new());
    // Snapshot first, then subscribe: any event emitted in between appears in both, a documented
    // caveat of EventBus (see its doc comment) acceptable for a short-lived standalone block.
    let snapshot = bus.snapshot();
    let live = BroadcastStream::new(bus.subscribe()).filter_map(|item| async move { item.ok() });
    let stream = futures_util::stream::iter(snapshot).chain(live).map(|event| Ok(to_sse_event(&event)));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn to_sse_payload(event: &ExecutionEvent) -> serde_json::Value {
    match &event.payload {
        EventPayload::Chunk { data } => serde_json::json!({ "type": "chunk", "agent": event.agent_name, "data": data }),
        EventPayload::Status { message } => serde_json::json!({ "type": "status", "block_id": event.block_id, "message": message }),
        EventPayload::BlockComplete { success } => serde_json::json!({ "type": "block_complete", "block_id": event.block_id, "success": success }),
        EventPayload::Complete { result } => serde_json::json!({ "type": "complete", "result": result }),
        EventPayload::Error { error } => serde_json::json!({ "type": "error", "error": error }),
        EventPayload::Empty => serde_json::json!({ "type": "start" }),
    }
}

fn to_sse_event(event: &ExecutionEvent) -> Event {
    let kind = match event.kind {
        EventKind::Start => "start",
        EventKind::Status => "status",
        EventKind::Chunk => "chunk",
        EventKind::BlockComplete => "block_complete",
        EventKind::Complete => "complete",
        EventKind::Error => "error",
    };
    match Event::default().event(kind).json_data(to_sse_payload(event)) {
        Ok(event) => event,
        Err(_) => Event::default().event("error").data("{\"type\":\"error\",\"error\":\"event serialization failed\"}"),
    }
}

#[derive(Debug, Deserialize)]
struct DesignExecuteRequest {
    design: Design,
    task: String,
}

#[derive(Debug, Serialize)]
struct TriggerResponseBody {
    execution_id: Uuid,
    status_url: String,
}

/// `POST /designs/{id}/execute` (§6). Design entities are created/updated out of process (out of
/// scope); the full design body travels with the execute request itself, and the path segment
/// must agree with it.
async fn design_execute(
    State(engine): State<Arc<Engine>>,
    Path(design_id): Path<String>,
    Json(req): Json<DesignExecuteRequest>,
) -> Result<Json<TriggerResponseBody>, EngineError> {
    if req.design.id != design_id {
        return Err(EngineError::InvalidRequest(format!("path id {design_id} does not match design body id {}", req.design.id)));
    }
    let (execution_id, status_url) = engine.trigger_design(req.design, req.task).await?;
    Ok(Json(TriggerResponseBody { execution_id, status_url }))
}

#[derive(Debug, Serialize)]
struct ResultData {
    results: HashMap<String, serde_json::Value>,
    in_progress: bool,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ExecutionSnapshotBody {
    id: Uuid,
    design_id: Option<String>,
    status: crate::store::ExecutionStatus,
    started_at: chrono::DateTime<Utc>,
    completed_at: Option<chrono::DateTime<Utc>>,
    result_data: ResultData,
    events: Vec<ExecutionEvent>,
}

impl From<ExecutionRecord> for ExecutionSnapshotBody {
    fn from(record: ExecutionRecord) -> Self {
        ExecutionSnapshotBody {
            id: record.id,
            design_id: record.design_id,
            status: record.status,
            started_at: record.started_at,
            completed_at: record.completed_at,
            result_data: ResultData { results: record.results, in_progress: record.in_progress, error: record.error },
            events: record.events,
        }
    }
}

/// `GET /executions/{execution_id}` (§6).
async fn get_execution(State(engine): State<Arc<Engine>>, Path(execution_id): Path<Uuid>) -> Result<Json<ExecutionSnapshotBody>, EngineError> {
    let record = engine
        .execution_status(execution_id)
        .await
        .ok_or_else(|| EngineError::InvalidRequest(format!("unknown execution {execution_id}")))?;
    Ok(Json(record.into()))
}

/// `POST /executions/{execution_id}/cancel` (§6).
async fn cancel_execution(State(engine): State<Arc<Engine>>, Path(execution_id): Path<Uuid>) -> Json<serde_json::Value> {
    engine.cancel_execution(execution_id).await;
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Serialize)]
struct DeploymentTriggerResponse {
    execution_id: Uuid,
    log_id: Uuid,
    status_url: String,
    all_logs_url: String,
}

/// `GET|POST /deployed/{path}` (§6): trigger the deployment registered at `path`. The root task
/// travels as the `input` query parameter on both verbs, so a trigger never needs a request body.
async fn deployment_trigger(
    State(engine): State<Arc<Engine>>,
    Path(path): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<DeploymentTriggerResponse>, EngineError> {
    let input = query.get("input").cloned().unwrap_or_default();
    let outcome = engine.deployments.trigger(&path, &input).await?;
    Ok(Json(DeploymentTriggerResponse {
        execution_id: outcome.execution_id,
        // One execution is one log entry: the execution id doubles as its log id.
        log_id: outcome.execution_id,
        status_url: outcome.status_url,
        all_logs_url: format!("/deployments/{path}/logs"),
    }))
}

/// `GET /deployments/{id}/logs/{log_id}` (§6): one execution's snapshot, scoped by deployment id
/// for readability (the execution id alone is already globally unique).
async fn deployment_log(
    State(engine): State<Arc<Engine>>,
    Path((_deployment_id, log_id)): Path<(String, Uuid)>,
) -> Result<Json<ExecutionSnapshotBody>, EngineError> {
    let record = engine.deployments.status(log_id).await.ok_or_else(|| EngineError::InvalidRequest(format!("unknown log {log_id}")))?;
    Ok(Json(record.into()))
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    #[serde(default)]
    limit: Option<usize>,
}

/// `GET /deployments/{id}/logs?limit=N` (§6): the most recent executions of this deployment's
/// design, newest first. Defaults to 20 when `limit` is omitted.
async fn deployment_logs_list(
    State(engine): State<Arc<Engine>>,
    Path(deployment_id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Json<Vec<ExecutionSnapshotBody>> {
    let limit = query.limit.unwrap_or(20);
    let records = engine.deployments.logs(&deployment_id, limit).await;
    Json(records.into_iter().map(ExecutionSnapshotBody::from).collect())
}
