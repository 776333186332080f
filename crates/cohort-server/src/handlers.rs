//! HTTP endpoint handlers
//!
//! Thin translation layer: deserialize the contractual request bodies, call
//! the engine, map error kinds onto status codes. Degraded results are 200s
//! with `warnings` populated; only real failures surface as errors.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

use cohort_core::{
    AudienceSource, SearchRequest, ServiceError, SessionError, VERSION,
};

use crate::state::AppState;

// ============================================================================
// ERROR MAPPING
// ============================================================================

/// Wire error: `{"error": <kind>, "message": <detail>}` with the §-mapped
/// status code.
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self { status, kind, message: message.into() }
    }

    fn bad_request(kind: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, kind, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.kind, "message": self.message }));
        (self.status, body).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        let status = match &e {
            ServiceError::InvalidQuery => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ServiceError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            _ => {
                error!(error = %e, "internal service error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        ApiError::new(status, e.kind(), e.to_string())
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::UnknownSession(_) => {
                ApiError::new(StatusCode::NOT_FOUND, "unknown_session", e.to_string())
            }
            SessionError::InvalidSessionState { .. } => {
                ApiError::new(StatusCode::CONFLICT, "invalid_session_state", e.to_string())
            }
            SessionError::UnknownVariables(_) => {
                ApiError::bad_request("unknown_variables", e.to_string())
            }
            SessionError::Retrieval(inner) => inner.into(),
            other => {
                error!(error = %other, "session workflow error");
                ApiError::new(StatusCode::BAD_GATEWAY, "clustering_failed", other.to_string())
            }
        }
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

// ============================================================================
// RETRIEVAL ENDPOINTS
// ============================================================================

/// POST /api/enhanced-variable-picker/search
pub async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> ApiResult {
    let response = state.service.search(&request).await?;
    Ok(Json(serde_json::to_value(response.as_ref()).unwrap_or(Value::Null)))
}

#[derive(Debug, Deserialize)]
pub struct RefineBody {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(flatten)]
    pub request: SearchRequest,
}

/// POST /api/variable-picker/refine
///
/// With a session id the session's confirmed variables are merged into the
/// results and the session advances through its refine transition; without
/// one this behaves as a plain search.
pub async fn refine(State(state): State<AppState>, Json(body): Json<RefineBody>) -> ApiResult {
    match body.session_id {
        Some(session_id) => {
            let (session_state, response) = state
                .sessions
                .refine_query(&session_id, &body.request.query)
                .await?;
            let mut value = serde_json::to_value(response.as_ref()).unwrap_or(Value::Null);
            if let Value::Object(map) = &mut value {
                map.insert("session_id".to_string(), json!(session_id));
                map.insert("session_state".to_string(), json!(session_state));
            }
            Ok(Json(value))
        }
        None => {
            let response = state.service.search(&body.request).await?;
            Ok(Json(serde_json::to_value(response.as_ref()).unwrap_or(Value::Null)))
        }
    }
}

/// GET /api/enhanced-variable-picker/variable/{code}
pub async fn get_variable(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult {
    let view = state.service.get_variable(&code)?;
    Ok(Json(serde_json::to_value(&view).unwrap_or(Value::Null)))
}

#[derive(Debug, Deserialize)]
pub struct CategoryParams {
    pub top_k: Option<usize>,
}

/// GET /api/enhanced-variable-picker/category/{category}?top_k=N
pub async fn by_category(
    State(state): State<AppState>,
    Path(category): Path<String>,
    Query(params): Query<CategoryParams>,
) -> ApiResult {
    let top_k = params.top_k.unwrap_or(cohort_core::DEFAULT_TOP_K);
    let response = state.service.by_category(&category, top_k)?;
    Ok(Json(serde_json::to_value(&response).unwrap_or(Value::Null)))
}

/// GET /api/enhanced-variable-picker/stats
pub async fn stats(State(state): State<AppState>) -> ApiResult {
    let stats = state.service.stats()?;
    Ok(Json(serde_json::to_value(&stats).unwrap_or(Value::Null)))
}

// ============================================================================
// SESSION ENDPOINTS
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StartSessionBody {
    #[serde(default)]
    pub user_id: Option<String>,
}

/// POST /api/start_session
pub async fn start_session(
    State(state): State<AppState>,
    Json(body): Json<StartSessionBody>,
) -> ApiResult {
    let user_id = body.user_id.unwrap_or_else(|| "anonymous".to_string());
    let (session_id, session_state) = state.sessions.create(&user_id).await;
    Ok(Json(json!({ "session_id": session_id, "state": session_state })))
}

#[derive(Debug, Deserialize)]
pub struct NlProcessBody {
    pub session_id: String,
    pub action: String,
    #[serde(default)]
    pub payload: Value,
}

/// POST /api/nl/process - the conversational workflow entry point.
pub async fn nl_process(
    State(state): State<AppState>,
    Json(body): Json<NlProcessBody>,
) -> ApiResult {
    let session_id = body.session_id.as_str();
    match body.action.as_str() {
        "select_data_type" => {
            let source_raw = payload_str(&body.payload, "source")?;
            let source = AudienceSource::parse_name(source_raw).ok_or_else(|| {
                ApiError::bad_request("invalid_payload", format!("unknown source '{source_raw}'"))
            })?;
            let sub_source = body.payload["sub_source"].as_str().unwrap_or("").to_string();
            let session_state =
                state.sessions.select_data_type(session_id, source, sub_source).await?;
            Ok(Json(json!({ "session_id": session_id, "state": session_state })))
        }
        "submit_query" => {
            let query = payload_str(&body.payload, "query")?;
            let (session_state, response) =
                state.sessions.submit_query(session_id, query).await?;
            Ok(Json(json!({
                "session_id": session_id,
                "state": session_state,
                "results": response.results,
                "total_found": response.total_found,
                "query_context": response.query_context,
                "methods_used": response.methods_used,
                "warnings": response.warnings,
            })))
        }
        "refine_query" => {
            let query = payload_str(&body.payload, "query")?;
            let (session_state, response) =
                state.sessions.refine_query(session_id, query).await?;
            Ok(Json(json!({
                "session_id": session_id,
                "state": session_state,
                "results": response.results,
                "total_found": response.total_found,
                "query_context": response.query_context,
                "methods_used": response.methods_used,
                "warnings": response.warnings,
            })))
        }
        "confirm_variables" => {
            let codes: Vec<String> = body.payload["codes"]
                .as_array()
                .map(|values| {
                    values
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            if codes.is_empty() {
                return Err(ApiError::bad_request("invalid_payload", "codes must be non-empty"));
            }
            let session_state = state.sessions.confirm_variables(session_id, &codes).await?;
            Ok(Json(json!({
                "session_id": session_id,
                "state": session_state,
                "confirmed": codes,
            })))
        }
        "compute_segments" => {
            let hint = body.payload["segment_hint"].as_u64().map(|v| v as usize);
            let (session_state, segments) =
                state.sessions.compute_segments(session_id, hint).await?;
            Ok(Json(json!({
                "session_id": session_id,
                "state": session_state,
                "segments": segments,
            })))
        }
        "accept_segments" => {
            let session_state = state.sessions.accept_segments(session_id).await?;
            Ok(Json(json!({ "session_id": session_id, "state": session_state })))
        }
        "cancel" => {
            let session_state = state.sessions.cancel(session_id).await?;
            Ok(Json(json!({ "session_id": session_id, "state": session_state })))
        }
        other => Err(ApiError::bad_request(
            "unknown_action",
            format!("unrecognized action '{other}'"),
        )),
    }
}

fn payload_str<'a>(payload: &'a Value, field: &str) -> Result<&'a str, ApiError> {
    payload[field].as_str().filter(|s| !s.trim().is_empty()).ok_or_else(|| {
        ApiError::bad_request("invalid_payload", format!("missing field '{field}'"))
    })
}

// ============================================================================
// MIGRATION (ROLLOUT) ENDPOINTS
// ============================================================================

/// GET /api/search/migration/status
pub async fn migration_status(State(state): State<AppState>) -> ApiResult {
    let status = state.service.router().status();
    Ok(Json(serde_json::to_value(status).unwrap_or(Value::Null)))
}

#[derive(Debug, Deserialize)]
pub struct MigrationTestBody {
    pub user_id: String,
}

/// POST /api/search/migration/test - echo the routing decision without
/// executing a search.
pub async fn migration_test(
    State(state): State<AppState>,
    Json(body): Json<MigrationTestBody>,
) -> ApiResult {
    let decision = state.service.route(&body.user_id);
    let status = state.service.router().status();
    Ok(Json(json!({
        "user_id": body.user_id,
        "unified": decision.unified,
        "bucket": decision.bucket,
        "config": status,
    })))
}

// ============================================================================
// HEALTH
// ============================================================================

/// GET /health
pub async fn health(State(state): State<AppState>) -> ApiResult {
    let (snapshot_generation, total_variables, has_embeddings) = match state.service.stats() {
        Ok(stats) => (
            Some(stats.snapshot_generation),
            stats.total_variables,
            stats.has_embeddings,
        ),
        Err(_) => (None, 0, false),
    };
    Ok(Json(json!({
        "status": if snapshot_generation.is_some() { "ok" } else { "degraded" },
        "version": VERSION,
        "uptime_seconds": state.uptime_seconds(),
        "snapshot_generation": snapshot_generation,
        "total_variables": total_variables,
        "has_embeddings": has_embeddings,
        "active_sessions": state.sessions.store().len().await,
    })))
}
