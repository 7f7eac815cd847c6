//! HTTP Endpoints
//!
//! REST API for the incident-intelligence engine. Refusals and degraded
//! answers are 200s; only input faults are 4xx and internal faults 5xx.

use axum::{
    extract::{Path, State},
    http::{HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use incident_core::{Error, FeedbackSubmission, IncidentReader, QueryRequest};
use incident_corpus::{IngestReport, IngestSource, RawIncident};

use crate::state::AppState;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let cors_layer = build_cors_layer(
        &state.settings.server.cors_origins,
        state.settings.server.cors_enabled,
    );

    Router::new()
        // Query and feedback
        .route("/api/query", post(query))
        .route("/api/feedback", post(feedback))

        // Corpus
        .route("/api/incidents", post(ingest))
        .route("/api/incidents/:id", get(get_incident))

        // Health checks
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))

        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
}

/// Build CORS layer from configured origins.
///
/// - If cors_enabled is false, returns a permissive layer (for dev)
/// - If cors_origins is empty, defaults to localhost:3000 for safety
fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        tracing::warn!("CORS is disabled - allowing all origins (NOT FOR PRODUCTION)");
        return CorsLayer::permissive();
    }

    let parsed_origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!("Invalid CORS origin: {}", origin);
                None
            })
        })
        .collect();

    if parsed_origins.is_empty() {
        tracing::info!("No CORS origins configured, defaulting to localhost:3000");
        return CorsLayer::new()
            .allow_origin("http://localhost:3000".parse::<HeaderValue>().unwrap())
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any);
    }

    CorsLayer::new()
        .allow_origin(parsed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

/// Error payload with a stable kind code.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: String,
    message: String,
    correlation_id: String,
}

fn error_response(error: Error) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &error {
        Error::Input(_) | Error::Schema(_) => StatusCode::BAD_REQUEST,
        Error::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        Error::EmbeddingUnavailable(_) | Error::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let correlation_id = Uuid::new_v4().to_string();
    if status.is_server_error() {
        tracing::error!(kind = error.kind(), %error, %correlation_id, "request failed");
    }

    (
        status,
        Json(ErrorResponse {
            error: ErrorBody {
                kind: error.kind().to_string(),
                message: error.to_string(),
                correlation_id,
            },
        }),
    )
}

/// Query endpoint
async fn query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> impl IntoResponse {
    match state.engine.answer(request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// Feedback response
#[derive(Debug, Serialize, Deserialize)]
struct FeedbackResponse {
    feedback_id: String,
}

/// Feedback endpoint
async fn feedback(
    State(state): State<AppState>,
    Json(submission): Json<FeedbackSubmission>,
) -> impl IntoResponse {
    match state.feedback.record(submission) {
        Ok(feedback_id) => {
            (StatusCode::CREATED, Json(FeedbackResponse { feedback_id })).into_response()
        }
        Err(e) => error_response(e).into_response(),
    }
}

/// Ingest a batch of raw incident records (ticket export shape).
///
/// The batch runs on its own task, disjoint from the request handler, so a
/// client disconnect cannot cancel a publish between the two index writes.
async fn ingest(
    State(state): State<AppState>,
    Json(records): Json<Vec<RawIncident>>,
) -> Result<Json<IngestReport>, (StatusCode, Json<ErrorResponse>)> {
    let pipeline = state.ingest.clone();
    let report = tokio::spawn(async move {
        pipeline.ingest(IngestSource::Records(records)).await
    })
    .await
    .map_err(|e| error_response(Error::Internal(format!("ingest worker failed: {e}"))))?
    .map_err(error_response)?;

    // Newly ingested tags widen the router's domain anchors.
    state.engine.refresh_anchors();

    Ok(Json(report))
}

/// Fetch one incident by id
async fn get_incident(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.corpus.get(&id.to_uppercase()) {
        Some(incident) => (StatusCode::OK, Json(incident)).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Health check
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Readiness check
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ready",
        "incidents": state.corpus.len(),
        "feedback": state.feedback.len(),
    }))
}
