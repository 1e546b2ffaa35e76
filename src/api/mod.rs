//! HTTP surface for the scanner.

use crate::catalog::{Ingestor, SeedReport};
use crate::error::Error;
use crate::scan::{CandidateCard, ConfidenceBand, DetectionMethod, ScanPipeline, ScanStatus};

use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

/// Hard cap on uploaded photos. Oversized requests get 413 before any
/// decoding happens.
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Image content types the identify endpoint accepts.
const ACCEPTED_IMAGE_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/webp"];

/// Shared handler state.
pub struct ApiState {
    /// The identification pipeline.
    pub pipeline: Arc<ScanPipeline>,

    /// The set ingestor backing the seed endpoint.
    pub ingestor: Arc<Ingestor>,
}

type SharedState = Arc<ApiState>;

/// Build the scanner router.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/scanner/identify", post(identify))
        .route("/scanner/seed/{set_code}", get(seed_set))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct IdentifyParams {
    /// The client's previous attempt counter; 0 for a fresh scan.
    #[serde(default)]
    attempt: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IdentifyResponse {
    status: ScanStatus,
    confidence: ConfidenceBand,
    confidence_score: f32,
    detection_method: DetectionMethod,
    processing_time_ms: u64,
    rescan_attempt: u32,
    card: Option<CandidateCard>,
    alternative_candidates: Vec<CandidateCard>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SeedResponse {
    status: &'static str,
    set: String,
    cards_processed: usize,
    embeddings_generated: usize,
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

/// `POST /scanner/identify`: identify the card in an uploaded photo.
async fn identify(
    State(state): State<SharedState>,
    Query(params): Query<IdentifyParams>,
    mut multipart: Multipart,
) -> Response {
    let mut file: Option<Vec<u8>> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("bad multipart body: {e}")),
        };

        if field.name() != Some("file") {
            continue;
        }

        let content_type = field.content_type().unwrap_or_default().to_string();
        if !ACCEPTED_IMAGE_TYPES.contains(&content_type.as_str()) {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("unsupported content type '{content_type}', expected one of {ACCEPTED_IMAGE_TYPES:?}"),
            );
        }

        match field.bytes().await {
            Ok(bytes) => file = Some(bytes.to_vec()),
            Err(e) => {
                return error_response(StatusCode::BAD_REQUEST, format!("failed to read file: {e}"));
            }
        }
    }

    let Some(bytes) = file else {
        return error_response(StatusCode::BAD_REQUEST, "missing multipart field 'file'");
    };
    if bytes.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "uploaded file is empty");
    }

    let started = Instant::now();
    match state.pipeline.identify(&bytes, params.attempt).await {
        Ok(verdict) => Json(IdentifyResponse {
            status: verdict.status,
            confidence: verdict.confidence,
            confidence_score: verdict.confidence_score,
            detection_method: verdict.detection_method,
            processing_time_ms: started.elapsed().as_millis() as u64,
            rescan_attempt: verdict.attempt,
            card: verdict.card,
            alternative_candidates: verdict.alternatives,
        })
        .into_response(),
        Err(e) => {
            error!("Identification failed: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// `GET /scanner/seed/{set_code}`: seed one set from the upstream catalog.
/// Idempotent.
async fn seed_set(State(state): State<SharedState>, Path(set_code): Path<String>) -> Response {
    if set_code.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "set code must not be empty");
    }

    match state.ingestor.seed_set(&set_code).await {
        Ok(SeedReport {
            cards_processed,
            embeddings_generated,
        }) => Json(SeedResponse {
            status: "success",
            set: set_code.to_lowercase(),
            cards_processed,
            embeddings_generated,
            message: format!(
                "processed {cards_processed} printings, generated {embeddings_generated} embeddings"
            ),
        })
        .into_response(),
        Err(Error::InvalidInput(msg)) => error_response(StatusCode::BAD_REQUEST, msg),
        Err(e) => {
            error!("Seeding '{set_code}' failed: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// `GET /health`: liveness probe.
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
