//! Core library for exam-assist.  This module wires together the
//! inference client, report renderer and file store behind the HTTP
//! handlers, and maps each component's failures to a response status.

mod config;
pub mod inference;
pub mod metrics;
pub mod prompt;
pub mod report;
pub mod store;

pub use config::{AppConfig, InferenceConfig};

use axum::body::Bytes;
use axum::extract::{
    rejection::{BytesRejection, FailedToBufferBody, QueryRejection},
    DefaultBodyLimit, Query, State,
};
use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;

use crate::inference::{InferenceClient, InferenceError};
use crate::metrics::{Metrics, Route};
use crate::prompt::build_conversation;
use crate::report::{examination_report, markdown_to_pdf, RenderError, ReportFormat};
use crate::store::{file_stem, FileStore, StoreError};

/// Echoed by the analyze route when the payload lacks an identifier.
pub const UNKNOWN_IDENTIFIER: &str = "UNKNOWN";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AnalyzeResponse {
    pub patient_id: Value,
    pub case_id: Value,
    pub analysis: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ExportResponse {
    pub status: String,
    pub file: String,
    pub path: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Every way a request can fail, one variant per response contract.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing or invalid bearer token")]
    Unauthorized,
    #[error("missing or malformed JSON body")]
    BadBody,
    #[error("unsupported export format {0:?}")]
    UnsupportedFormat(String),
    #[error("request body exceeds the configured limit")]
    TooLarge,
    #[error("failed to serialize payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadBody | ApiError::UnsupportedFormat(_) => StatusCode::BAD_REQUEST,
            ApiError::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Inference(InferenceError::Timeout) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Inference(_) => StatusCode::BAD_GATEWAY,
            ApiError::Payload(_) | ApiError::Render(_) | ApiError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn body(&self) -> ErrorResponse {
        let (error, detail) = match self {
            ApiError::Unauthorized => ("Unauthorized", None),
            ApiError::BadBody => ("JSON body required", None),
            ApiError::UnsupportedFormat(raw) => (
                "Unsupported format",
                Some(format!("expected md or pdf, got {:?}", raw)),
            ),
            ApiError::TooLarge => ("Request too large", None),
            ApiError::Payload(e) => ("Failed to serialize payload", Some(e.to_string())),
            ApiError::Inference(InferenceError::Timeout) => ("Inference request timed out", None),
            ApiError::Inference(e) => ("Inference request failed", Some(e.to_string())),
            ApiError::Render(e) => ("Report rendering failed", Some(e.to_string())),
            ApiError::Store(e) => ("Failed to write report", Some(e.to_string())),
        };
        ErrorResponse {
            error: error.to_string(),
            detail,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

/// Shared handler state. Built once at start-up from an [`AppConfig`].
#[derive(Clone)]
pub struct AppState {
    pub inference: InferenceClient,
    pub store: FileStore,
    pub api_token: String,
    pub temperature: f32,
    /// Maximum accepted raw request body size in bytes (None => axum default)
    pub max_request_bytes: Option<usize>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    fn record_failure(&self, route: Route, err: &ApiError) {
        match err {
            ApiError::Unauthorized => {
                self.metrics.record_unauthorized();
                tracing::warn!(route = ?route, "rejected request without a valid bearer token");
            }
            ApiError::BadBody | ApiError::UnsupportedFormat(_) | ApiError::TooLarge => {
                self.metrics.record_bad_request();
                tracing::warn!(route = ?route, error = %err, "rejected malformed request");
            }
            // inference failures are counted where the call is made
            _ => tracing::error!(route = ?route, error = %err, "request failed"),
        }
    }
}

/// Build handler state from an explicit configuration.  Creates the output
/// directory if it does not exist yet.
pub fn build_state(config: AppConfig) -> Result<AppState, Box<dyn std::error::Error>> {
    let inference = InferenceClient::new(&config.inference)?;
    let store = FileStore::open(&config.output_dir)?;
    tracing::info!(
        url = %config.inference.url,
        model = %config.inference.model,
        timeout_secs = config.inference.timeout.as_secs(),
        output_dir = %store.dir().display(),
        "inference relay configured"
    );
    Ok(AppState {
        inference,
        store,
        api_token: config.api_token,
        temperature: config.inference.temperature,
        max_request_bytes: config.max_request_bytes,
        metrics: Arc::new(Metrics::new()),
    })
}

/// Build state from environment variables.  See `AppConfig::from_env` for
/// the variables read:
///
/// * `INFERENCE_URL`, `INFERENCE_MODEL`, `INFERENCE_API_KEY` – upstream endpoint.
/// * `INFERENCE_TIMEOUT_SECS`, `INFERENCE_TEMPERATURE` – call parameters.
/// * `API_TOKEN` – inbound bearer token.
/// * `OUTPUT_DIR`, `MAX_REQUEST_BYTES` – report directory and body limit.
pub fn build_state_from_env() -> Result<AppState, Box<dyn std::error::Error>> {
    let config = AppConfig::from_env().map_err(|e| -> Box<dyn std::error::Error> { e.into() })?;
    build_state(config)
}

/// Build the Axum router and attach handlers.  The router holds a copy
/// of the `AppState` for each invocation.
pub fn app(state: AppState) -> Router {
    let max_request_bytes = state.max_request_bytes;

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/analyze-examination-json", post(analyze_handler))
        .route("/export-examination", post(export_handler));

    let router = if let Some(limit) = max_request_bytes {
        router.layer(DefaultBodyLimit::max(limit))
    } else {
        router
    };

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

#[derive(Debug, Deserialize)]
struct ExportQuery {
    format: Option<String>,
}

fn ensure_authorized(headers: &HeaderMap, token: &str) -> Result<(), ApiError> {
    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| raw.strip_prefix("Bearer "));
    match presented {
        Some(candidate) if candidate == token => Ok(()),
        _ => Err(ApiError::Unauthorized),
    }
}

/// Accept only a non-empty JSON object; everything else is a bad body.
fn parse_payload(body: Result<Bytes, BytesRejection>) -> Result<Value, ApiError> {
    let bytes = match body {
        Ok(bytes) => bytes,
        Err(BytesRejection::FailedToBufferBody(FailedToBufferBody::LengthLimitError(_))) => {
            return Err(ApiError::TooLarge)
        }
        Err(_) => return Err(ApiError::BadBody),
    };
    let value: Value = serde_json::from_slice(&bytes).map_err(|_| ApiError::BadBody)?;
    match &value {
        Value::Object(map) if !map.is_empty() => Ok(value),
        _ => Err(ApiError::BadBody),
    }
}

async fn run_inference(state: &AppState, payload: &Value) -> Result<String, ApiError> {
    let messages = build_conversation(payload)?;
    let start = Instant::now();
    let result = state.inference.complete(&messages, state.temperature).await;
    let latency_ms = start.elapsed().as_millis() as u64;
    state.metrics.observe_inference_ms(latency_ms);
    match result {
        Ok(text) => {
            tracing::info!(
                model = %state.inference.model(),
                latency_ms,
                chars = text.len(),
                "inference completed"
            );
            Ok(text)
        }
        Err(err) => {
            state.metrics.record_inference_failure();
            tracing::error!(model = %state.inference.model(), latency_ms, error = %err, "inference failed");
            Err(err.into())
        }
    }
}

/// Handler for `/analyze-examination-json`.  Returns the identifiers from the
/// payload together with the raw analysis text.
async fn analyze_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    state.metrics.record_request(Route::Analyze);
    match analyze(&state, &headers, body).await {
        Ok(resp) => (StatusCode::OK, Json(resp)).into_response(),
        Err(err) => {
            state.record_failure(Route::Analyze, &err);
            err.into_response()
        }
    }
}

async fn analyze(
    state: &AppState,
    headers: &HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<AnalyzeResponse, ApiError> {
    ensure_authorized(headers, &state.api_token)?;
    let payload = parse_payload(body)?;
    let analysis = run_inference(state, &payload).await?;

    let echo = |key: &str| {
        payload
            .get(key)
            .cloned()
            .unwrap_or_else(|| Value::String(UNKNOWN_IDENTIFIER.to_string()))
    };
    Ok(AnalyzeResponse {
        patient_id: echo("patient_id"),
        case_id: echo("case_id"),
        analysis,
    })
}

/// Handler for `/export-examination`.  Renders the analysis as a report,
/// writes it to the output directory and returns the written file.
async fn export_handler(
    State(state): State<AppState>,
    query: Result<Query<ExportQuery>, QueryRejection>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    state.metrics.record_request(Route::Export);
    match export(&state, query, &headers, body).await {
        Ok(resp) => (StatusCode::OK, Json(resp)).into_response(),
        Err(err) => {
            state.record_failure(Route::Export, &err);
            err.into_response()
        }
    }
}

async fn export(
    state: &AppState,
    query: Result<Query<ExportQuery>, QueryRejection>,
    headers: &HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<ExportResponse, ApiError> {
    ensure_authorized(headers, &state.api_token)?;
    let format = match query {
        Ok(Query(q)) => ReportFormat::parse(q.format.as_deref())
            .ok_or_else(|| ApiError::UnsupportedFormat(q.format.unwrap_or_default()))?,
        Err(rejection) => return Err(ApiError::UnsupportedFormat(rejection.body_text())),
    };
    let payload = parse_payload(body)?;
    let analysis = run_inference(state, &payload).await?;

    let stem = file_stem(&payload);
    if analysis.trim().is_empty() {
        tracing::warn!(case_id = %stem, "inference returned empty text; rendering an empty analysis section");
    }
    let report = examination_report(&payload, &analysis);
    let markdown = report.to_markdown();

    let path = match format {
        ReportFormat::Markdown => state.store.write_text(&stem, format.extension(), &markdown)?,
        ReportFormat::Pdf => {
            let rendered = markdown_to_pdf(&markdown, &report.title)?;
            tracing::debug!(
                paragraphs = rendered.paragraphs,
                pages = rendered.pages,
                "pdf rendered"
            );
            state
                .store
                .write_bytes(&stem, format.extension(), &rendered.bytes)?
        }
    };
    state.metrics.record_report(format == ReportFormat::Pdf);

    let file = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    tracing::info!(file = %file, format = format.extension(), "report exported");
    Ok(ExportResponse {
        status: "success".to_string(),
        file,
        path: path.display().to_string(),
    })
}

/// Liveness probe.
async fn health_handler() -> Response {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))).into_response()
}

/// Prometheus-style metrics exposition.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4",
        )],
        state.metrics.render(),
    )
        .into_response()
}
