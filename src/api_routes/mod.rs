use crate::api::{Dispatcher, TransportError};
use crate::controller::{SubmissionController, SubmissionFailure, SubmissionState};
use crate::counters::{CounterSnapshot, CounterStore};
use crate::form::{FormInput, Subject};
use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;

pub struct AppState<D, C> {
    pub controller: SubmissionController<D, C>,
    pub endpoint_url: String,
    pub configured: bool,
}

// --- Models ---

#[derive(Serialize)]
struct StatusResponse {
    configured: bool,
    endpoint_status: &'static str,
    state: SubmissionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    counters: Option<CounterSnapshot>,
}

#[derive(Serialize)]
struct SubjectResponse {
    label: &'static str,
    description: &'static str,
}

#[derive(Serialize)]
struct ConfigResponse {
    endpoint_url: String,
    configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    counters: Option<CounterSnapshot>,
}

#[derive(Serialize)]
struct ViolationItem {
    field: &'static str,
    description: &'static str,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    violations: Vec<ViolationItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_ms: Option<u64>,
}

impl ErrorResponse {
    fn new(error: &'static str, message: String) -> Self {
        Self {
            error,
            message,
            violations: Vec::new(),
            retry_after_ms: None,
        }
    }
}

fn failure_response(failure: SubmissionFailure) -> Response {
    let message = failure.advisory();
    match failure {
        SubmissionFailure::Validation(result) => {
            let mut body = ErrorResponse::new("validation", message);
            body.violations = result
                .violations
                .iter()
                .map(|v| ViolationItem {
                    field: v.field(),
                    description: v.description(),
                })
                .collect();
            (StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response()
        }
        SubmissionFailure::Busy { retry_after } => {
            let mut body = ErrorResponse::new("busy", message);
            body.retry_after_ms = Some(u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX));
            (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response()
        }
        SubmissionFailure::Transport(TransportError::NotConfigured) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse::new("not_configured", message)),
        )
            .into_response(),
        SubmissionFailure::Transport(err) => {
            let error = match err.kind() {
                crate::api::TransportErrorKind::NetworkUnreachable => "network_unreachable",
                crate::api::TransportErrorKind::CrossOriginRejected => "cross_origin_rejected",
                _ => "unknown_transport_error",
            };
            (StatusCode::BAD_GATEWAY, Json(ErrorResponse::new(error, message))).into_response()
        }
    }
}

fn storage_error(err: anyhow::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new("storage", err.to_string())),
    )
        .into_response()
}

/// Counter reads and writes hit the filesystem, so they run on the blocking pool.
async fn with_counters<D, C, T>(
    state: &Arc<AppState<D, C>>,
    op: impl FnOnce(&SubmissionController<D, C>) -> anyhow::Result<T> + Send + 'static,
) -> anyhow::Result<T>
where
    D: Dispatcher,
    C: CounterStore + 'static,
    T: Send + 'static,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || op(&state.controller)).await?
}

// --- Handlers ---

async fn status<D: Dispatcher, C: CounterStore + 'static>(
    State(state): State<Arc<AppState<D, C>>>,
) -> impl IntoResponse {
    let counters = with_counters(&state, |controller| controller.counts()).await.ok();
    Json(StatusResponse {
        configured: state.configured,
        endpoint_status: if state.configured {
            "connected"
        } else {
            "not_configured"
        },
        state: state.controller.state(),
        counters,
    })
}

async fn list_subjects() -> Json<Vec<SubjectResponse>> {
    Json(
        Subject::ALL
            .into_iter()
            .map(|subject| SubjectResponse {
                label: subject.label(),
                description: subject.description(),
            })
            .collect(),
    )
}

async fn submit<D: Dispatcher, C: CounterStore + 'static>(
    State(state): State<Arc<AppState<D, C>>>,
    Json(input): Json<FormInput>,
) -> Response {
    match state.controller.submit(&input).await {
        Ok(receipt) => (StatusCode::OK, Json(receipt)).into_response(),
        Err(failure) => failure_response(failure),
    }
}

async fn counters<D: Dispatcher, C: CounterStore + 'static>(
    State(state): State<Arc<AppState<D, C>>>,
) -> Response {
    match with_counters(&state, |controller| controller.counts()).await {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(err) => storage_error(err),
    }
}

async fn reset_counters<D: Dispatcher, C: CounterStore + 'static>(
    State(state): State<Arc<AppState<D, C>>>,
) -> Response {
    match with_counters(&state, |controller| controller.reset_counters()).await {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(err) => storage_error(err),
    }
}

async fn current_config<D: Dispatcher, C: CounterStore + 'static>(
    State(state): State<Arc<AppState<D, C>>>,
) -> impl IntoResponse {
    let counters = with_counters(&state, |controller| controller.counts()).await.ok();
    Json(ConfigResponse {
        endpoint_url: state.endpoint_url.clone(),
        configured: state.configured,
        counters,
    })
}

pub fn api_routes<D: Dispatcher, C: CounterStore + 'static>(state: Arc<AppState<D, C>>) -> Router {
    Router::new()
        .route("/api/status", get(status::<D, C>))
        .route("/api/subjects", get(list_subjects))
        .route("/api/submit", post(submit::<D, C>))
        .route("/api/counters", get(counters::<D, C>))
        .route("/api/counters/reset", post(reset_counters::<D, C>))
        .route("/api/config", get(current_config::<D, C>))
        .with_state(state)
}
