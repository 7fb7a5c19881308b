//! # AgentFlow API
//!
//! Versioned HTTP surface over one `FlowEngine`. Every route lives under
//! `/api/v1`; live updates stream from `/api/v1/events`.

use axum::{
    body::Body,
    http::{header, Response, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use agentflow_core::engine::FlowEngine;
use agentflow_core::FlowError;
use serde::Serialize;
use std::sync::Arc;
use utoipa::{OpenApi, ToSchema};

pub mod canvas;
pub mod events;
pub mod orchestrate;
pub mod pipelines;
pub mod runs;

/// Application state
pub struct AppState {
    pub engine: FlowEngine,
}

pub type SharedState = Arc<AppState>;

#[derive(Serialize, ToSchema)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
}

/// Failure of an API call, mapped onto a status code
#[derive(Debug)]
pub enum ApiError {
    /// Unknown run, pipeline or template id
    NotFound(String),
    /// Well-formed request the engine cannot act on (e.g. unknown agent type)
    Unprocessable(String),
    /// Persistence or other internal failure
    Internal(anyhow::Error),
}

impl From<FlowError> for ApiError {
    fn from(err: FlowError) -> Self {
        match err {
            FlowError::UnknownTemplate(_) => Self::NotFound(err.to_string()),
            _ => Self::Unprocessable(err.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message),
            Self::Unprocessable(message) => (StatusCode::UNPROCESSABLE_ENTITY, message),
            Self::Internal(err) => {
                tracing::error!(error = %err, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        };
        (
            status,
            Json(ApiResponse {
                success: false,
                message,
            }),
        )
            .into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

/// Resolve an engine mutation. A no-op on a known id answers with the
/// current record; an unknown id is a 404.
pub(crate) fn updated_or_current<T>(
    updated: Option<T>,
    current: impl FnOnce() -> Option<T>,
    what: &str,
    id: &str,
) -> ApiResult<T> {
    updated
        .or_else(current)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("{} '{}' not found", what, id)))
}

// === OpenAPI Definition ===

#[derive(OpenApi)]
#[openapi(
    info(
        title = "AgentFlow API",
        version = "1.0.0",
        description = "Compose agents on a canvas, route free text to agents, and drive simulated runs and pipelines"
    ),
    paths(
        orchestrate::list_agents,
        orchestrate::last_run,
        orchestrate::list_templates,
        orchestrate::detect,
        orchestrate::launch,
        canvas::get_canvas,
        canvas::clear_canvas,
        canvas::rename_canvas,
        canvas::add_node,
        canvas::update_node,
        canvas::remove_node,
        canvas::select_node,
        canvas::add_connection,
        canvas::remove_connection,
        canvas::start_connecting,
        canvas::complete_connection,
        canvas::cancel_connecting,
        canvas::load_template,
        canvas::get_stages,
        canvas::execute,
        canvas::stop,
        canvas::reset,
        canvas::to_pipeline,
        runs::list_runs,
        runs::start_run,
        runs::clear_history,
        runs::get_run,
        runs::pause_run,
        runs::resume_run,
        runs::cancel_run,
        runs::complete_run,
        runs::fail_run,
        runs::set_result,
        runs::update_step,
        pipelines::list_pipelines,
        pipelines::create_pipeline,
        pipelines::get_pipeline,
        pipelines::delete_pipeline,
        pipelines::run_pipeline,
        pipelines::pause_pipeline,
        pipelines::resume_pipeline,
        pipelines::cancel_pipeline,
        pipelines::fail_pipeline,
        pipelines::advance_stage,
        pipelines::update_stage
    ),
    components(
        schemas(
            ApiResponse,
            orchestrate::TextRequest,
            orchestrate::LastRunResponse,
            canvas::RenameRequest,
            canvas::AddNodeRequest,
            canvas::UpdateNodeRequest,
            canvas::SelectRequest,
            canvas::ConnectRequest,
            canvas::StartConnectingRequest,
            canvas::CompleteConnectionRequest,
            canvas::TemplateRequest,
            canvas::ExecuteResponse,
            runs::StartRunRequest,
            runs::ResultRequest,
            runs::UpdateStepRequest,
            runs::ClearHistoryResponse,
            pipelines::StageRequest,
            pipelines::CreatePipelineRequest,
            pipelines::AdvanceRequest,
            pipelines::UpdateStageRequest
        )
    ),
    tags(
        (name = "catalog", description = "Agent types and templates"),
        (name = "orchestrate", description = "Free-text intent routing"),
        (name = "canvas", description = "Workflow graph editing and execution"),
        (name = "runs", description = "Single-agent runs"),
        (name = "pipelines", description = "Multi-stage pipelines")
    )
)]
pub struct ApiDoc;

async fn serve_openapi() -> impl IntoResponse {
    match ApiDoc::openapi().to_json() {
        Ok(spec) => Response::builder()
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(spec))
            .map_err(|e| ApiError::Internal(e.into()))
            .into_response(),
        Err(e) => ApiError::Internal(e.into()).into_response(),
    }
}

/// Full application router
pub fn router(state: SharedState) -> Router {
    Router::new()
        .merge(orchestrate::routes())
        .nest("/api/v1/canvas", canvas::routes())
        .nest("/api/v1/runs", runs::routes())
        .nest("/api/v1/pipelines", pipelines::routes())
        .route("/api/v1/events", get(events::events))
        .route("/api/v1/openapi.json", get(serve_openapi))
        .with_state(state)
}
