//! # Runs API

use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, patch, post, put},
    Router,
};
use agentflow_core::engine::{AgentRun, StepStatus};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{updated_or_current, ApiResult, SharedState};

#[derive(Deserialize, ToSchema)]
pub struct StartRunRequest {
    pub agent_type: String,
    pub task: String,
}

#[derive(Deserialize, ToSchema)]
pub struct ResultRequest {
    pub text: String,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateStepRequest {
    /// pending, running, completed or error
    #[schema(value_type = String)]
    pub status: StepStatus,
    pub output: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct ClearHistoryResponse {
    /// Terminal runs dropped from history
    pub removed: usize,
}

#[derive(Deserialize)]
pub struct ListRunsQuery {
    /// Only runs that are still running or paused
    #[serde(default)]
    pub active: bool,
}

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_runs).post(start_run).delete(clear_history))
        .route("/:id", get(get_run))
        .route("/:id/pause", post(pause_run))
        .route("/:id/resume", post(resume_run))
        .route("/:id/cancel", post(cancel_run))
        .route("/:id/complete", post(complete_run))
        .route("/:id/fail", post(fail_run))
        .route("/:id/result", put(set_result))
        .route("/:id/steps/:index", patch(update_step))
}

/// Run history, most recent first
#[utoipa::path(
    get,
    path = "/api/v1/runs",
    tag = "runs",
    params(("active" = Option<bool>, Query, description = "Only non-terminal runs")),
    responses((status = 200, description = "Runs"))
)]
pub async fn list_runs(
    State(state): State<SharedState>,
    Query(query): Query<ListRunsQuery>,
) -> Json<Vec<AgentRun>> {
    let runs = state.engine.runs();
    Json(if query.active {
        runs.active_runs()
    } else {
        runs.runs()
    })
}

/// Start a run of one agent
#[utoipa::path(
    post,
    path = "/api/v1/runs",
    tag = "runs",
    request_body = StartRunRequest,
    responses(
        (status = 200, description = "The new run"),
        (status = 422, description = "Unknown agent type", body = super::ApiResponse)
    )
)]
pub async fn start_run(
    State(state): State<SharedState>,
    Json(req): Json<StartRunRequest>,
) -> ApiResult<AgentRun> {
    let run = state.engine.runs().start_agent(&req.agent_type, &req.task)?;
    Ok(Json(run))
}

/// Drop finished runs from history
#[utoipa::path(
    delete,
    path = "/api/v1/runs",
    tag = "runs",
    responses((status = 200, description = "How many runs were removed", body = ClearHistoryResponse))
)]
pub async fn clear_history(State(state): State<SharedState>) -> Json<ClearHistoryResponse> {
    let removed = state.engine.runs().clear_history();
    Json(ClearHistoryResponse { removed })
}

/// One run
#[utoipa::path(
    get,
    path = "/api/v1/runs/{id}",
    tag = "runs",
    params(("id" = String, Path, description = "Run id")),
    responses(
        (status = 200, description = "The run"),
        (status = 404, description = "Unknown run", body = super::ApiResponse)
    )
)]
pub async fn get_run(State(state): State<SharedState>, Path(id): Path<String>) -> ApiResult<AgentRun> {
    let runs = state.engine.runs();
    updated_or_current(None, || runs.run(&id), "run", &id)
}

/// Pause a running run
#[utoipa::path(
    post,
    path = "/api/v1/runs/{id}/pause",
    tag = "runs",
    params(("id" = String, Path, description = "Run id")),
    responses(
        (status = 200, description = "The run after the request"),
        (status = 404, description = "Unknown run", body = super::ApiResponse)
    )
)]
pub async fn pause_run(State(state): State<SharedState>, Path(id): Path<String>) -> ApiResult<AgentRun> {
    let runs = state.engine.runs();
    updated_or_current(runs.pause_run(&id), || runs.run(&id), "run", &id)
}

/// Resume a paused run
#[utoipa::path(
    post,
    path = "/api/v1/runs/{id}/resume",
    tag = "runs",
    params(("id" = String, Path, description = "Run id")),
    responses(
        (status = 200, description = "The run after the request"),
        (status = 404, description = "Unknown run", body = super::ApiResponse)
    )
)]
pub async fn resume_run(State(state): State<SharedState>, Path(id): Path<String>) -> ApiResult<AgentRun> {
    let runs = state.engine.runs();
    updated_or_current(runs.resume_run(&id), || runs.run(&id), "run", &id)
}

/// Cancel a run
#[utoipa::path(
    post,
    path = "/api/v1/runs/{id}/cancel",
    tag = "runs",
    params(("id" = String, Path, description = "Run id")),
    responses(
        (status = 200, description = "The run after the request"),
        (status = 404, description = "Unknown run", body = super::ApiResponse)
    )
)]
pub async fn cancel_run(State(state): State<SharedState>, Path(id): Path<String>) -> ApiResult<AgentRun> {
    let runs = state.engine.runs();
    updated_or_current(runs.cancel_run(&id), || runs.run(&id), "run", &id)
}

/// Mark a run completed
#[utoipa::path(
    post,
    path = "/api/v1/runs/{id}/complete",
    tag = "runs",
    params(("id" = String, Path, description = "Run id")),
    responses(
        (status = 200, description = "The run after the request"),
        (status = 404, description = "Unknown run", body = super::ApiResponse)
    )
)]
pub async fn complete_run(State(state): State<SharedState>, Path(id): Path<String>) -> ApiResult<AgentRun> {
    let runs = state.engine.runs();
    updated_or_current(runs.complete_run(&id), || runs.run(&id), "run", &id)
}

/// Mark a run failed
#[utoipa::path(
    post,
    path = "/api/v1/runs/{id}/fail",
    tag = "runs",
    params(("id" = String, Path, description = "Run id")),
    responses(
        (status = 200, description = "The run after the request"),
        (status = 404, description = "Unknown run", body = super::ApiResponse)
    )
)]
pub async fn fail_run(State(state): State<SharedState>, Path(id): Path<String>) -> ApiResult<AgentRun> {
    let runs = state.engine.runs();
    updated_or_current(runs.fail_run(&id), || runs.run(&id), "run", &id)
}

/// Attach a result summary
#[utoipa::path(
    put,
    path = "/api/v1/runs/{id}/result",
    tag = "runs",
    params(("id" = String, Path, description = "Run id")),
    request_body = ResultRequest,
    responses(
        (status = 200, description = "The updated run"),
        (status = 404, description = "Unknown run", body = super::ApiResponse)
    )
)]
pub async fn set_result(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<ResultRequest>,
) -> ApiResult<AgentRun> {
    let runs = state.engine.runs();
    updated_or_current(runs.set_run_result(&id, &req.text), || None, "run", &id)
}

/// Set one step's status
#[utoipa::path(
    patch,
    path = "/api/v1/runs/{id}/steps/{index}",
    tag = "runs",
    params(
        ("id" = String, Path, description = "Run id"),
        ("index" = usize, Path, description = "Zero-based step index")
    ),
    request_body = UpdateStepRequest,
    responses(
        (status = 200, description = "The run after the request"),
        (status = 404, description = "Unknown run", body = super::ApiResponse)
    )
)]
pub async fn update_step(
    State(state): State<SharedState>,
    Path((id, index)): Path<(String, usize)>,
    Json(req): Json<UpdateStepRequest>,
) -> ApiResult<AgentRun> {
    let runs = state.engine.runs();
    updated_or_current(
        runs.update_run_step(&id, index, req.status, req.output),
        || runs.run(&id),
        "run",
        &id,
    )
}
