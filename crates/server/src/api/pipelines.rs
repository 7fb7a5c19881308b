//! # Pipelines API
//!
//! Lifecycle calls go through the conductor so the run behind the active
//! stage follows the pipeline.

use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, patch, post},
    Router,
};
use agentflow_core::engine::{AgentPipeline, StageStatus};
use agentflow_core::graph::StageSpec;
use serde::Deserialize;
use utoipa::ToSchema;

use super::{updated_or_current, ApiError, ApiResponse, ApiResult, SharedState};

#[derive(Deserialize, ToSchema)]
pub struct StageRequest {
    pub agent_type: String,
    #[serde(default)]
    pub task: String,
}

#[derive(Deserialize, ToSchema)]
pub struct CreatePipelineRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub stages: Vec<StageRequest>,
    /// With no stages, the template's stages are used
    pub template_id: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct AdvanceRequest {
    #[serde(default)]
    pub output: String,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateStageRequest {
    /// pending, running, paused, completed, cancelled or failed
    #[schema(value_type = String)]
    pub status: StageStatus,
    pub run_id: Option<String>,
    pub output: Option<String>,
}

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_pipelines).post(create_pipeline))
        .route("/:id", get(get_pipeline).delete(delete_pipeline))
        .route("/:id/run", post(run_pipeline))
        .route("/:id/pause", post(pause_pipeline))
        .route("/:id/resume", post(resume_pipeline))
        .route("/:id/cancel", post(cancel_pipeline))
        .route("/:id/fail", post(fail_pipeline))
        .route("/:id/stages/:stage_id", patch(update_stage))
        .route("/:id/stages/:stage_id/advance", post(advance_stage))
}

/// Pipelines, most recent first
#[utoipa::path(
    get,
    path = "/api/v1/pipelines",
    tag = "pipelines",
    responses((status = 200, description = "Pipelines"))
)]
pub async fn list_pipelines(State(state): State<SharedState>) -> Json<Vec<AgentPipeline>> {
    Json(state.engine.pipelines().pipelines())
}

/// Create a draft pipeline from stages or a template
#[utoipa::path(
    post,
    path = "/api/v1/pipelines",
    tag = "pipelines",
    request_body = CreatePipelineRequest,
    responses(
        (status = 200, description = "The draft pipeline"),
        (status = 404, description = "Unknown template", body = ApiResponse)
    )
)]
pub async fn create_pipeline(
    State(state): State<SharedState>,
    Json(req): Json<CreatePipelineRequest>,
) -> ApiResult<AgentPipeline> {
    let pipelines = state.engine.pipelines();
    if req.stages.is_empty() {
        if let Some(template_id) = &req.template_id {
            return Ok(Json(pipelines.create_from_template(template_id)?));
        }
    }

    let catalog = state.engine.catalog();
    if let Some(unknown) = req.stages.iter().find(|s| !catalog.contains(&s.agent_type)) {
        return Err(ApiError::Unprocessable(format!(
            "unknown agent type '{}'",
            unknown.agent_type
        )));
    }

    let stages = req
        .stages
        .iter()
        .map(|s| StageSpec::new(&s.agent_type, &s.task))
        .collect();
    Ok(Json(pipelines.create_pipeline(
        &req.name,
        &req.description,
        stages,
        req.template_id.as_deref(),
    )))
}

/// One pipeline
#[utoipa::path(
    get,
    path = "/api/v1/pipelines/{id}",
    tag = "pipelines",
    params(("id" = String, Path, description = "Pipeline id")),
    responses(
        (status = 200, description = "The pipeline"),
        (status = 404, description = "Unknown pipeline", body = ApiResponse)
    )
)]
pub async fn get_pipeline(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<AgentPipeline> {
    let pipelines = state.engine.pipelines();
    updated_or_current(None, || pipelines.pipeline(&id), "pipeline", &id)
}

/// Cancel whatever is in flight and delete the pipeline
#[utoipa::path(
    delete,
    path = "/api/v1/pipelines/{id}",
    tag = "pipelines",
    params(("id" = String, Path, description = "Pipeline id")),
    responses(
        (status = 200, description = "Deleted", body = ApiResponse),
        (status = 404, description = "Unknown pipeline", body = ApiResponse)
    )
)]
pub async fn delete_pipeline(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<ApiResponse> {
    if !state.engine.conductor().delete(&id) {
        return Err(ApiError::NotFound(format!("pipeline '{}' not found", id)));
    }
    Ok(Json(ApiResponse {
        success: true,
        message: format!("Pipeline {} deleted", id),
    }))
}

/// Start a draft pipeline
#[utoipa::path(
    post,
    path = "/api/v1/pipelines/{id}/run",
    tag = "pipelines",
    params(("id" = String, Path, description = "Pipeline id")),
    responses(
        (status = 200, description = "The pipeline after the request"),
        (status = 404, description = "Unknown pipeline", body = ApiResponse)
    )
)]
pub async fn run_pipeline(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<AgentPipeline> {
    let updated = state.engine.conductor().start(&id);
    updated_or_current(updated, || state.engine.pipelines().pipeline(&id), "pipeline", &id)
}

/// Pause a running pipeline
#[utoipa::path(
    post,
    path = "/api/v1/pipelines/{id}/pause",
    tag = "pipelines",
    params(("id" = String, Path, description = "Pipeline id")),
    responses(
        (status = 200, description = "The pipeline after the request"),
        (status = 404, description = "Unknown pipeline", body = ApiResponse)
    )
)]
pub async fn pause_pipeline(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<AgentPipeline> {
    let updated = state.engine.conductor().pause(&id);
    updated_or_current(updated, || state.engine.pipelines().pipeline(&id), "pipeline", &id)
}

/// Resume a paused pipeline
#[utoipa::path(
    post,
    path = "/api/v1/pipelines/{id}/resume",
    tag = "pipelines",
    params(("id" = String, Path, description = "Pipeline id")),
    responses(
        (status = 200, description = "The pipeline after the request"),
        (status = 404, description = "Unknown pipeline", body = ApiResponse)
    )
)]
pub async fn resume_pipeline(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<AgentPipeline> {
    let updated = state.engine.conductor().resume(&id);
    updated_or_current(updated, || state.engine.pipelines().pipeline(&id), "pipeline", &id)
}

/// Cancel a pipeline; it ends Failed
#[utoipa::path(
    post,
    path = "/api/v1/pipelines/{id}/cancel",
    tag = "pipelines",
    params(("id" = String, Path, description = "Pipeline id")),
    responses(
        (status = 200, description = "The pipeline after the request"),
        (status = 404, description = "Unknown pipeline", body = ApiResponse)
    )
)]
pub async fn cancel_pipeline(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<AgentPipeline> {
    let updated = state.engine.conductor().cancel(&id);
    updated_or_current(updated, || state.engine.pipelines().pipeline(&id), "pipeline", &id)
}

/// Fail a pipeline
#[utoipa::path(
    post,
    path = "/api/v1/pipelines/{id}/fail",
    tag = "pipelines",
    params(("id" = String, Path, description = "Pipeline id")),
    responses(
        (status = 200, description = "The pipeline after the request"),
        (status = 404, description = "Unknown pipeline", body = ApiResponse)
    )
)]
pub async fn fail_pipeline(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<AgentPipeline> {
    let updated = state.engine.conductor().fail(&id);
    updated_or_current(updated, || state.engine.pipelines().pipeline(&id), "pipeline", &id)
}

/// Complete the active stage by hand
#[utoipa::path(
    post,
    path = "/api/v1/pipelines/{id}/stages/{stage_id}/advance",
    tag = "pipelines",
    params(
        ("id" = String, Path, description = "Pipeline id"),
        ("stage_id" = String, Path, description = "Stage id")
    ),
    request_body = AdvanceRequest,
    responses(
        (status = 200, description = "The pipeline after the request"),
        (status = 404, description = "Unknown pipeline", body = ApiResponse)
    )
)]
pub async fn advance_stage(
    State(state): State<SharedState>,
    Path((id, stage_id)): Path<(String, String)>,
    Json(req): Json<AdvanceRequest>,
) -> ApiResult<AgentPipeline> {
    let updated = state.engine.conductor().advance(&id, &stage_id, &req.output);
    updated_or_current(updated, || state.engine.pipelines().pipeline(&id), "pipeline", &id)
}

/// Set a stage's status without advancing
#[utoipa::path(
    patch,
    path = "/api/v1/pipelines/{id}/stages/{stage_id}",
    tag = "pipelines",
    params(
        ("id" = String, Path, description = "Pipeline id"),
        ("stage_id" = String, Path, description = "Stage id")
    ),
    request_body = UpdateStageRequest,
    responses(
        (status = 200, description = "The pipeline after the request"),
        (status = 404, description = "Unknown pipeline", body = ApiResponse)
    )
)]
pub async fn update_stage(
    State(state): State<SharedState>,
    Path((id, stage_id)): Path<(String, String)>,
    Json(req): Json<UpdateStageRequest>,
) -> ApiResult<AgentPipeline> {
    let pipelines = state.engine.pipelines();
    updated_or_current(
        pipelines.update_stage_status(&id, &stage_id, req.status, req.run_id, req.output),
        || pipelines.pipeline(&id),
        "pipeline",
        &id,
    )
}

#[cfg(test)]
mod tests {
    use crate::api::tests::{call, test_state};
    use crate::api::SharedState;
    use axum::http::StatusCode;
    use serde_json::{json, Value};
    use std::time::Duration;

    async fn create(state: &SharedState) -> Value {
        let (status, pipeline) = call(
            state,
            "POST",
            "/api/v1/pipelines",
            Some(json!({
                "name": "Release notes",
                "stages": [
                    { "agent_type": "writer", "task": "Draft notes" },
                    { "agent_type": "reviewer", "task": "Proofread" }
                ]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        pipeline
    }

    async fn wait_status(state: &SharedState, id: &str, want: &str) -> Value {
        let uri = format!("/api/v1/pipelines/{}", id);
        let mut current = Value::Null;
        for _ in 0..200 {
            current = call(state, "GET", &uri, None).await.1;
            if current["status"] == want {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        current
    }

    #[tokio::test]
    async fn test_create_and_run_to_completion() {
        let state = test_state();
        let pipeline = create(&state).await;
        assert_eq!(pipeline["status"], "draft");
        let id = pipeline["id"].as_str().unwrap();

        let (_, running) = call(&state, "POST", &format!("/api/v1/pipelines/{}/run", id), None).await;
        assert_eq!(running["status"], "running");
        assert!(running["stages"][0]["runId"].is_string());

        let done = wait_status(&state, id, "completed").await;
        assert_eq!(done["status"], "completed");
        assert_eq!(done["stages"][1]["status"], "completed");
    }

    #[tokio::test]
    async fn test_create_from_template() {
        let state = test_state();
        let (status, pipeline) = call(
            &state,
            "POST",
            "/api/v1/pipelines",
            Some(json!({ "template_id": "localization" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(pipeline["name"], "Localization");
        assert_eq!(pipeline["templateId"], "localization");

        let (status, _) = call(
            &state,
            "POST",
            "/api/v1/pipelines",
            Some(json!({ "template_id": "missing" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_create_with_unknown_agent_is_422() {
        let state = test_state();
        let (status, _) = call(
            &state,
            "POST",
            "/api/v1/pipelines",
            Some(json!({ "name": "x", "stages": [{ "agent_type": "poet" }] })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_cancel_routes_to_failed() {
        let state = test_state();
        let pipeline = create(&state).await;
        let id = pipeline["id"].as_str().unwrap();
        call(&state, "POST", &format!("/api/v1/pipelines/{}/run", id), None).await;

        let (_, cancelled) = call(&state, "POST", &format!("/api/v1/pipelines/{}/cancel", id), None).await;
        assert_eq!(cancelled["status"], "failed");
        assert_eq!(cancelled["stages"][0]["status"], "cancelled");

        // Terminal: a second cancel answers with the same record
        let (status, again) = call(&state, "POST", &format!("/api/v1/pipelines/{}/cancel", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(again["status"], "failed");
    }

    #[tokio::test]
    async fn test_advance_stage_by_hand() {
        let state = test_state();
        let pipeline = create(&state).await;
        let id = pipeline["id"].as_str().unwrap();
        let stage_id = pipeline["stages"][0]["id"].as_str().unwrap();
        call(&state, "POST", &format!("/api/v1/pipelines/{}/run", id), None).await;
        call(&state, "POST", &format!("/api/v1/pipelines/{}/pause", id), None).await;

        let (_, advanced) = call(
            &state,
            "POST",
            &format!("/api/v1/pipelines/{}/stages/{}/advance", id, stage_id),
            Some(json!({ "output": "notes drafted" })),
        )
        .await;
        assert_eq!(advanced["stages"][0]["status"], "completed");
        assert_eq!(advanced["stages"][0]["output"], "notes drafted");
        assert_eq!(advanced["stages"][1]["status"], "running");
        assert_eq!(advanced["status"], "paused");
    }

    #[tokio::test]
    async fn test_delete_pipeline() {
        let state = test_state();
        let pipeline = create(&state).await;
        let uri = format!("/api/v1/pipelines/{}", pipeline["id"].as_str().unwrap());

        let (status, body) = call(&state, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        let (status, _) = call(&state, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
