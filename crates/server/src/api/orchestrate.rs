//! # Catalog and Orchestration API
//!
//! Agent types, templates, and free-text routing.

use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use agentflow_core::catalog::templates::builtin_templates;
use agentflow_core::catalog::{AgentTypeDefinition, PipelineTemplate};
use agentflow_core::engine::Launch;
use agentflow_core::orchestrator::PipelineDetection;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{ApiError, ApiResult, SharedState};

#[derive(Deserialize, ToSchema)]
pub struct TextRequest {
    /// Free-text task description
    pub text: String,
}

#[derive(Serialize, ToSchema)]
pub struct LastRunResponse {
    pub agent_type: String,
    /// RFC 3339 start time of the most recent run
    pub last_run_at: Option<String>,
}

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/v1/agents", get(list_agents))
        .route("/api/v1/agents/:id/last-run", get(last_run))
        .route("/api/v1/templates", get(list_templates))
        .route("/api/v1/orchestrate/detect", post(detect))
        .route("/api/v1/orchestrate/launch", post(launch))
}

/// List agent types
#[utoipa::path(
    get,
    path = "/api/v1/agents",
    tag = "catalog",
    responses(
        (status = 200, description = "Agent type definitions in declaration order")
    )
)]
pub async fn list_agents(State(state): State<SharedState>) -> Json<Vec<AgentTypeDefinition>> {
    Json(state.engine.catalog().list().to_vec())
}

/// When an agent type last started a run
#[utoipa::path(
    get,
    path = "/api/v1/agents/{id}/last-run",
    tag = "catalog",
    params(("id" = String, Path, description = "Agent type id")),
    responses(
        (status = 200, description = "Last run time", body = LastRunResponse),
        (status = 404, description = "Unknown agent type", body = super::ApiResponse)
    )
)]
pub async fn last_run(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<LastRunResponse> {
    if !state.engine.catalog().contains(&id) {
        return Err(ApiError::NotFound(format!("agent type '{}' not found", id)));
    }
    let last_run_at = state.engine.runs().last_run_at(&id).map(|t| t.to_rfc3339());
    Ok(Json(LastRunResponse {
        agent_type: id,
        last_run_at,
    }))
}

/// List built-in pipeline templates
#[utoipa::path(
    get,
    path = "/api/v1/templates",
    tag = "catalog",
    responses(
        (status = 200, description = "Built-in templates")
    )
)]
pub async fn list_templates() -> Json<Vec<PipelineTemplate>> {
    Json(builtin_templates())
}

/// Route text to agents without starting anything
#[utoipa::path(
    post,
    path = "/api/v1/orchestrate/detect",
    tag = "orchestrate",
    request_body = TextRequest,
    responses(
        (status = 200, description = "Ordered agents with confidence")
    )
)]
pub async fn detect(
    State(state): State<SharedState>,
    Json(req): Json<TextRequest>,
) -> Json<PipelineDetection> {
    Json(state.engine.detect_pipeline(&req.text))
}

/// Route text and start the resulting run or pipeline
#[utoipa::path(
    post,
    path = "/api/v1/orchestrate/launch",
    tag = "orchestrate",
    request_body = TextRequest,
    responses(
        (status = 200, description = "What was started, if anything")
    )
)]
pub async fn launch(
    State(state): State<SharedState>,
    Json(req): Json<TextRequest>,
) -> ApiResult<Launch> {
    let launched = state.engine.launch(&req.text)?;
    match &launched {
        Launch::Nothing { .. } => tracing::info!("Launch matched no agent"),
        Launch::Run { run, .. } => tracing::info!(run_id = %run.id, "Launched run"),
        Launch::Pipeline { pipeline, .. } => {
            tracing::info!(pipeline_id = %pipeline.id, "Launched pipeline")
        }
    }
    Ok(Json(launched))
}

#[cfg(test)]
mod tests {
    use crate::api::tests::{call, test_state};
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_list_agents() {
        let state = test_state();
        let (status, agents) = call(&state, "GET", "/api/v1/agents", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(agents.as_array().unwrap().len(), 8);
        assert_eq!(agents[0]["id"], "researcher");
    }

    #[tokio::test]
    async fn test_detect_blog_post() {
        let state = test_state();
        let (status, detection) = call(
            &state,
            "POST",
            "/api/v1/orchestrate/detect",
            Some(json!({ "text": "write a blog post" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detection["confidence"], 0.9);
        assert_eq!(detection["isMultiAgent"], true);
        assert_eq!(
            detection["agents"],
            json!(["researcher", "seo", "writer", "reviewer"])
        );
    }

    #[tokio::test]
    async fn test_launch_and_last_run() {
        let state = test_state();
        let (status, launched) = call(
            &state,
            "POST",
            "/api/v1/orchestrate/launch",
            Some(json!({ "text": "please translate this paragraph" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(launched["kind"], "run");

        let (status, last) = call(&state, "GET", "/api/v1/agents/translator/last-run", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(last["last_run_at"].is_string());

        let (status, _) = call(&state, "GET", "/api/v1/agents/poet/last-run", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_templates() {
        let state = test_state();
        let (_, templates) = call(&state, "GET", "/api/v1/templates", None).await;
        assert_eq!(templates.as_array().unwrap().len(), 4);
    }
}
