//! # Canvas API
//!
//! Graph editing gestures, linearization and the execution driver. Edits
//! that name a missing node or connection change nothing and answer with
//! `changed: false`.

use axum::{
    extract::{Path, State},
    response::Json,
    routing::{delete, get, patch, post, put},
    Router,
};
use agentflow_core::engine::CanvasPipeline;
use agentflow_core::graph::{CanvasGraph, Linearization};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{ApiResult, SharedState};

#[derive(Deserialize, ToSchema)]
pub struct RenameRequest {
    pub name: String,
}

#[derive(Deserialize, ToSchema)]
pub struct AddNodeRequest {
    pub agent_type: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    /// Defaults to "Run <agent> agent"
    pub task: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateNodeRequest {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub task: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct SelectRequest {
    /// `null` clears the selection
    pub node_id: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct ConnectRequest {
    pub source: String,
    pub target: String,
}

#[derive(Deserialize, ToSchema)]
pub struct StartConnectingRequest {
    pub source: String,
}

#[derive(Deserialize, ToSchema)]
pub struct CompleteConnectionRequest {
    pub target: String,
}

#[derive(Deserialize, ToSchema)]
pub struct TemplateRequest {
    pub template_id: String,
}

#[derive(Serialize, ToSchema)]
pub struct ExecuteResponse {
    /// False when the canvas is empty or a walk is already running
    pub started: bool,
    pub walk_id: Option<String>,
    /// Node ids in walk order
    pub order: Vec<String>,
    /// Node ids left out by a cycle
    pub omitted: Vec<String>,
}

/// Result of an editing gesture
#[derive(Serialize)]
pub struct EditResponse {
    pub changed: bool,
    /// Id of a created node or connection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub graph: CanvasGraph,
}

impl EditResponse {
    fn new(state: &SharedState, changed: bool) -> Json<Self> {
        Self::with_id(state, changed, None)
    }

    fn with_id(state: &SharedState, changed: bool, id: Option<String>) -> Json<Self> {
        Json(Self {
            changed,
            id,
            graph: state.engine.canvas().graph(),
        })
    }
}

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(get_canvas).delete(clear_canvas))
        .route("/name", put(rename_canvas))
        .route("/nodes", post(add_node))
        .route("/nodes/:id", patch(update_node).delete(remove_node))
        .route("/selection", put(select_node))
        .route("/connections", post(add_connection))
        .route("/connections/:id", delete(remove_connection))
        .route(
            "/connecting",
            post(start_connecting).delete(cancel_connecting),
        )
        .route("/connecting/complete", post(complete_connection))
        .route("/template", post(load_template))
        .route("/stages", get(get_stages))
        .route("/execute", post(execute))
        .route("/stop", post(stop))
        .route("/reset", post(reset))
        .route("/pipeline", post(to_pipeline))
}

/// Current graph
#[utoipa::path(
    get,
    path = "/api/v1/canvas",
    tag = "canvas",
    responses((status = 200, description = "The canvas graph"))
)]
pub async fn get_canvas(State(state): State<SharedState>) -> Json<CanvasGraph> {
    Json(state.engine.canvas().graph())
}

/// Remove every node and connection
#[utoipa::path(
    delete,
    path = "/api/v1/canvas",
    tag = "canvas",
    responses((status = 200, description = "The cleared graph"))
)]
pub async fn clear_canvas(State(state): State<SharedState>) -> Json<EditResponse> {
    state.engine.canvas().clear();
    EditResponse::new(&state, true)
}

/// Rename the workflow
#[utoipa::path(
    put,
    path = "/api/v1/canvas/name",
    tag = "canvas",
    request_body = RenameRequest,
    responses((status = 200, description = "The renamed graph"))
)]
pub async fn rename_canvas(
    State(state): State<SharedState>,
    Json(req): Json<RenameRequest>,
) -> Json<EditResponse> {
    state.engine.canvas().rename(&req.name);
    EditResponse::new(&state, true)
}

/// Place a node
#[utoipa::path(
    post,
    path = "/api/v1/canvas/nodes",
    tag = "canvas",
    request_body = AddNodeRequest,
    responses(
        (status = 200, description = "The new node id and graph"),
        (status = 422, description = "Unknown agent type", body = super::ApiResponse)
    )
)]
pub async fn add_node(
    State(state): State<SharedState>,
    Json(req): Json<AddNodeRequest>,
) -> ApiResult<EditResponse> {
    let id = state
        .engine
        .canvas()
        .add_node(&req.agent_type, req.x, req.y, req.task.as_deref())?;
    Ok(EditResponse::with_id(&state, true, Some(id)))
}

/// Move a node or change its task
#[utoipa::path(
    patch,
    path = "/api/v1/canvas/nodes/{id}",
    tag = "canvas",
    params(("id" = String, Path, description = "Node id")),
    request_body = UpdateNodeRequest,
    responses((status = 200, description = "Whether anything changed, and the graph"))
)]
pub async fn update_node(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateNodeRequest>,
) -> Json<EditResponse> {
    let canvas = state.engine.canvas();
    let mut changed = false;

    if req.x.is_some() || req.y.is_some() {
        if let Some(node) = canvas.graph().node(&id) {
            let x = req.x.unwrap_or(node.position.x);
            let y = req.y.unwrap_or(node.position.y);
            changed |= canvas.update_node_position(&id, x, y);
        }
    }
    if let Some(task) = &req.task {
        changed |= canvas.update_node_task(&id, task);
    }
    EditResponse::new(&state, changed)
}

/// Delete a node and its connections
#[utoipa::path(
    delete,
    path = "/api/v1/canvas/nodes/{id}",
    tag = "canvas",
    params(("id" = String, Path, description = "Node id")),
    responses((status = 200, description = "Whether the node existed, and the graph"))
)]
pub async fn remove_node(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Json<EditResponse> {
    let changed = state.engine.canvas().remove_node(&id);
    EditResponse::new(&state, changed)
}

/// Select a node or clear the selection
#[utoipa::path(
    put,
    path = "/api/v1/canvas/selection",
    tag = "canvas",
    request_body = SelectRequest,
    responses((status = 200, description = "Whether the selection changed, and the graph"))
)]
pub async fn select_node(
    State(state): State<SharedState>,
    Json(req): Json<SelectRequest>,
) -> Json<EditResponse> {
    let changed = state.engine.canvas().select_node(req.node_id.as_deref());
    EditResponse::new(&state, changed)
}

/// Connect two nodes
#[utoipa::path(
    post,
    path = "/api/v1/canvas/connections",
    tag = "canvas",
    request_body = ConnectRequest,
    responses((status = 200, description = "The new connection id, if one was created"))
)]
pub async fn add_connection(
    State(state): State<SharedState>,
    Json(req): Json<ConnectRequest>,
) -> Json<EditResponse> {
    let id = state.engine.canvas().add_connection(&req.source, &req.target);
    EditResponse::with_id(&state, id.is_some(), id)
}

/// Delete a connection
#[utoipa::path(
    delete,
    path = "/api/v1/canvas/connections/{id}",
    tag = "canvas",
    params(("id" = String, Path, description = "Connection id")),
    responses((status = 200, description = "Whether the connection existed, and the graph"))
)]
pub async fn remove_connection(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Json<EditResponse> {
    let changed = state.engine.canvas().remove_connection(&id);
    EditResponse::new(&state, changed)
}

/// Begin a two-phase connect gesture
#[utoipa::path(
    post,
    path = "/api/v1/canvas/connecting",
    tag = "canvas",
    request_body = StartConnectingRequest,
    responses((status = 200, description = "Whether the gesture started"))
)]
pub async fn start_connecting(
    State(state): State<SharedState>,
    Json(req): Json<StartConnectingRequest>,
) -> Json<EditResponse> {
    let changed = state.engine.canvas().start_connecting(&req.source);
    EditResponse::new(&state, changed)
}

/// Finish a connect gesture at `target`
#[utoipa::path(
    post,
    path = "/api/v1/canvas/connecting/complete",
    tag = "canvas",
    request_body = CompleteConnectionRequest,
    responses((status = 200, description = "The new connection id, if one was created"))
)]
pub async fn complete_connection(
    State(state): State<SharedState>,
    Json(req): Json<CompleteConnectionRequest>,
) -> Json<EditResponse> {
    let id = state.engine.canvas().complete_connection(&req.target);
    EditResponse::with_id(&state, id.is_some(), id)
}

/// Abandon a connect gesture
#[utoipa::path(
    delete,
    path = "/api/v1/canvas/connecting",
    tag = "canvas",
    responses((status = 200, description = "Whether a gesture was in progress"))
)]
pub async fn cancel_connecting(State(state): State<SharedState>) -> Json<EditResponse> {
    let changed = state.engine.canvas().cancel_connecting();
    EditResponse::new(&state, changed)
}

/// Replace the canvas with a template's nodes
#[utoipa::path(
    post,
    path = "/api/v1/canvas/template",
    tag = "canvas",
    request_body = TemplateRequest,
    responses(
        (status = 200, description = "The loaded graph"),
        (status = 404, description = "Unknown template", body = super::ApiResponse)
    )
)]
pub async fn load_template(
    State(state): State<SharedState>,
    Json(req): Json<TemplateRequest>,
) -> ApiResult<EditResponse> {
    state.engine.canvas().load_template(&req.template_id)?;
    Ok(EditResponse::new(&state, true))
}

/// Topological stage order of the canvas
#[utoipa::path(
    get,
    path = "/api/v1/canvas/stages",
    tag = "canvas",
    responses((status = 200, description = "Ordered stages and nodes left out by cycles"))
)]
pub async fn get_stages(State(state): State<SharedState>) -> Json<Linearization> {
    Json(state.engine.canvas().linearize())
}

/// Start walking the canvas
#[utoipa::path(
    post,
    path = "/api/v1/canvas/execute",
    tag = "canvas",
    responses((status = 200, description = "The walk order", body = ExecuteResponse))
)]
pub async fn execute(State(state): State<SharedState>) -> Json<ExecuteResponse> {
    // The walk task runs detached; completion arrives as ExecutionFinished
    let response = match state.engine.canvas().execute() {
        Some(execution) => ExecuteResponse {
            started: true,
            walk_id: Some(execution.walk_id),
            order: execution.order,
            omitted: execution.omitted,
        },
        None => ExecuteResponse {
            started: false,
            walk_id: None,
            order: Vec::new(),
            omitted: Vec::new(),
        },
    };
    Json(response)
}

/// Stop the active walk
#[utoipa::path(
    post,
    path = "/api/v1/canvas/stop",
    tag = "canvas",
    responses((status = 200, description = "Whether a walk was stopped"))
)]
pub async fn stop(State(state): State<SharedState>) -> Json<EditResponse> {
    let changed = state.engine.canvas().stop_execution();
    EditResponse::new(&state, changed)
}

/// Return every node and connection to Idle
#[utoipa::path(
    post,
    path = "/api/v1/canvas/reset",
    tag = "canvas",
    responses((status = 200, description = "The reset graph"))
)]
pub async fn reset(State(state): State<SharedState>) -> Json<EditResponse> {
    state.engine.canvas().reset_execution();
    EditResponse::new(&state, true)
}

/// Create a draft pipeline from the canvas
#[utoipa::path(
    post,
    path = "/api/v1/canvas/pipeline",
    tag = "canvas",
    responses((status = 200, description = "The draft pipeline and omitted nodes"))
)]
pub async fn to_pipeline(State(state): State<SharedState>) -> Json<CanvasPipeline> {
    Json(state.engine.pipeline_from_canvas())
}

#[cfg(test)]
mod tests {
    use crate::api::tests::{call, test_state};
    use axum::http::StatusCode;
    use serde_json::{json, Value};
    use std::time::Duration;

    async fn add(state: &crate::api::SharedState, agent: &str) -> String {
        let (status, body) = call(
            state,
            "POST",
            "/api/v1/canvas/nodes",
            Some(json!({ "agent_type": agent, "x": 10.0, "y": 20.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_add_and_connect_nodes() {
        let state = test_state();
        let a = add(&state, "researcher").await;
        let b = add(&state, "writer").await;

        let (_, body) = call(
            &state,
            "POST",
            "/api/v1/canvas/connections",
            Some(json!({ "source": a, "target": b })),
        )
        .await;
        assert_eq!(body["changed"], true);
        assert_eq!(body["graph"]["connections"].as_array().unwrap().len(), 1);

        // Duplicate edge is a no-op
        let (_, body) = call(
            &state,
            "POST",
            "/api/v1/canvas/connections",
            Some(json!({ "source": a, "target": b })),
        )
        .await;
        assert_eq!(body["changed"], false);
        assert!(body.get("id").is_none());

        let (_, stages) = call(&state, "GET", "/api/v1/canvas/stages", None).await;
        let order: Vec<&str> = stages["stages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["agentType"].as_str().unwrap())
            .collect();
        assert_eq!(order, vec!["researcher", "writer"]);
    }

    #[tokio::test]
    async fn test_add_unknown_agent_is_422() {
        let state = test_state();
        let (status, body) = call(
            &state,
            "POST",
            "/api/v1/canvas/nodes",
            Some(json!({ "agent_type": "poet" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_update_missing_node_is_noop() {
        let state = test_state();
        let (status, body) = call(
            &state,
            "PATCH",
            "/api/v1/canvas/nodes/ghost",
            Some(json!({ "task": "anything" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["changed"], false);
    }

    #[tokio::test]
    async fn test_two_phase_connect() {
        let state = test_state();
        let a = add(&state, "coder").await;
        let b = add(&state, "reviewer").await;

        call(
            &state,
            "POST",
            "/api/v1/canvas/connecting",
            Some(json!({ "source": a })),
        )
        .await;
        let (_, body) = call(
            &state,
            "POST",
            "/api/v1/canvas/connecting/complete",
            Some(json!({ "target": b })),
        )
        .await;
        assert_eq!(body["changed"], true);
        assert!(body["graph"]["connectingFrom"].is_null());
    }

    #[tokio::test]
    async fn test_unknown_template_is_404() {
        let state = test_state();
        let (status, _) = call(
            &state,
            "POST",
            "/api/v1/canvas/template",
            Some(json!({ "template_id": "nope" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_execute_empty_canvas_does_not_start() {
        let state = test_state();
        let (_, body) = call(&state, "POST", "/api/v1/canvas/execute", None).await;
        assert_eq!(body["started"], false);
    }

    #[tokio::test]
    async fn test_execute_walks_to_completion() {
        let state = test_state();
        let a = add(&state, "researcher").await;
        let b = add(&state, "writer").await;
        call(
            &state,
            "POST",
            "/api/v1/canvas/connections",
            Some(json!({ "source": a, "target": b })),
        )
        .await;

        let (_, body) = call(&state, "POST", "/api/v1/canvas/execute", None).await;
        assert_eq!(body["started"], true);
        assert_eq!(body["order"], json!([a, b]));

        let mut graph = Value::Null;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            graph = call(&state, "GET", "/api/v1/canvas", None).await.1;
            if graph["nodes"][1]["status"] == "completed" {
                break;
            }
        }
        assert_eq!(graph["nodes"][0]["status"], "completed");
        assert_eq!(graph["nodes"][1]["status"], "completed");
        assert_eq!(graph["connections"][0]["status"], "completed");
    }

    #[tokio::test]
    async fn test_canvas_to_pipeline() {
        let state = test_state();
        let (_, body) = call(
            &state,
            "POST",
            "/api/v1/canvas/template",
            Some(json!({ "template_id": "blog-post" })),
        )
        .await;
        assert_eq!(body["changed"], true);

        let (_, created) = call(&state, "POST", "/api/v1/canvas/pipeline", None).await;
        assert_eq!(created["pipeline"]["status"], "draft");
        assert_eq!(created["omitted"], json!([]));
        assert!(!created["pipeline"]["stages"].as_array().unwrap().is_empty());
    }
}
