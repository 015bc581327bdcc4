//! REST endpoints of the control surface.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;

use super::plane::ControlPlane;
use crate::client::CourseId;
use crate::config::AppConfig;
use crate::error::ControlError;

/// Build the control router.
pub fn control_routes(plane: Arc<ControlPlane>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/run-program", post(run_program))
        .route("/stop-program", post(stop_program))
        .route("/program-status", get(program_status))
        .route("/task-progress", get(task_progress))
        .route("/user-course-progress", get(user_course_progress))
        .route("/get-config", get(get_config))
        .route("/save-config", post(save_config))
        .route("/course/{id}", get(course_by_id))
        .route("/course/name/{name}", get(courses_by_name))
        .layer(CorsLayer::permissive())
        .with_state(plane)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "course-pilot"
    }))
}

async fn run_program(
    State(plane): State<Arc<ControlPlane>>,
) -> Result<impl IntoResponse, ControlError> {
    plane.start_run().await?;
    Ok(Json(serde_json::json!({ "success": "Run started" })))
}

async fn stop_program(
    State(plane): State<Arc<ControlPlane>>,
) -> Result<impl IntoResponse, ControlError> {
    plane.stop_run()?;
    Ok(Json(serde_json::json!({ "success": "Stop requested" })))
}

async fn program_status(State(plane): State<Arc<ControlPlane>>) -> impl IntoResponse {
    Json(serde_json::json!({ "is_running": plane.is_running() }))
}

async fn task_progress(State(plane): State<Arc<ControlPlane>>) -> impl IntoResponse {
    Json(plane.progress())
}

async fn user_course_progress(State(plane): State<Arc<ControlPlane>>) -> impl IntoResponse {
    Json(plane.course_progress())
}

async fn get_config(State(plane): State<Arc<ControlPlane>>) -> impl IntoResponse {
    Json(plane.config_view().await)
}

async fn save_config(
    State(plane): State<Arc<ControlPlane>>,
    body: Result<Json<AppConfig>, JsonRejection>,
) -> Result<impl IntoResponse, ControlError> {
    let Json(config) = body.map_err(|e| ControlError::InvalidRequest(e.body_text()))?;
    plane.save_config(config).await?;
    Ok(Json(serde_json::json!({ "success": "Configuration saved" })))
}

async fn course_by_id(
    State(plane): State<Arc<ControlPlane>>,
    Path(id): Path<CourseId>,
) -> Result<impl IntoResponse, ControlError> {
    Ok(Json(plane.find_course(id).await?))
}

async fn courses_by_name(
    State(plane): State<Arc<ControlPlane>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ControlError> {
    Ok(Json(plane.find_courses_by_name(&name).await?))
}
