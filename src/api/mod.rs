use axum::Json;
use axum::extract::{Path, Query};
use axum::routing::post;
use axum::{Router, extract::State, http::StatusCode, routing::get};
use serde::Deserialize;

use crate::error::AppError;
use crate::models::{Course, CourseSummary};
use crate::services::ReconcileStats;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
struct ActorParams {
    #[serde(default)]
    actor: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/courses", get(list_courses))
        .route(
            "/courses/{id}",
            get(get_course).put(save_course).delete(delete_course),
        )
        .route("/courses/{id}/published", get(get_published_course))
        .route("/courses/{id}/publish", post(publish_course))
        .route("/registry/reconcile", post(reconcile_now))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    sqlx::query("select 1")
        .execute(state.storage.registry().pool())
        .await?;
    Ok(StatusCode::OK)
}

async fn list_courses(State(state): State<AppState>) -> Json<Vec<CourseSummary>> {
    Json(state.storage.list_courses().await)
}

async fn get_course(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Course>, AppError> {
    let course = state.storage.get_course(&id).await.ok_or(AppError::NotFound)?;
    Ok(Json(course))
}

async fn get_published_course(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Course>, AppError> {
    let course = state
        .storage
        .get_published_course(&id)
        .await
        .ok_or(AppError::NotFound)?;
    Ok(Json(course))
}

async fn save_course(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ActorParams>,
    Json(course): Json<Course>,
) -> Result<StatusCode, AppError> {
    if course.title.trim().is_empty() {
        return Err(AppError::BadRequest("title must not be empty".to_string()));
    }
    if state
        .storage
        .save_course_as(&id, &course, params.actor.as_deref())
        .await
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::StorageUnavailable(format!("course {} could not be saved", id)))
    }
}

async fn publish_course(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ActorParams>,
) -> Result<StatusCode, AppError> {
    if state.storage.publish_course(&id, params.actor.as_deref()).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound)
    }
}

async fn delete_course(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.storage.delete_course(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::StorageUnavailable(format!("course {} could not be deleted", id)))
    }
}

async fn reconcile_now(State(state): State<AppState>) -> Result<Json<ReconcileStats>, AppError> {
    let stats = state.reconciler.reconcile_all().await?;
    Ok(Json(stats))
}
