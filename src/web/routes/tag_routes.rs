use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use std::sync::Arc;

use crate::models::{Tag, TagWithCount};
use crate::web::models::{PopularTagsQuery, DEFAULT_POPULAR_LIMIT};
use crate::web::{AppError, AppState};

async fn list_tags_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<Vec<TagWithCount>>, AppError> {
    Ok(Json(app_state.tags.list_tags().await?))
}

async fn popular_tags_handler(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<PopularTagsQuery>,
) -> Result<Json<Vec<TagWithCount>>, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_POPULAR_LIMIT);
    Ok(Json(app_state.tags.popular_tags(limit).await?))
}

async fn predefined_tags_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<Vec<Tag>>, AppError> {
    Ok(Json(app_state.tags.list_predefined().await?))
}

async fn delete_tag_handler(
    State(app_state): State<Arc<AppState>>,
    Path(tag_id): Path<i64>,
) -> Result<StatusCode, AppError> {
    app_state.tags.delete_tag(tag_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Router ---

pub fn create_tags_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_tags_handler))
        .route("/popular", get(popular_tags_handler))
        .route("/predefined", get(predefined_tags_handler))
        .route("/{tag_id}", delete(delete_tag_handler))
}
