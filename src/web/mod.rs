use axum::{
    extract::State,
    http::Method,
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::models::CatalogStats;
use crate::services::{ListingService, TagService};

pub mod error;
pub mod models;
pub mod routes;

pub use error::AppError;
use routes::{image_routes, tag_routes};

pub struct AppState {
    pub listing: Arc<ListingService>,
    pub tags: Arc<TagService>,
}

async fn health_check_handler() -> &'static str {
    "OK"
}

async fn stats_handler(State(app_state): State<Arc<AppState>>) -> Result<Json<CatalogStats>, AppError> {
    Ok(Json(app_state.listing.stats().await?))
}

pub fn create_axum_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check_handler))
        .route("/api/stats", get(stats_handler))
        .nest("/api/images", image_routes::create_images_router())
        .nest("/api/tags", tag_routes::create_tags_router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}
