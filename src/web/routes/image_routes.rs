use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

use crate::models::{CreateImageRequest, Image, UpdateImageRequest, MAX_FILE_SIZE};
use crate::query::ImageListResponse;
use crate::web::models::{
    split_tag_list, ImageUrlQuery, ImageUrlResponse, ListImagesQuery, DEFAULT_URL_EXPIRY_SECS,
};
use crate::web::{AppError, AppState};

// Room for the non-file multipart fields on top of the largest accepted image.
const UPLOAD_BODY_LIMIT: usize = MAX_FILE_SIZE as usize + 64 * 1024;

async fn list_images_handler(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<ListImagesQuery>,
) -> Result<Json<ImageListResponse>, AppError> {
    let response = app_state.listing.list_images(&query.into_request()).await?;
    Ok(Json(response))
}

async fn get_image_handler(
    State(app_state): State<Arc<AppState>>,
    Path(image_id): Path<i64>,
) -> Result<Json<Image>, AppError> {
    Ok(Json(app_state.listing.get_image(image_id).await?))
}

fn parse_dimension(field: &str, text: &str) -> Result<Option<i32>, AppError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    text.parse::<i32>()
        .map(Some)
        .map_err(|_| AppError::InvalidInput(format!("{field} must be an integer, got '{text}'")))
}

async fn upload_image_handler(
    State(app_state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Image>), AppError> {
    let mut file: Option<(String, String, Bytes)> = None;
    let mut tags = Vec::new();
    let mut metadata = None;
    let mut width = None;
    let mut height = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let original_filename = field.file_name().unwrap_or_default().to_string();
                let content_type = match field.content_type() {
                    Some(ct) if ct != "application/octet-stream" => ct.to_string(),
                    _ => mime_guess::from_path(&original_filename)
                        .first_or_octet_stream()
                        .essence_str()
                        .to_string(),
                };
                let data = field.bytes().await?;
                file = Some((original_filename, content_type, data));
            }
            "tags" => tags = split_tag_list(&field.text().await?),
            "metadata" => {
                let text = field.text().await?;
                if !text.trim().is_empty() {
                    metadata = Some(text);
                }
            }
            "width" => width = parse_dimension("width", &field.text().await?)?,
            "height" => height = parse_dimension("height", &field.text().await?)?,
            _ => {}
        }
    }

    let (original_filename, content_type, data) =
        file.ok_or_else(|| AppError::InvalidInput("Missing 'file' field".to_string()))?;
    let request = CreateImageRequest {
        original_filename,
        content_type,
        file_size: data.len() as i64,
        width,
        height,
        tags,
        metadata,
    };
    let image = app_state.listing.create_image(request, data).await?;
    Ok((StatusCode::CREATED, Json(image)))
}

async fn update_image_handler(
    State(app_state): State<Arc<AppState>>,
    Path(image_id): Path<i64>,
    Json(payload): Json<UpdateImageRequest>,
) -> Result<Json<Image>, AppError> {
    Ok(Json(app_state.listing.update_image(image_id, payload).await?))
}

async fn delete_image_handler(
    State(app_state): State<Arc<AppState>>,
    Path(image_id): Path<i64>,
) -> Result<StatusCode, AppError> {
    app_state.listing.delete_image(image_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn image_url_handler(
    State(app_state): State<Arc<AppState>>,
    Path(image_id): Path<i64>,
    Query(query): Query<ImageUrlQuery>,
) -> Result<Json<ImageUrlResponse>, AppError> {
    let expires_in_secs = query.expiry_secs.unwrap_or(DEFAULT_URL_EXPIRY_SECS);
    let url = app_state
        .listing
        .image_url(image_id, Duration::from_secs(expires_in_secs))
        .await?;
    Ok(Json(ImageUrlResponse { url, expires_in_secs }))
}

async fn image_file_handler(
    State(app_state): State<Arc<AppState>>,
    Path(image_id): Path<i64>,
) -> Result<Response, AppError> {
    let (image, stream) = app_state.listing.open_image_file(image_id).await?;
    let headers = [
        (header::CONTENT_TYPE, image.content_type),
        (header::CONTENT_LENGTH, image.file_size.to_string()),
    ];
    Ok((headers, Body::from_stream(stream)).into_response())
}

// --- Router ---

pub fn create_images_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_images_handler).post(upload_image_handler))
        .route(
            "/{image_id}",
            get(get_image_handler)
                .put(update_image_handler)
                .delete(delete_image_handler),
        )
        .route("/{image_id}/url", get(image_url_handler))
        .route("/{image_id}/file", get(image_file_handler))
        .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT))
}
