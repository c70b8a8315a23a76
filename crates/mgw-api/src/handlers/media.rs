use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    Json,
};
use serde_json::Value;

use crate::{
    router::AppState,
    upload::{read_form, UploadForm},
    ApiError,
};

async fn form(
    state: &AppState,
    multipart: Result<Multipart, MultipartRejection>,
    file_field: &str,
) -> Result<UploadForm, ApiError> {
    let multipart = multipart.map_err(|e| ApiError::bad_request(e.body_text()))?;
    read_form(multipart, &state.upload_dir, file_field).await
}

/// `to`, `caption?`, `image`.
pub async fn send_image(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Value>, ApiError> {
    let mut form = form(&state, multipart, "image").await?;
    let file = form.file.take();
    state
        .dispatcher
        .send_image(form.text("to"), form.text("caption"), file)
        .await?;
    Ok(super::success())
}

/// `to`, `audio`.
pub async fn send_audio(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Value>, ApiError> {
    let mut form = form(&state, multipart, "audio").await?;
    let file = form.file.take();
    state.dispatcher.send_audio(form.text("to"), file).await?;
    Ok(super::success())
}

/// `to`, `filename?`, `caption?`, `file`.
pub async fn send_file(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Value>, ApiError> {
    let mut form = form(&state, multipart, "file").await?;
    let file = form.file.take();
    state
        .dispatcher
        .send_file(form.text("to"), form.text("filename"), form.text("caption"), file)
        .await?;
    Ok(super::success())
}
