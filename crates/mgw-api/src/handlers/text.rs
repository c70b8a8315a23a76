use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::Deserialize;
use serde_json::Value;

use crate::{router::AppState, ApiError};

#[derive(Debug, Default, Deserialize)]
pub struct SendTextBody {
    pub to: Option<String>,
    pub message: Option<String>,
}

pub async fn send_text(
    State(state): State<AppState>,
    body: Result<Json<SendTextBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    state.dispatcher.send_text(body.to, body.message).await?;
    Ok(super::success())
}
