use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{router::AppState, ApiError};

#[derive(Debug, Default, Deserialize)]
pub struct SetWebhookBody {
    pub url: Option<String>,
}

pub async fn set_webhook(
    State(state): State<AppState>,
    body: Result<Json<SetWebhookBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let url = body
        .url
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::bad_request("url is required"))?;

    state.webhook.set(url.clone());
    tracing::info!(url = %url, "webhook updated");
    Ok(Json(json!({ "success": true, "webhookUrl": url })))
}

pub async fn get_webhook(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "webhookUrl": state.webhook.get() }))
}
