use axum::{extract::State, Json};
use serde_json::{json, Value};

use mgw_core::domain::Status;

use crate::router::AppState;

pub async fn status(State(state): State<AppState>) -> Json<Status> {
    Json(state.status.status())
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
