//! Endpoint handlers, one module per concern.

use axum::Json;
use serde_json::{json, Value};

pub mod media;
pub mod status;
pub mod text;
pub mod webhook;

pub(crate) fn success() -> Json<Value> {
    Json(json!({ "success": true }))
}
