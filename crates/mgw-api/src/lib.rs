//! HTTP control surface for the gateway.
//!
//! Thin axum layer: request decoding and multipart uploads live here, every
//! decision about sends and state lives in `mgw-core`.

pub mod error;
pub mod handlers;
pub mod router;
mod upload;

pub use error::ApiError;
pub use router::{router, serve, AppState, StatusProvider};
