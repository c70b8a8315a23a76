//! Core domain + application logic for the messaging gateway.
//!
//! This crate is transport-agnostic. The external messaging network
//! and the HTTP control surface live behind ports (traits) implemented in adapter
//! crates.

pub mod auth;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod link;
pub mod logging;
pub mod relay;
pub mod retry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod upload;
pub mod webhook;

pub use errors::{Error, Result};
