//! Axum HTTP API for the montage job service.
//!
//! This crate provides:
//! - Multipart job submission, status polling and result download
//! - Optional shared API key authentication
//! - Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
