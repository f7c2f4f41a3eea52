//! REST API module for signal-rs
//!
//! Publishing, polling, quota and admin endpoints over axum

pub mod admin;
pub mod auth;
pub mod extract;
pub mod handlers;
pub mod metrics;
pub mod server;

pub use handlers::AppState;
pub use metrics::Metrics;
pub use server::ApiServer;
