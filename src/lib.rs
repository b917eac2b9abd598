//! User Management Backend Library
//!
//! Exposes the auth pipeline, storage and HTTP router for the binary and
//! the integration tests.

pub mod activity;
pub mod api;
pub mod auth;
pub mod config;
pub mod middleware;
pub mod models;
pub mod store;

pub use api::{router, AppState};
pub use config::Config;
