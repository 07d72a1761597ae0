//! # HookRelay Common Library
//!
//! Shared utilities and infrastructure code used by all HookRelay services.
//!
//! This crate provides:
//! - Database connection pooling (SQLite via sqlx)
//! - Custom error types
//! - Structured logging setup

// Module declarations
pub mod db;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use db::{create_pool, health_check};
pub use error::{Error, Result};
pub use logging::{init_tracing, init_tracing_json};
