//! Lexflow API Library
//!
//! This crate contains the HTTP API server components for Lexflow.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
