//! Lexflow Shared Types and Utilities
//!
//! This crate contains types and utilities shared across the Lexflow platform.

pub mod db;
pub mod types;

pub use db::*;
pub use types::*;
