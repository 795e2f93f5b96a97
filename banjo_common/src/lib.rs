//! Shared utilities for the Banjo compiler
//!
//! This crate provides the common types used across all compiler crates:
//! source position tracking, diagnostic reports, and error handling.

pub mod error;
pub mod reports;
pub mod span;

pub use error::{BanjoError, BanjoResult};
pub use reports::{Report, Reports, Severity};
pub use span::{Position, Span};
