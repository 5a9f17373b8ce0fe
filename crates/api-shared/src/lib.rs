//! # API Shared
//!
//! Shared definitions for the Labflow APIs.
//!
//! Contains:
//! - JSON transfer objects with OpenAPI schemas (`dto` module)
//! - `HealthService`
//! - API key validation
//!
//! Used by `api-rest` and the `labflow-run` binary.

pub mod auth;
pub mod dto;
pub mod health;

pub use auth::{validate_api_key, AuthError, API_KEY_HEADER};
pub use dto::*;
pub use health::{HealthRes, HealthService};
