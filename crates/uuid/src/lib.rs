//! Request identifiers and sharded-path utilities.
//!
//! Every laboratory test request is identified by a UUID held in a *canonical* form:
//! **32 lowercase hexadecimal characters**, no hyphens (`Uuid::new_v4().simple()`).
//! Externally supplied identifiers (REST paths, CLI arguments, stored records) must already be
//! canonical; anything else is rejected rather than normalised.
//!
//! The file-backed request store keeps each request under a sharded directory:
//! `parent_dir/<u[0..2]>/<u[2..4]>/<u>/`, for example
//! `lab_data/requests/55/0e/550e8400e29b41d4a716446655440000/`.

mod service;

pub use service::{ShardableUuid, Uuid};

/// Error type for UUID operations.
#[derive(Debug, thiserror::Error)]
pub enum UuidError {
    /// Invalid input provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for UUID operations.
pub type UuidResult<T> = Result<T, UuidError>;
