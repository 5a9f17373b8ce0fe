//! Labflow document storage
//!
//! Generated documents (print renderings, PDFs) are binary artefacts attached to a request.
//! They are kept apart from the request record:
//!
//! - documents are stored content-addressed (SHA-256) and never modified once written
//! - storing identical bytes twice yields the same file and metadata path
//! - a request record stays valid when its documents are absent; they can be regenerated
//!
//! ```text
//! requests/
//! └── 55/0e/<request_id>/
//!     ├── request.yaml
//!     └── documents/
//!         └── sha256/
//!             └── ab/cd/
//!                 └── abcd3f9e…
//! ```

mod files;
mod hash;

pub use files::{FileMetadata, FilesService};
pub use hash::Sha256Hash;
pub use labflow_uuid::ShardableUuid;

/// Name of the per-request folder holding generated documents.
pub const DOCUMENTS_FOLDER_NAME: &str = "documents";

/// Errors that can occur during document storage operations
#[derive(Debug, thiserror::Error)]
pub enum FilesError {
    /// Root directory does not exist or is not a directory
    #[error("Invalid root directory: {0}")]
    InvalidRootDirectory(String),

    /// Request directory does not exist
    #[error("Request directory not found: {0}")]
    RequestNotFound(String),

    /// A hash string was not 64 lowercase hex characters
    #[error("Invalid hash: {0}")]
    InvalidHash(String),

    /// No stored document has this hash
    #[error("No document with hash {0}")]
    DocumentNotFound(String),

    /// Stored bytes no longer match their content address
    #[error("Stored document {0} is corrupt")]
    Corrupt(String),

    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
