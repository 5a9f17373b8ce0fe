//! Constants used throughout the labflow core crate.
//!
//! This module contains all path and filename constants to ensure
//! consistency across the codebase and make maintenance easier.

use std::time::Duration;

/// Directory name for test request storage, under the data directory.
pub const REQUESTS_DIR_NAME: &str = "requests";

/// Default directory for laboratory data when no explicit directory is configured.
pub const DEFAULT_DATA_DIR: &str = "lab_data";

/// Directory holding the panel definitions shipped with this crate.
pub const BUNDLED_PANEL_DIR: &str = "crates/core/panels";

/// Filename for the authoritative request record.
pub const REQUEST_FILENAME: &str = "request.yaml";

/// Filename for the working result draft.
pub const DRAFT_FILENAME: &str = "draft.yaml";

/// Default upper bound on publishing a released request to downstream sinks.
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Default upper bound on a single document generation attempt.
pub const DEFAULT_DOCUMENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Retries after the first document generation attempt.
pub const DEFAULT_DOCUMENT_RETRIES: usize = 2;

/// Capacity of the release notification channel. Slow subscribers lag rather than block.
pub const RELEASE_CHANNEL_CAPACITY: usize = 256;
