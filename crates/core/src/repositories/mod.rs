//! Request persistence.
//!
//! The lifecycle and draft store only talk to [`RequestRepository`]. Two implementations ship:
//! a sharded YAML file store for deployments and an in-memory store for tests and demos.
//!
//! Implementations must make each write durable before returning `Ok`; the lifecycle treats a
//! successful `replace` as the commit point of a transition.

pub mod file;
pub mod memory;

use crate::{LabError, LabResult};
use labflow_uuid::ShardableUuid;
use labflow_wire::{RequestStatus, ResultDraft, TestRequest};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use file::FileRequestRepository;
pub use memory::MemoryRequestRepository;

/// Downstream query filter over request status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    /// `requested`, `verified`, `registered` or `in-progress`
    Active,
    Completed,
    Final,
    #[default]
    All,
}

impl StatusFilter {
    pub fn matches(self, status: RequestStatus) -> bool {
        match self {
            StatusFilter::Active => status.is_active(),
            StatusFilter::Completed => status == RequestStatus::Completed,
            StatusFilter::Final => status == RequestStatus::Final,
            StatusFilter::All => true,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StatusFilter::Active => "active",
            StatusFilter::Completed => "completed",
            StatusFilter::Final => "final",
            StatusFilter::All => "all",
        }
    }
}

impl fmt::Display for StatusFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusFilter {
    type Err = LabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(StatusFilter::Active),
            "completed" => Ok(StatusFilter::Completed),
            "final" => Ok(StatusFilter::Final),
            "all" | "" => Ok(StatusFilter::All),
            other => Err(LabError::InvalidInput(format!(
                "unknown status filter '{other}' (expected active, completed, final or all)"
            ))),
        }
    }
}

/// Storage for request records and their working drafts.
pub trait RequestRepository: Send + Sync {
    /// Stores a new request.
    ///
    /// # Errors
    ///
    /// Returns [`LabError::InvalidInput`] if a request with the same id already exists.
    fn insert(&self, request: &TestRequest) -> LabResult<()>;

    /// # Errors
    ///
    /// Returns [`LabError::NotFound`] for an unknown id.
    fn get(&self, request_id: &ShardableUuid) -> LabResult<TestRequest>;

    /// Replaces an existing request record as a whole.
    ///
    /// # Errors
    ///
    /// Returns [`LabError::NotFound`] for an unknown id.
    fn replace(&self, request: &TestRequest) -> LabResult<()>;

    /// Requests matching `filter`, oldest first.
    fn list(&self, filter: StatusFilter) -> LabResult<Vec<TestRequest>>;

    fn load_draft(&self, request_id: &ShardableUuid) -> LabResult<Option<ResultDraft>>;

    fn store_draft(&self, draft: &ResultDraft) -> LabResult<()>;

    /// Removes the draft if present; removing an absent draft is not an error.
    fn remove_draft(&self, request_id: &ShardableUuid) -> LabResult<()>;
}

/// Orders listings by creation time, then id, so listings are stable across stores.
pub(crate) fn sort_requests(requests: &mut [TestRequest]) {
    requests.sort_by(|a, b| {
        a.timestamps
            .created_at
            .cmp(&b.timestamps.created_at)
            .then_with(|| a.request_id.cmp(&b.request_id))
    });
}
