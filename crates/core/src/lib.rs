//! # Labflow Core
//!
//! Core business logic for the laboratory request lifecycle.
//!
//! This crate owns the request state machine and everything it depends on:
//! - the panel catalog (parameter schemas, reference ranges)
//! - durable, single-writer result drafts
//! - result interpretation and the finalization completeness gate
//! - request persistence (sharded YAML files, or in memory)
//! - the release gateway (released view, subscriptions, document requests)
//!
//! **No API concerns**: authentication and HTTP servers belong in `api-rest` and `api-shared`.

pub mod actor;
pub mod catalog;
pub mod config;
pub mod constants;
pub mod documents;
pub mod drafts;
pub mod error;
pub mod interpretation;
pub mod lifecycle;
pub mod locks;
pub mod release;
pub mod repositories;
pub mod retry;

#[cfg(test)]
pub(crate) mod test_support;

pub use actor::Actor;
pub use catalog::PanelCatalog;
pub use config::CoreConfig;
pub use documents::{
    DocumentFormat, DocumentGenerator, GeneratedDocument, GeneratorError, HttpDocumentGenerator,
    PlainTextGenerator,
};
pub use drafts::{DraftPatch, DraftStore};
pub use error::{LabError, LabResult, MissingField};
pub use interpretation::{check_completeness, interpret};
pub use lifecycle::{DraftView, LabService, NewTestRequest};
pub use release::{DocumentHandle, ReleaseGateway, ReleaseSink};
pub use repositories::{
    FileRequestRepository, MemoryRequestRepository, RequestRepository, StatusFilter,
};
pub use retry::RetryPolicy;

pub use labflow_files::{FileMetadata, Sha256Hash};
pub use labflow_types::{LicenseNumber, NonEmptyText};
pub use labflow_uuid::ShardableUuid;
pub use labflow_wire::{
    ActorStamp, DraftState, FlagTier, InterpretationFlag, PanelDefinition, ParameterKind,
    ParameterSpec, RequestStatus, ResultDraft, ResultRecord, ResultValue, Severity, TestRequest,
};
