//! On-disk wire models for the laboratory request store.
//!
//! This crate provides **domain-level carriers** and **strict YAML wire models** for the files
//! the core reads and writes:
//! - panel definitions (`panels/*.yaml`, loaded once at startup)
//! - test request records (`request.yaml`, one per request)
//! - result drafts (`draft.yaml`, one per request while encoding)
//!
//! Every wire struct is `#[serde(deny_unknown_fields)]`; schema mismatches are reported with
//! the YAML path of the offending field (via `serde_path_to_error`). Structural invariants
//! (unique parameter keys, sane reference ranges, status/timestamp consistency) are checked
//! while translating wire to domain, so a value of a domain type is always well-formed.

pub mod draft;
pub mod panel;
pub mod request;
pub mod result;

pub use draft::{DraftRecord, DraftState, ResultDraft};
pub use panel::{
    NumericRange, Panel, PanelDefinition, ParameterKind, ParameterSpec, QualitativeDomain,
};
pub use request::{
    ActorStamp, RequestActors, RequestRecord, RequestStatus, RequestTimestamps, TestRequest,
};
pub use result::{FlagTier, InterpretationFlag, ResultRecord, ResultValue, Severity};

pub use labflow_types::{LicenseNumber, NonEmptyText};
pub use labflow_uuid::ShardableUuid;

/// Errors returned by the `labflow-wire` crate.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid YAML: {0}")]
    InvalidYaml(#[from] serde_yaml::Error),

    #[error("translation error: {0}")]
    Translation(String),

    #[error("invalid UUID: {0}")]
    InvalidUuid(String),

    #[error("invalid panel definition: {0}")]
    InvalidPanel(String),

    #[error("inconsistent record: {0}")]
    InconsistentRecord(String),
}

/// Type alias for Results that can fail with a [`WireError`].
pub type WireResult<T> = Result<T, WireError>;

/// Deserialises `yaml_text` into `T`, reporting schema mismatches with the failing field path.
pub(crate) fn parse_yaml<T>(yaml_text: &str, what: &str) -> WireResult<T>
where
    T: serde::de::DeserializeOwned,
{
    let deserializer = serde_yaml::Deserializer::from_str(yaml_text);
    serde_path_to_error::deserialize::<_, T>(deserializer).map_err(|err| {
        let path = err.path().to_string();
        let source = err.into_inner();
        let path = if path.is_empty() || path == "." {
            "<root>".to_string()
        } else {
            path
        };
        WireError::Translation(format!("{what} schema mismatch at {path}: {source}"))
    })
}

pub(crate) fn parse_request_id(value: &str, field: &str) -> WireResult<ShardableUuid> {
    ShardableUuid::parse(value)
        .map_err(|_| WireError::InvalidUuid(format!("Invalid UUID in {field}: {value}")))
}
