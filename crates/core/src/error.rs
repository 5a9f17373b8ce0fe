use labflow_uuid::ShardableUuid;
use labflow_wire::RequestStatus;
use serde::Serialize;
use std::fmt;

/// A mandatory field that blocks finalization.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MissingField {
    /// A required panel parameter, by key.
    Parameter(String),
    TechnicianName,
    TechnicianLicense,
}

impl MissingField {
    /// Field name as reported to callers: the parameter key, `technician_name` or
    /// `technician_license`.
    pub fn as_key(&self) -> &str {
        match self {
            MissingField::Parameter(key) => key,
            MissingField::TechnicianName => "technician_name",
            MissingField::TechnicianLicense => "technician_license",
        }
    }
}

impl fmt::Display for MissingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_key())
    }
}

impl Serialize for MissingField {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_key())
    }
}

fn join_missing(fields: &[MissingField]) -> String {
    fields
        .iter()
        .map(MissingField::as_key)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, thiserror::Error)]
pub enum LabError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("cannot {action} request {request_id} in status '{from}'")]
    IllegalTransition {
        request_id: ShardableUuid,
        from: RequestStatus,
        action: &'static str,
    },
    #[error("validation failed, missing: {}", join_missing(.0))]
    ValidationFailed(Vec<MissingField>),
    #[error("draft for request {request_id} is being encoded by {owner}")]
    DraftClaimed {
        request_id: ShardableUuid,
        owner: String,
    },
    #[error("document unavailable: {0}")]
    DocumentUnavailable(String),
    #[error("publish failed: {0}")]
    PublishFailed(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("panel catalog error: {0}")]
    Catalog(String),
    #[error("request store unavailable: {0}")]
    Unavailable(String),
    #[error("failed to create storage directory: {0}")]
    StorageDirCreation(std::io::Error),
    #[error("failed to write request file: {0}")]
    FileWrite(std::io::Error),
    #[error("failed to read request file: {0}")]
    FileRead(std::io::Error),
    #[error("wire format error: {0}")]
    Wire(#[from] labflow_wire::WireError),
    #[error("document storage error: {0}")]
    Files(#[from] labflow_files::FilesError),
}

impl LabError {
    pub(crate) fn request_not_found(request_id: &ShardableUuid) -> Self {
        LabError::NotFound {
            kind: "request",
            id: request_id.to_string(),
        }
    }
}

pub type LabResult<T> = std::result::Result<T, LabError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_render_as_keys() {
        let err = LabError::ValidationFailed(vec![
            MissingField::Parameter("hemoglobin".into()),
            MissingField::TechnicianName,
        ]);
        assert_eq!(
            err.to_string(),
            "validation failed, missing: hemoglobin, technician_name"
        );
        assert_eq!(
            serde_json::to_string(&MissingField::TechnicianLicense).unwrap(),
            "\"technician_license\""
        );
    }

    #[test]
    fn illegal_transition_names_the_action_and_status() {
        let id = ShardableUuid::new();
        let err = LabError::IllegalTransition {
            request_id: id,
            from: RequestStatus::Registered,
            action: "receive specimen",
        };
        assert_eq!(
            err.to_string(),
            format!("cannot receive specimen request {id} in status 'registered'")
        );
    }
}
