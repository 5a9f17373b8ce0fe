//! JSON transfer objects for the public API.
//!
//! Domain types stay in `labflow-core`; these are the shapes clients see. Result values keep
//! their untagged form (a JSON number or string), so they are documented as free-form objects.

use labflow_core::{
    Actor, ActorStamp, DocumentFormat, DocumentHandle, DraftPatch, DraftView, InterpretationFlag,
    LabError, LabResult, NewTestRequest, PanelDefinition, ParameterKind, RequestStatus,
    ResultRecord, ResultValue, Severity, TestRequest,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

// ============================================================================
// Actors
// ============================================================================

/// Person performing an action. Technicians must also give a license number.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ActorDto {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_number: Option<String>,
}

impl From<ActorDto> for Actor {
    fn from(dto: ActorDto) -> Self {
        Actor::new(dto.name, dto.license_number.unwrap_or_default())
    }
}

impl From<&ActorStamp> for ActorDto {
    fn from(stamp: &ActorStamp) -> Self {
        Self {
            name: stamp.name.as_str().to_string(),
            license_number: stamp.license_number.as_ref().map(|l| l.as_str().to_string()),
        }
    }
}

/// Body of the receive, finalize and release actions.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ActionReq {
    pub actor: ActorDto,
}

// ============================================================================
// Panels
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ParameterDto {
    pub key: String,
    pub label: String,
    pub unit: Option<String>,
    pub required: bool,
    pub step: Option<f64>,
    /// `numeric` or `qualitative`
    pub kind: String,
    pub low: Option<f64>,
    pub high: Option<f64>,
    pub critical_low: Option<f64>,
    pub critical_high: Option<f64>,
    pub allowed: Vec<String>,
    pub abnormal: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PanelDto {
    pub panel_id: String,
    pub title: String,
    pub parameters: Vec<ParameterDto>,
}

impl From<&PanelDefinition> for PanelDto {
    fn from(panel: &PanelDefinition) -> Self {
        let parameters = panel
            .parameters
            .iter()
            .map(|spec| {
                let mut dto = ParameterDto {
                    key: spec.key.clone(),
                    label: spec.label.as_str().to_string(),
                    unit: spec.unit.clone(),
                    required: spec.required,
                    step: spec.step,
                    kind: String::new(),
                    low: None,
                    high: None,
                    critical_low: None,
                    critical_high: None,
                    allowed: Vec::new(),
                    abnormal: Vec::new(),
                };
                match &spec.kind {
                    ParameterKind::Numeric(range) => {
                        dto.kind = "numeric".into();
                        dto.low = range.low;
                        dto.high = range.high;
                        dto.critical_low = range.critical_low;
                        dto.critical_high = range.critical_high;
                    }
                    ParameterKind::Qualitative(domain) => {
                        dto.kind = "qualitative".into();
                        dto.allowed = domain.allowed.clone();
                        dto.abnormal = domain.abnormal.clone();
                    }
                }
                dto
            })
            .collect();

        Self {
            panel_id: panel.panel_id.as_str().to_string(),
            title: panel.title.as_str().to_string(),
            parameters,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ListPanelsRes {
    pub panels: Vec<PanelDto>,
}

// ============================================================================
// Requests
// ============================================================================

/// New request from order entry.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateRequestReq {
    pub patient_id: String,
    #[serde(default)]
    pub encounter_id: Option<String>,
    pub panel_id: String,
    /// `requested` (default) or `verified`
    #[serde(default)]
    pub status: Option<String>,
    pub requested_by: ActorDto,
}

impl CreateRequestReq {
    /// # Errors
    ///
    /// Returns [`LabError::InvalidInput`] for an unknown status name.
    pub fn into_new_request(self) -> LabResult<NewTestRequest> {
        let status = match self.status.as_deref().map(str::trim) {
            None | Some("") => RequestStatus::Requested,
            Some(name) => name
                .parse::<RequestStatus>()
                .map_err(|e| LabError::InvalidInput(e.to_string()))?,
        };
        Ok(NewTestRequest {
            patient_id: self.patient_id,
            encounter_id: self.encounter_id,
            panel_id: self.panel_id,
            status,
            requested_by: self.requested_by.into(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FlagDto {
    pub key: String,
    #[schema(value_type = Object)]
    pub value: ResultValue,
    /// `normal`, `low`, `high` or `abnormal`
    pub tier: String,
    /// `normal`, `attention` or `critical`
    pub severity: String,
}

impl From<&InterpretationFlag> for FlagDto {
    fn from(flag: &InterpretationFlag) -> Self {
        Self {
            key: flag.key.clone(),
            value: flag.value.clone(),
            tier: flag.tier.as_str().to_string(),
            severity: severity_name(flag.severity).to_string(),
        }
    }
}

fn severity_name(severity: Severity) -> &'static str {
    match severity {
        Severity::Normal => "normal",
        Severity::Attention => "attention",
        Severity::Critical => "critical",
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ResultDto {
    #[schema(value_type = Object)]
    pub values: BTreeMap<String, ResultValue>,
    pub flags: Vec<FlagDto>,
    pub remarks: Option<String>,
}

impl From<&ResultRecord> for ResultDto {
    fn from(result: &ResultRecord) -> Self {
        Self {
            values: result.values.clone(),
            flags: result.flags.iter().map(FlagDto::from).collect(),
            remarks: result.remarks.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RequestDto {
    pub request_id: String,
    pub patient_id: String,
    pub encounter_id: Option<String>,
    pub panel_id: String,
    pub status: String,
    pub created_at: String,
    pub received_at: Option<String>,
    pub finalized_at: Option<String>,
    pub released_at: Option<String>,
    pub requested_by: ActorDto,
    pub received_by: Option<ActorDto>,
    pub finalized_by: Option<ActorDto>,
    pub released_by: Option<ActorDto>,
    pub result: Option<ResultDto>,
}

impl From<&TestRequest> for RequestDto {
    fn from(request: &TestRequest) -> Self {
        let ts = &request.timestamps;
        let actors = &request.actors;
        Self {
            request_id: request.request_id.to_string(),
            patient_id: request.patient_id.as_str().to_string(),
            encounter_id: request.encounter_id.as_ref().map(|e| e.as_str().to_string()),
            panel_id: request.panel_id.as_str().to_string(),
            status: request.status.as_str().to_string(),
            created_at: ts.created_at.to_rfc3339(),
            received_at: ts.received_at.map(|t| t.to_rfc3339()),
            finalized_at: ts.finalized_at.map(|t| t.to_rfc3339()),
            released_at: ts.released_at.map(|t| t.to_rfc3339()),
            requested_by: ActorDto::from(&actors.requested_by),
            received_by: actors.received_by.as_ref().map(ActorDto::from),
            finalized_by: actors.finalized_by.as_ref().map(ActorDto::from),
            released_by: actors.released_by.as_ref().map(ActorDto::from),
            result: request.result.as_ref().map(ResultDto::from),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ListRequestsRes {
    pub requests: Vec<RequestDto>,
}

// ============================================================================
// Drafts
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DraftDto {
    pub request_id: String,
    pub panel_id: String,
    pub owner: Option<ActorDto>,
    /// Every panel parameter; `null` where nothing has been entered.
    #[schema(value_type = Object)]
    pub values: BTreeMap<String, Option<ResultValue>>,
    pub remarks: Option<String>,
    /// `clean` or `dirty`
    pub state: String,
    pub updated_at: Option<String>,
    /// Live interpretation of the entered values.
    pub flags: Vec<FlagDto>,
}

impl From<&DraftView> for DraftDto {
    fn from(view: &DraftView) -> Self {
        let draft = &view.draft;
        Self {
            request_id: draft.request_id.to_string(),
            panel_id: draft.panel_id.as_str().to_string(),
            owner: draft.owner.as_ref().map(ActorDto::from),
            values: draft.values.clone(),
            remarks: draft.remarks.clone(),
            state: match draft.state {
                labflow_core::DraftState::Clean => "clean".into(),
                labflow_core::DraftState::Dirty => "dirty".into(),
            },
            updated_at: draft.updated_at.map(|t| t.to_rfc3339()),
            flags: view.flags.iter().map(FlagDto::from).collect(),
        }
    }
}

/// Partial draft update. A `null` or blank value clears the slot.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct SaveDraftReq {
    pub actor: ActorDto,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub values: BTreeMap<String, Option<ResultValue>>,
    #[serde(default)]
    pub remarks: Option<String>,
}

impl SaveDraftReq {
    pub fn into_parts(self) -> (Actor, DraftPatch) {
        let patch = DraftPatch {
            values: self.values,
            remarks: self.remarks,
        };
        (self.actor.into(), patch)
    }
}

// ============================================================================
// Documents
// ============================================================================

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct DocumentReq {
    /// `print` or `pdf`
    pub format: String,
}

impl DocumentReq {
    /// # Errors
    ///
    /// Returns [`LabError::InvalidInput`] for an unknown format.
    pub fn format(&self) -> LabResult<DocumentFormat> {
        self.format.parse()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DocumentRes {
    pub request_id: String,
    pub format: String,
    pub name: String,
    pub hash: String,
    /// Location relative to the request directory.
    pub relative_path: String,
    pub size_bytes: u64,
    pub media_type: Option<String>,
    pub stored_at: String,
}

impl From<&DocumentHandle> for DocumentRes {
    fn from(handle: &DocumentHandle) -> Self {
        let file = &handle.file;
        Self {
            request_id: handle.request_id.to_string(),
            format: handle.format.as_str().to_string(),
            name: file.name.as_str().to_string(),
            hash: file.hash.as_str().to_string(),
            relative_path: file.relative_path.as_str().to_string(),
            size_bytes: file.size_bytes,
            media_type: file.media_type.as_ref().map(|m| m.as_str().to_string()),
            stored_at: file.stored_at.to_rfc3339(),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Error body returned with every non-2xx response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    /// Mandatory fields blocking finalization.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
}

impl ErrorBody {
    pub fn message(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            missing: Vec::new(),
        }
    }
}

impl From<&LabError> for ErrorBody {
    fn from(err: &LabError) -> Self {
        let missing = match err {
            LabError::ValidationFailed(fields) => {
                fields.iter().map(|f| f.as_key().to_string()).collect()
            }
            _ => Vec::new(),
        };
        Self {
            error: err.to_string(),
            missing,
        }
    }
}
