//! Result draft wire model.
//!
//! A draft is the working copy of a request's result payload while a technician is encoding.
//! It lives in `draft.yaml` next to the request record and is rewritten on every save.

use crate::panel::PanelDefinition;
use crate::request::ActorStamp;
use crate::result::ResultValue;
use crate::{parse_request_id, parse_yaml, WireError, WireResult};
use chrono::{DateTime, Utc};
use labflow_types::NonEmptyText;
use labflow_uuid::ShardableUuid;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Whether anything has been entered into a draft yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DraftState {
    /// Freshly seeded from the panel; nothing entered.
    Clean,
    /// Holds entries that have not been finalized.
    Dirty,
}

/// Working copy of a request's result payload.
#[derive(Clone, Debug, PartialEq)]
pub struct ResultDraft {
    pub request_id: ShardableUuid,
    pub panel_id: NonEmptyText,
    /// Technician holding the single-writer claim. `None` until the first save.
    pub owner: Option<ActorStamp>,
    /// One slot per panel parameter (and any extra keys entered); `None` means not entered.
    pub values: BTreeMap<String, Option<ResultValue>>,
    pub remarks: Option<String>,
    pub state: DraftState,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ResultDraft {
    /// An empty draft seeded with every parameter key of `panel`.
    pub fn seeded(request_id: ShardableUuid, panel: &PanelDefinition) -> Self {
        Self {
            request_id,
            panel_id: panel.panel_id.clone(),
            owner: None,
            values: panel.keys().map(|k| (k.to_string(), None)).collect(),
            remarks: None,
            state: DraftState::Clean,
            updated_at: None,
        }
    }

    /// Entered (non-empty) values only.
    pub fn entered_values(&self) -> BTreeMap<String, ResultValue> {
        self.values
            .iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| (k.clone(), v.clone())))
            .collect()
    }
}

/// Draft file operations.
pub struct DraftRecord;

impl DraftRecord {
    /// Parse a draft from YAML text.
    pub fn parse(yaml_text: &str) -> WireResult<ResultDraft> {
        let wire: DraftWire = parse_yaml(yaml_text, "Draft")?;
        Ok(ResultDraft {
            request_id: parse_request_id(&wire.request_id, "request_id")?,
            panel_id: wire.panel_id,
            owner: wire.owner,
            values: wire.values,
            remarks: wire.remarks,
            state: wire.state,
            updated_at: wire.updated_at,
        })
    }

    /// Render a draft as YAML text.
    pub fn render(draft: &ResultDraft) -> WireResult<String> {
        let wire = DraftWire {
            request_id: draft.request_id.to_string(),
            panel_id: draft.panel_id.clone(),
            owner: draft.owner.clone(),
            values: draft.values.clone(),
            remarks: draft.remarks.clone(),
            state: draft.state,
            updated_at: draft.updated_at,
        };
        serde_yaml::to_string(&wire)
            .map_err(|e| WireError::Translation(format!("Failed to serialize draft: {e}")))
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct DraftWire {
    request_id: String,
    panel_id: NonEmptyText,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    owner: Option<ActorStamp>,
    #[serde(default)]
    values: BTreeMap<String, Option<ResultValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    remarks: Option<String>,
    state: DraftState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
}
