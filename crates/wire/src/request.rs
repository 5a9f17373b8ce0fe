//! Test request record wire model.
//!
//! One `request.yaml` per request holds identity, lifecycle status, timestamps, actor stamps
//! and (once finalized) the frozen result payload.
//!
//! Notes:
//! - The record is replaced as a whole on every transition; the replacement is the commit point
//!   of that transition.
//! - Parsing checks that status, timestamps and result payload agree with each other, so a
//!   hand-edited or truncated record is rejected instead of being half-trusted.

use crate::result::ResultRecord;
use crate::{parse_request_id, parse_yaml, WireError, WireResult};
use chrono::{DateTime, Utc};
use labflow_types::{LicenseNumber, NonEmptyText};
use labflow_uuid::ShardableUuid;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Public domain-level types
// ============================================================================

/// Lifecycle status of a test request, in transition order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestStatus {
    Requested,
    Verified,
    Registered,
    InProgress,
    Completed,
    Final,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 6] = [
        RequestStatus::Requested,
        RequestStatus::Verified,
        RequestStatus::Registered,
        RequestStatus::InProgress,
        RequestStatus::Completed,
        RequestStatus::Final,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Requested => "requested",
            RequestStatus::Verified => "verified",
            RequestStatus::Registered => "registered",
            RequestStatus::InProgress => "in-progress",
            RequestStatus::Completed => "completed",
            RequestStatus::Final => "final",
        }
    }

    /// Still being worked on by the laboratory.
    pub fn is_active(self) -> bool {
        self <= RequestStatus::InProgress
    }

    /// Whether the working result draft may still be written.
    pub fn accepts_draft_writes(self) -> bool {
        matches!(self, RequestStatus::Registered | RequestStatus::InProgress)
    }

    /// Whether a specimen has been received.
    pub fn is_received(self) -> bool {
        self >= RequestStatus::Registered
    }

    /// Whether results are frozen.
    pub fn is_finalized(self) -> bool {
        self >= RequestStatus::Completed
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RequestStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s.trim())
            .ok_or_else(|| WireError::InvalidInput(format!("unknown request status '{s}'")))
    }
}

/// Who performed an action: a name and, for professionals, a license number.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActorStamp {
    pub name: NonEmptyText,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_number: Option<LicenseNumber>,
}

impl ActorStamp {
    /// Two stamps identify the same person when their license numbers match, or, lacking a
    /// license on either side, when their names match case-insensitively.
    pub fn same_person(&self, other: &ActorStamp) -> bool {
        match (&self.license_number, &other.license_number) {
            (Some(a), Some(b)) => a == b,
            _ => self
                .name
                .as_str()
                .eq_ignore_ascii_case(other.name.as_str()),
        }
    }
}

/// Lifecycle timestamps. Each is set once; later ones are never earlier than earlier ones.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestTimestamps {
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_at: Option<DateTime<Utc>>,
}

impl RequestTimestamps {
    /// The most recent timestamp set so far.
    pub fn latest(&self) -> DateTime<Utc> {
        [self.received_at, self.finalized_at, self.released_at]
            .into_iter()
            .flatten()
            .fold(self.created_at, DateTime::max)
    }

    fn in_order(&self) -> bool {
        let set: Vec<DateTime<Utc>> = [
            Some(self.created_at),
            self.received_at,
            self.finalized_at,
            self.released_at,
        ]
        .into_iter()
        .flatten()
        .collect();
        set.windows(2).all(|w| w[0] <= w[1])
    }
}

/// Actor attribution for each lifecycle step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestActors {
    pub requested_by: ActorStamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_by: Option<ActorStamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalized_by: Option<ActorStamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_by: Option<ActorStamp>,
}

/// A laboratory test request.
#[derive(Clone, Debug, PartialEq)]
pub struct TestRequest {
    pub request_id: ShardableUuid,
    pub patient_id: NonEmptyText,
    pub encounter_id: Option<NonEmptyText>,
    pub panel_id: NonEmptyText,
    pub status: RequestStatus,
    pub timestamps: RequestTimestamps,
    pub actors: RequestActors,
    /// Frozen result payload; present exactly when the request is `completed` or `final`.
    pub result: Option<ResultRecord>,
}

// ============================================================================
// Public RequestRecord operations
// ============================================================================

/// Request record file operations.
pub struct RequestRecord;

impl RequestRecord {
    /// Parse a request record from YAML text.
    ///
    /// # Errors
    ///
    /// - [`WireError::Translation`] on schema mismatch (with the field path),
    /// - [`WireError::InvalidUuid`] for a non-canonical `request_id`,
    /// - [`WireError::InconsistentRecord`] when status, timestamps, actors and result disagree.
    pub fn parse(yaml_text: &str) -> WireResult<TestRequest> {
        let wire: TestRequestWire = parse_yaml(yaml_text, "Request record")?;
        let request = wire_to_domain(wire)?;
        check_consistency(&request)?;
        Ok(request)
    }

    /// Render a request record as YAML text.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::InconsistentRecord`] rather than writing a record that could not be
    /// read back.
    pub fn render(request: &TestRequest) -> WireResult<String> {
        check_consistency(request)?;
        serde_yaml::to_string(&domain_to_wire(request))
            .map_err(|e| WireError::Translation(format!("Failed to serialize request: {e}")))
    }
}

// ============================================================================
// Wire types (internal)
// ============================================================================

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct TestRequestWire {
    request_id: String,
    patient_id: NonEmptyText,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    encounter_id: Option<NonEmptyText>,
    panel_id: NonEmptyText,
    status: RequestStatus,
    timestamps: RequestTimestamps,
    actors: RequestActors,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<ResultRecord>,
}

// ============================================================================
// Helper functions (internal)
// ============================================================================

fn wire_to_domain(wire: TestRequestWire) -> WireResult<TestRequest> {
    Ok(TestRequest {
        request_id: parse_request_id(&wire.request_id, "request_id")?,
        patient_id: wire.patient_id,
        encounter_id: wire.encounter_id,
        panel_id: wire.panel_id,
        status: wire.status,
        timestamps: wire.timestamps,
        actors: wire.actors,
        result: wire.result,
    })
}

fn domain_to_wire(request: &TestRequest) -> TestRequestWire {
    TestRequestWire {
        request_id: request.request_id.to_string(),
        patient_id: request.patient_id.clone(),
        encounter_id: request.encounter_id.clone(),
        panel_id: request.panel_id.clone(),
        status: request.status,
        timestamps: request.timestamps.clone(),
        actors: request.actors.clone(),
        result: request.result.clone(),
    }
}

fn check_consistency(request: &TestRequest) -> WireResult<()> {
    let status = request.status;
    let ts = &request.timestamps;
    let actors = &request.actors;
    let fail = |what: &str| {
        Err(WireError::InconsistentRecord(format!(
            "request {} in status '{}': {}",
            request.request_id, status, what
        )))
    };

    if ts.received_at.is_some() != status.is_received()
        || actors.received_by.is_some() != status.is_received()
    {
        return fail("specimen receipt does not match status");
    }
    if ts.finalized_at.is_some() != status.is_finalized()
        || actors.finalized_by.is_some() != status.is_finalized()
        || request.result.is_some() != status.is_finalized()
    {
        return fail("finalization does not match status");
    }
    let released = status == RequestStatus::Final;
    if ts.released_at.is_some() != released || actors.released_by.is_some() != released {
        return fail("release does not match status");
    }
    if !ts.in_order() {
        return fail("timestamps are out of order");
    }
    Ok(())
}
