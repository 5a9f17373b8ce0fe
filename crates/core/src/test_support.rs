//! Fixtures shared by the unit tests of this crate.

use crate::catalog::PanelCatalog;
use chrono::{Duration, Utc};
use labflow_types::{LicenseNumber, NonEmptyText};
use labflow_uuid::ShardableUuid;
use labflow_wire::{
    ActorStamp, PanelDefinition, RequestActors, RequestStatus, RequestTimestamps, ResultRecord,
    ResultValue, TestRequest,
};

pub(crate) fn cbc_panel() -> PanelDefinition {
    PanelCatalog::bundled()
        .and_then(|c| c.lookup("cbc"))
        .map(|p| (*p).clone())
        .unwrap()
}

pub(crate) fn stamp(name: &str, license: Option<&str>) -> ActorStamp {
    ActorStamp {
        name: NonEmptyText::new(name).unwrap(),
        license_number: license.map(|l| LicenseNumber::parse(l).unwrap()),
    }
}

/// A consistent CBC request in `status`, with every earlier lifecycle step filled in.
pub(crate) fn new_request(status: RequestStatus) -> TestRequest {
    let created_at = Utc::now() - Duration::minutes(30);
    let technician = stamp("Jose Cruz", Some("PRC-0012345"));
    let mut request = TestRequest {
        request_id: ShardableUuid::new(),
        patient_id: NonEmptyText::new("PT-0001").unwrap(),
        encounter_id: None,
        panel_id: NonEmptyText::new("cbc").unwrap(),
        status,
        timestamps: RequestTimestamps {
            created_at,
            received_at: None,
            finalized_at: None,
            released_at: None,
        },
        actors: RequestActors {
            requested_by: stamp("Dr. Ana Reyes", None),
            received_by: None,
            finalized_by: None,
            released_by: None,
        },
        result: None,
    };
    if status.is_received() {
        request.timestamps.received_at = Some(created_at + Duration::minutes(5));
        request.actors.received_by = Some(technician.clone());
    }
    if status.is_finalized() {
        request.timestamps.finalized_at = Some(created_at + Duration::minutes(20));
        request.actors.finalized_by = Some(technician.clone());
        let mut result = ResultRecord::default();
        result
            .values
            .insert("hemoglobin".into(), ResultValue::Number(13.0));
        request.result = Some(result);
    }
    if status == RequestStatus::Final {
        request.timestamps.released_at = Some(created_at + Duration::minutes(25));
        request.actors.released_by = Some(technician);
    }
    request
}
