//! Actor information supplied with lifecycle operations.
//!
//! The session layer hands the core a name and a license number as raw text. This module turns
//! that into the [`ActorStamp`] recorded on the request, and reports which technician fields are
//! missing when finalization requires both.

use crate::error::{LabError, LabResult, MissingField};
use labflow_types::{LicenseNumber, NonEmptyText};
use labflow_wire::ActorStamp;
use serde::{Deserialize, Serialize};

/// Who is performing an operation, as supplied by the caller.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    #[serde(default)]
    pub name: String,
    /// Professional license (e.g. PRC) number. Optional except for finalization.
    #[serde(default)]
    pub license_number: String,
}

impl Actor {
    pub fn new(name: impl Into<String>, license_number: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            license_number: license_number.into(),
        }
    }

    /// An actor without a license number.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, "")
    }

    /// Technician fields that are blank. A license number that does not parse counts as
    /// missing, since it could not be recorded.
    pub fn missing_technician_fields(&self) -> Vec<MissingField> {
        let mut missing = Vec::new();
        if self.name.trim().is_empty() {
            missing.push(MissingField::TechnicianName);
        }
        if LicenseNumber::parse(&self.license_number).is_err() {
            missing.push(MissingField::TechnicianLicense);
        }
        missing
    }

    /// Stamp for an operation that needs a name only.
    ///
    /// # Errors
    ///
    /// Returns [`LabError::InvalidInput`] if the name is blank or a given license number is
    /// malformed.
    pub fn stamp(&self) -> LabResult<ActorStamp> {
        let name = NonEmptyText::new(&self.name)
            .map_err(|_| LabError::InvalidInput("actor name is required".into()))?;
        let license_number = if self.license_number.trim().is_empty() {
            None
        } else {
            Some(
                LicenseNumber::parse(&self.license_number)
                    .map_err(|e| LabError::InvalidInput(e.to_string()))?,
            )
        };
        Ok(ActorStamp {
            name,
            license_number,
        })
    }

    /// Stamp for the finalizing technician: name and license number are both mandatory.
    ///
    /// # Errors
    ///
    /// Returns [`LabError::ValidationFailed`] listing the missing technician fields.
    pub fn technician_stamp(&self) -> LabResult<ActorStamp> {
        let missing = self.missing_technician_fields();
        if !missing.is_empty() {
            return Err(LabError::ValidationFailed(missing));
        }
        self.stamp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_name_is_rejected_for_any_stamp() {
        let err = Actor::named("   ").stamp().expect_err("blank name");
        assert!(matches!(err, LabError::InvalidInput(_)));
    }

    #[test]
    fn license_is_optional_for_plain_stamps() {
        let stamp = Actor::named("Dr. Santos").stamp().unwrap();
        assert_eq!(stamp.name.as_str(), "Dr. Santos");
        assert!(stamp.license_number.is_none());

        let stamp = Actor::new("Ana Cruz", "prc-0012345").stamp().unwrap();
        assert_eq!(
            stamp.license_number.as_ref().map(|l| l.as_str()),
            Some("PRC-0012345")
        );
    }

    #[test]
    fn technician_stamp_reports_every_missing_field() {
        let err = Actor::new("", "").technician_stamp().expect_err("both missing");
        match err {
            LabError::ValidationFailed(missing) => assert_eq!(
                missing,
                vec![MissingField::TechnicianName, MissingField::TechnicianLicense]
            ),
            other => panic!("unexpected error: {other:?}"),
        }

        let err = Actor::new("Ana Cruz", "12 34").technician_stamp().expect_err("bad license");
        assert!(matches!(
            err,
            LabError::ValidationFailed(ref m) if m == &vec![MissingField::TechnicianLicense]
        ));
    }
}
