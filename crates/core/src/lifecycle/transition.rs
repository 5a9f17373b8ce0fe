//! Legal lifecycle transitions.
//!
//! ```text
//! requested/verified --receive_specimen--> registered
//! registered          --begin_encoding----> in-progress   (first draft save)
//! in-progress         --finalize----------> completed
//! completed           --release-----------> final
//! ```
//!
//! Nothing moves a request backwards.

use crate::{LabError, LabResult};
use chrono::{DateTime, Utc};
use labflow_wire::{RequestStatus, TestRequest};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    ReceiveSpecimen,
    BeginEncoding,
    Finalize,
    Release,
}

impl Transition {
    pub const ALL: [Transition; 4] = [
        Transition::ReceiveSpecimen,
        Transition::BeginEncoding,
        Transition::Finalize,
        Transition::Release,
    ];

    /// Verb used in [`LabError::IllegalTransition`] messages.
    pub fn action(self) -> &'static str {
        match self {
            Transition::ReceiveSpecimen => "receive specimen for",
            Transition::BeginEncoding => "begin encoding",
            Transition::Finalize => "finalize",
            Transition::Release => "release",
        }
    }

    pub fn sources(self) -> &'static [RequestStatus] {
        match self {
            Transition::ReceiveSpecimen => &[RequestStatus::Requested, RequestStatus::Verified],
            Transition::BeginEncoding => &[RequestStatus::Registered],
            Transition::Finalize => &[RequestStatus::InProgress],
            Transition::Release => &[RequestStatus::Completed],
        }
    }

    pub fn target(self) -> RequestStatus {
        match self {
            Transition::ReceiveSpecimen => RequestStatus::Registered,
            Transition::BeginEncoding => RequestStatus::InProgress,
            Transition::Finalize => RequestStatus::Completed,
            Transition::Release => RequestStatus::Final,
        }
    }

    /// The status `request` moves to.
    ///
    /// # Errors
    ///
    /// Returns [`LabError::IllegalTransition`] if the request is not in a source status.
    pub fn check(self, request: &TestRequest) -> LabResult<RequestStatus> {
        if self.sources().contains(&request.status) {
            Ok(self.target())
        } else {
            Err(LabError::IllegalTransition {
                request_id: request.request_id,
                from: request.status,
                action: self.action(),
            })
        }
    }
}

/// `now`, clamped so it is never earlier than any timestamp already on the request.
pub(crate) fn next_timestamp(request: &TestRequest, now: DateTime<Utc>) -> DateTime<Utc> {
    now.max(request.timestamps.latest())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::new_request;
    use chrono::Duration;

    #[test]
    fn every_transition_moves_forward() {
        for transition in Transition::ALL {
            for source in transition.sources() {
                assert!(transition.target() > *source, "{transition:?} from {source}");
            }
        }
    }

    #[test]
    fn each_status_has_at_most_one_way_out() {
        for status in RequestStatus::ALL {
            let exits = Transition::ALL
                .into_iter()
                .filter(|t| t.sources().contains(&status))
                .count();
            let expected = usize::from(status != RequestStatus::Final);
            assert_eq!(exits, expected, "{status}");
        }
    }

    #[test]
    fn check_rejects_every_other_status() {
        for transition in Transition::ALL {
            for status in RequestStatus::ALL {
                let request = new_request(status);
                let legal = transition.sources().contains(&status);
                match transition.check(&request) {
                    Ok(target) => {
                        assert!(legal);
                        assert_eq!(target, transition.target());
                    }
                    Err(LabError::IllegalTransition { from, action, .. }) => {
                        assert!(!legal);
                        assert_eq!(from, status);
                        assert_eq!(action, transition.action());
                    }
                    Err(other) => panic!("unexpected error: {other:?}"),
                }
            }
        }
    }

    #[test]
    fn timestamps_never_go_backwards() {
        let request = new_request(RequestStatus::Completed);
        let latest = request.timestamps.latest();
        let skewed = latest - Duration::minutes(10);
        assert_eq!(next_timestamp(&request, skewed), latest);
        let later = latest + Duration::seconds(1);
        assert_eq!(next_timestamp(&request, later), later);
    }
}
