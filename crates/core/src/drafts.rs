//! Result draft store.
//!
//! A draft is the durable, server-side working copy of a request's result payload. It is created
//! on the first save after the specimen is received and discarded when the request is finalized.
//!
//! Notes:
//! - Saves merge field by field; a `null` value clears a field. Values are not validated here:
//!   completeness is only enforced at finalization.
//! - The first technician to save claims the draft. Other technicians can neither read nor write
//!   it ([`LabError::DraftClaimed`]) until the owner releases the claim, someone takes it over,
//!   or the draft is discarded.
//! - Writes are refused once the request has left `registered`/`in-progress`. A draft file found
//!   for a finalized request is a leftover from an interrupted finalize; it is ignored and removed.

use crate::repositories::RequestRepository;
use crate::{LabError, LabResult};
use chrono::Utc;
use labflow_uuid::ShardableUuid;
use labflow_wire::{ActorStamp, DraftState, PanelDefinition, ResultDraft, ResultValue, TestRequest};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Partial update to a draft.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DraftPatch {
    /// Fields to set; `None` clears the field.
    #[serde(default)]
    pub values: BTreeMap<String, Option<ResultValue>>,
    /// Replacement remarks. Blank text clears them; absent leaves them unchanged.
    #[serde(default)]
    pub remarks: Option<String>,
}

impl DraftPatch {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.remarks.is_none()
    }

    /// Sets one field.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<ResultValue>) -> Self {
        self.values.insert(key.into(), Some(value.into()));
        self
    }

    /// Clears one field.
    pub fn clear(mut self, key: impl Into<String>) -> Self {
        self.values.insert(key.into(), None);
        self
    }

    pub fn remarks(mut self, remarks: impl Into<String>) -> Self {
        self.remarks = Some(remarks.into());
        self
    }

    /// Applies the patch. Applying the same patch twice leaves the same values.
    fn apply_to(&self, draft: &mut ResultDraft) {
        for (key, value) in &self.values {
            let value = value.clone().filter(|v| !v.is_blank());
            draft.values.insert(key.clone(), value);
        }
        if let Some(remarks) = &self.remarks {
            let trimmed = remarks.trim();
            draft.remarks = (!trimmed.is_empty()).then(|| trimmed.to_string());
        }
        let has_entries = draft.values.values().any(Option::is_some) || draft.remarks.is_some();
        draft.state = if has_entries {
            DraftState::Dirty
        } else {
            DraftState::Clean
        };
    }
}

/// Draft persistence with status gating and the single-writer claim.
#[derive(Clone)]
pub struct DraftStore {
    repository: Arc<dyn RequestRepository>,
}

impl DraftStore {
    pub fn new(repository: Arc<dyn RequestRepository>) -> Self {
        Self { repository }
    }

    /// The draft as `viewer` may see it: the stored draft, or an empty one seeded from the panel.
    ///
    /// Once a request is finalized this always returns an empty draft; a leftover draft file is
    /// removed on the way.
    ///
    /// # Errors
    ///
    /// - [`LabError::DraftClaimed`] if the draft belongs to another technician,
    /// - persistence errors from the repository.
    pub fn load_draft(
        &self,
        request: &TestRequest,
        panel: &PanelDefinition,
        viewer: &ActorStamp,
    ) -> LabResult<ResultDraft> {
        let draft = self.current_draft(request, panel)?;
        ensure_owner(request, &draft, viewer)?;
        Ok(draft)
    }

    /// The draft regardless of who owns it. Used by finalize, which freezes whatever is stored.
    pub(crate) fn current_draft(
        &self,
        request: &TestRequest,
        panel: &PanelDefinition,
    ) -> LabResult<ResultDraft> {
        let empty = ResultDraft::seeded(request.request_id, panel);
        if request.status.is_finalized() {
            self.sweep_stale(request)?;
            return Ok(empty);
        }
        Ok(self
            .repository
            .load_draft(&request.request_id)?
            .unwrap_or(empty))
    }

    /// Merges `patch` into the request's draft and persists it before returning.
    ///
    /// # Errors
    ///
    /// - [`LabError::IllegalTransition`] if the request is not `registered` or `in-progress`,
    /// - [`LabError::DraftClaimed`] if another technician owns the draft,
    /// - persistence errors; the save is not acknowledged unless the write succeeded.
    pub fn save_draft(
        &self,
        request: &TestRequest,
        panel: &PanelDefinition,
        author: &ActorStamp,
        patch: &DraftPatch,
    ) -> LabResult<ResultDraft> {
        let mut draft = self.writable_draft(request, panel, "save draft for")?;
        ensure_owner(request, &draft, author)?;
        if draft.owner.is_none() {
            draft.owner = Some(author.clone());
        }

        patch.apply_to(&mut draft);
        draft.updated_at = Some(Utc::now());
        self.repository.store_draft(&draft)?;
        tracing::debug!(request_id = %request.request_id, fields = patch.values.len(), "draft saved");
        Ok(draft)
    }

    /// Gives up `owner`'s claim. The entered values stay; the next technician to save claims
    /// the draft.
    ///
    /// # Errors
    ///
    /// - [`LabError::IllegalTransition`] if the request is not `registered` or `in-progress`,
    /// - [`LabError::DraftClaimed`] if the draft belongs to another technician,
    /// - persistence errors.
    pub fn release_claim(
        &self,
        request: &TestRequest,
        panel: &PanelDefinition,
        owner: &ActorStamp,
    ) -> LabResult<ResultDraft> {
        let mut draft = self.writable_draft(request, panel, "release draft claim for")?;
        ensure_owner(request, &draft, owner)?;
        if draft.owner.take().is_some() {
            draft.updated_at = Some(Utc::now());
            self.repository.store_draft(&draft)?;
            tracing::info!(request_id = %request.request_id, "draft claim released");
        }
        Ok(draft)
    }

    /// Reassigns the draft to `technician`, keeping the entered values. For when the owner is
    /// no longer around to release the claim.
    ///
    /// # Errors
    ///
    /// - [`LabError::IllegalTransition`] if the request is not `registered` or `in-progress`,
    /// - persistence errors.
    pub fn take_over(
        &self,
        request: &TestRequest,
        panel: &PanelDefinition,
        technician: &ActorStamp,
    ) -> LabResult<ResultDraft> {
        let mut draft = self.writable_draft(request, panel, "take over draft for")?;
        let previous = draft.owner.replace(technician.clone());
        match previous {
            Some(previous) if !previous.same_person(technician) => {
                tracing::warn!(
                    request_id = %request.request_id,
                    previous_owner = %previous.name,
                    new_owner = %technician.name,
                    "draft taken over"
                );
            }
            Some(_) => {}
            None => {
                tracing::info!(request_id = %request.request_id, owner = %technician.name, "draft claimed");
            }
        }
        draft.updated_at = Some(Utc::now());
        self.repository.store_draft(&draft)?;
        Ok(draft)
    }

    /// Removes the draft. Called by the lifecycle once a finalize has committed.
    pub fn discard_draft(&self, request_id: &ShardableUuid) -> LabResult<()> {
        self.repository.remove_draft(request_id)
    }

    fn writable_draft(
        &self,
        request: &TestRequest,
        panel: &PanelDefinition,
        action: &'static str,
    ) -> LabResult<ResultDraft> {
        if !request.status.accepts_draft_writes() {
            return Err(LabError::IllegalTransition {
                request_id: request.request_id,
                from: request.status,
                action,
            });
        }
        Ok(self
            .repository
            .load_draft(&request.request_id)?
            .unwrap_or_else(|| ResultDraft::seeded(request.request_id, panel)))
    }

    fn sweep_stale(&self, request: &TestRequest) -> LabResult<()> {
        if self.repository.load_draft(&request.request_id)?.is_some() {
            tracing::warn!(
                request_id = %request.request_id,
                status = %request.status,
                "removing stale draft left behind by an interrupted finalize"
            );
            if let Err(e) = self.discard_draft(&request.request_id) {
                tracing::warn!(request_id = %request.request_id, error = %e, "stale draft removal failed");
            }
        }
        Ok(())
    }
}

fn ensure_owner(request: &TestRequest, draft: &ResultDraft, actor: &ActorStamp) -> LabResult<()> {
    match &draft.owner {
        Some(owner) if !owner.same_person(actor) => Err(LabError::DraftClaimed {
            request_id: request.request_id,
            owner: owner.name.to_string(),
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::MemoryRequestRepository;
    use crate::test_support::{cbc_panel, new_request, stamp};
    use labflow_wire::RequestStatus;

    fn setup(status: RequestStatus) -> (Arc<MemoryRequestRepository>, DraftStore, TestRequest) {
        let repo = Arc::new(MemoryRequestRepository::new());
        let request = new_request(status);
        repo.insert(&request).unwrap();
        let store = DraftStore::new(repo.clone());
        (repo, store, request)
    }

    #[test]
    fn load_without_saved_draft_is_seeded_and_clean() {
        let (_repo, store, request) = setup(RequestStatus::Registered);
        let draft = store
            .load_draft(&request, &cbc_panel(), &stamp("Jose Cruz", None))
            .unwrap();
        assert_eq!(draft.state, DraftState::Clean);
        assert_eq!(draft.values.len(), cbc_panel().parameters.len());
        assert!(draft.owner.is_none());
    }

    #[test]
    fn save_merges_and_clears_fields() {
        let (_repo, store, request) = setup(RequestStatus::Registered);
        let tech = stamp("Jose Cruz", Some("PRC-1"));
        let panel = cbc_panel();

        let patch = DraftPatch::default()
            .set("hemoglobin", 9.5)
            .set("wbc", 7.0)
            .remarks("hemolysed sample");
        store.save_draft(&request, &panel, &tech, &patch).unwrap();

        let draft = store
            .save_draft(&request, &panel, &tech, &DraftPatch::default().clear("wbc"))
            .unwrap();
        assert_eq!(draft.values["hemoglobin"], Some(ResultValue::Number(9.5)));
        assert_eq!(draft.values["wbc"], None);
        assert_eq!(draft.remarks.as_deref(), Some("hemolysed sample"));
        assert_eq!(draft.state, DraftState::Dirty);

        let reloaded = store.load_draft(&request, &panel, &tech).unwrap();
        assert_eq!(reloaded, draft);
    }

    #[test]
    fn repeated_save_is_idempotent() {
        let (_repo, store, request) = setup(RequestStatus::InProgress);
        let tech = stamp("Jose Cruz", Some("PRC-1"));
        let patch = DraftPatch::default().set("hemoglobin", "9.5");
        let first = store.save_draft(&request, &cbc_panel(), &tech, &patch).unwrap();
        let second = store.save_draft(&request, &cbc_panel(), &tech, &patch).unwrap();
        assert_eq!(first.values, second.values);
        assert_eq!(first.remarks, second.remarks);
    }

    #[test]
    fn blank_values_clear_the_field() {
        let (_repo, store, request) = setup(RequestStatus::Registered);
        let tech = stamp("Jose Cruz", None);
        let draft = store
            .save_draft(&request, &cbc_panel(), &tech, &DraftPatch::default().set("hemoglobin", "  "))
            .unwrap();
        assert_eq!(draft.values["hemoglobin"], None);
        assert_eq!(draft.state, DraftState::Clean);
    }

    #[test]
    fn another_technician_cannot_write_a_claimed_draft() {
        let (_repo, store, request) = setup(RequestStatus::Registered);
        let panel = cbc_panel();
        let patch = DraftPatch::default().set("hemoglobin", 9.5);
        store
            .save_draft(&request, &panel, &stamp("Jose Cruz", Some("PRC-1")), &patch)
            .unwrap();

        let err = store
            .save_draft(&request, &panel, &stamp("Maria Lim", Some("PRC-2")), &patch)
            .expect_err("claimed by another technician");
        match err {
            LabError::DraftClaimed { owner, .. } => assert_eq!(owner, "Jose Cruz"),
            other => panic!("unexpected error: {other:?}"),
        }

        // Same license, different spelling of the name: same technician.
        store
            .save_draft(&request, &panel, &stamp("JOSE M. CRUZ", Some("prc-1")), &patch)
            .unwrap();
    }

    #[test]
    fn claimed_draft_is_hidden_from_other_technicians() {
        let (_repo, store, request) = setup(RequestStatus::InProgress);
        let panel = cbc_panel();
        let owner = stamp("Jose Cruz", Some("PRC-1"));
        store
            .save_draft(&request, &panel, &owner, &DraftPatch::default().set("hemoglobin", 9.5))
            .unwrap();

        let err = store
            .load_draft(&request, &panel, &stamp("Maria Lim", Some("PRC-2")))
            .expect_err("claimed by another technician");
        assert!(matches!(err, LabError::DraftClaimed { ref owner, .. } if owner == "Jose Cruz"));

        let own = store.load_draft(&request, &panel, &owner).unwrap();
        assert_eq!(own.values["hemoglobin"], Some(ResultValue::Number(9.5)));
    }

    #[test]
    fn released_claim_passes_to_the_next_saver() {
        let (_repo, store, request) = setup(RequestStatus::InProgress);
        let panel = cbc_panel();
        let jose = stamp("Jose Cruz", Some("PRC-1"));
        let maria = stamp("Maria Lim", Some("PRC-2"));
        store
            .save_draft(&request, &panel, &jose, &DraftPatch::default().set("hemoglobin", 9.5))
            .unwrap();

        let err = store
            .release_claim(&request, &panel, &maria)
            .expect_err("only the owner releases");
        assert!(matches!(err, LabError::DraftClaimed { .. }));

        let released = store.release_claim(&request, &panel, &jose).unwrap();
        assert!(released.owner.is_none());
        assert_eq!(released.values["hemoglobin"], Some(ResultValue::Number(9.5)));

        let draft = store
            .save_draft(&request, &panel, &maria, &DraftPatch::default().set("wbc", 7.2))
            .unwrap();
        assert_eq!(draft.owner.as_ref().map(|o| o.name.as_str()), Some("Maria Lim"));
        assert_eq!(draft.values["hemoglobin"], Some(ResultValue::Number(9.5)));
        assert!(matches!(
            store.load_draft(&request, &panel, &jose),
            Err(LabError::DraftClaimed { .. })
        ));
    }

    #[test]
    fn take_over_reassigns_the_claim_and_keeps_values() {
        let (repo, store, request) = setup(RequestStatus::InProgress);
        let panel = cbc_panel();
        let jose = stamp("Jose Cruz", Some("PRC-1"));
        let maria = stamp("Maria Lim", Some("PRC-2"));
        store
            .save_draft(&request, &panel, &jose, &DraftPatch::default().set("hemoglobin", 9.5))
            .unwrap();

        let draft = store.take_over(&request, &panel, &maria).unwrap();
        assert_eq!(draft.owner.as_ref().map(|o| o.name.as_str()), Some("Maria Lim"));
        assert_eq!(repo.load_draft(&request.request_id).unwrap(), Some(draft));

        store
            .save_draft(&request, &panel, &maria, &DraftPatch::default().set("wbc", 7.2))
            .unwrap();
        assert!(matches!(
            store.save_draft(&request, &panel, &jose, &DraftPatch::default().set("wbc", 1.0)),
            Err(LabError::DraftClaimed { .. })
        ));
    }

    #[test]
    fn claims_cannot_change_hands_once_finalized() {
        let (_repo, store, request) = setup(RequestStatus::Completed);
        let tech = stamp("Jose Cruz", None);
        assert!(matches!(
            store.take_over(&request, &cbc_panel(), &tech),
            Err(LabError::IllegalTransition { .. })
        ));
        assert!(matches!(
            store.release_claim(&request, &cbc_panel(), &tech),
            Err(LabError::IllegalTransition { .. })
        ));
    }

    #[test]
    fn writes_are_refused_outside_registered_and_in_progress() {
        for status in [
            RequestStatus::Requested,
            RequestStatus::Verified,
            RequestStatus::Completed,
            RequestStatus::Final,
        ] {
            let (_repo, store, request) = setup(status);
            let err = store
                .save_draft(
                    &request,
                    &cbc_panel(),
                    &stamp("Jose Cruz", None),
                    &DraftPatch::default().set("hemoglobin", 9.5),
                )
                .expect_err("status refuses drafts");
            assert!(
                matches!(err, LabError::IllegalTransition { from, .. } if from == status),
                "{status}: {err:?}"
            );
        }
    }

    #[test]
    fn stale_draft_of_finalized_request_is_ignored_and_swept() {
        let (repo, store, request) = setup(RequestStatus::Completed);
        let mut stale = ResultDraft::seeded(request.request_id, &cbc_panel());
        stale
            .values
            .insert("hemoglobin".into(), Some(ResultValue::Number(1.0)));
        repo.store_draft(&stale).unwrap();

        let draft = store
            .load_draft(&request, &cbc_panel(), &stamp("Maria Lim", None))
            .unwrap();
        assert!(draft.entered_values().is_empty());
        assert!(repo.load_draft(&request.request_id).unwrap().is_none());
    }

    #[test]
    fn failed_persistence_is_not_acknowledged() {
        let (repo, store, request) = setup(RequestStatus::Registered);
        repo.set_fail_writes(true);
        let err = store
            .save_draft(
                &request,
                &cbc_panel(),
                &stamp("Jose Cruz", None),
                &DraftPatch::default().set("hemoglobin", 9.5),
            )
            .expect_err("write failure");
        assert!(matches!(err, LabError::Unavailable(_)));
    }
}
