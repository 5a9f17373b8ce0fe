//! Lifecycle state machine.
//!
//! [`LabService`] owns the authoritative status of every request and is the only writer of
//! status, timestamps and actor stamps. Each mutating operation runs under the per-request lock
//! as one read-check-write sequence, so concurrent callers on the same request are serialised
//! and at most one of them can take a given transition.
//!
//! Notes:
//! - The request record write is the commit point of every transition. `finalize` removes the
//!   draft after that write; if the removal fails the leftover draft is ignored and swept later.
//! - `release` delivers to the sinks, then commits `final` and publishes it. Until the sinks
//!   accept, the stored record stays `completed`, so readers never see a release that is later
//!   undone.

pub mod transition;

use crate::actor::Actor;
use crate::catalog::PanelCatalog;
use crate::documents::DocumentFormat;
use crate::drafts::{DraftPatch, DraftStore};
use crate::interpretation::{check_completeness, interpret};
use crate::locks::RequestLocks;
use crate::release::{DocumentHandle, ReleaseGateway};
use crate::repositories::{RequestRepository, StatusFilter};
use crate::{LabError, LabResult};
use chrono::Utc;
use labflow_types::NonEmptyText;
use labflow_uuid::ShardableUuid;
use labflow_wire::{
    InterpretationFlag, PanelDefinition, RequestActors, RequestStatus, RequestTimestamps,
    ResultDraft, ResultRecord, TestRequest,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use transition::{next_timestamp, Transition};

/// Input from the upstream request producer (order entry).
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewTestRequest {
    pub patient_id: String,
    #[serde(default)]
    pub encounter_id: Option<String>,
    pub panel_id: String,
    /// `requested` or `verified`
    #[serde(default = "default_initial_status")]
    pub status: RequestStatus,
    pub requested_by: Actor,
}

fn default_initial_status() -> RequestStatus {
    RequestStatus::Requested
}

/// A draft together with the live interpretation of its entered values.
#[derive(Clone, Debug, PartialEq)]
pub struct DraftView {
    pub draft: ResultDraft,
    pub flags: Vec<InterpretationFlag>,
}

/// Laboratory request lifecycle service.
#[derive(Clone)]
pub struct LabService {
    catalog: Arc<PanelCatalog>,
    repository: Arc<dyn RequestRepository>,
    drafts: DraftStore,
    gateway: Arc<ReleaseGateway>,
    locks: Arc<RequestLocks>,
}

impl LabService {
    /// Wires the service together and seeds the gateway's released view from stored `final`
    /// requests.
    ///
    /// # Errors
    ///
    /// Returns repository errors from listing the stored requests.
    pub fn new(
        catalog: Arc<PanelCatalog>,
        repository: Arc<dyn RequestRepository>,
        gateway: Arc<ReleaseGateway>,
    ) -> LabResult<Self> {
        gateway.hydrate(repository.list(StatusFilter::Final)?);
        Ok(Self {
            catalog,
            drafts: DraftStore::new(Arc::clone(&repository)),
            repository,
            gateway,
            locks: Arc::new(RequestLocks::new()),
        })
    }

    pub fn catalog(&self) -> &PanelCatalog {
        &self.catalog
    }

    pub fn gateway(&self) -> &ReleaseGateway {
        &self.gateway
    }

    // ========================================================================
    // Upstream intake
    // ========================================================================

    /// Registers a new request in `requested` or `verified`.
    ///
    /// # Errors
    ///
    /// - [`LabError::InvalidInput`] for a blank patient id, an initial status other than
    ///   `requested`/`verified`, or a requesting clinician without a name,
    /// - [`LabError::NotFound`] for an unknown panel.
    pub async fn create_request(&self, new: NewTestRequest) -> LabResult<TestRequest> {
        if !matches!(new.status, RequestStatus::Requested | RequestStatus::Verified) {
            return Err(LabError::InvalidInput(format!(
                "new requests start as requested or verified, not {}",
                new.status
            )));
        }
        let patient_id = NonEmptyText::new(&new.patient_id)
            .map_err(|_| LabError::InvalidInput("patient_id is required".into()))?;
        let panel = self.catalog.lookup(&new.panel_id)?;
        let requested_by = new.requested_by.stamp()?;

        let request = TestRequest {
            request_id: ShardableUuid::new(),
            patient_id,
            encounter_id: NonEmptyText::from_optional(new.encounter_id.as_deref()),
            panel_id: panel.panel_id.clone(),
            status: new.status,
            timestamps: RequestTimestamps {
                created_at: Utc::now(),
                received_at: None,
                finalized_at: None,
                released_at: None,
            },
            actors: RequestActors {
                requested_by,
                received_by: None,
                finalized_by: None,
                released_by: None,
            },
            result: None,
        };
        self.repository.insert(&request)?;
        tracing::info!(
            request_id = %request.request_id,
            panel_id = %request.panel_id,
            status = %request.status,
            "request created"
        );
        Ok(request)
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// `requested`/`verified` → `registered`.
    ///
    /// # Errors
    ///
    /// Returns [`LabError::IllegalTransition`] from any other status. Of several concurrent
    /// calls on the same request exactly one succeeds.
    pub async fn receive_specimen(
        &self,
        request_id: &ShardableUuid,
        actor: &Actor,
    ) -> LabResult<TestRequest> {
        let received_by = actor.stamp()?;
        let _guard = self.locks.acquire(request_id).await;

        let current = self.repository.get(request_id)?;
        let status = Transition::ReceiveSpecimen.check(&current)?;

        let mut next = current.clone();
        next.status = status;
        next.timestamps.received_at = Some(next_timestamp(&current, Utc::now()));
        next.actors.received_by = Some(received_by);
        self.repository.replace(&next)?;

        tracing::info!(request_id = %request_id, status = %next.status, "specimen received");
        Ok(next)
    }

    /// The request's draft with live flags, as `actor` may see it. Empty once the request is
    /// finalized.
    ///
    /// # Errors
    ///
    /// - [`LabError::NotFound`] for an unknown request or panel,
    /// - [`LabError::DraftClaimed`] if another technician owns the draft,
    /// - [`LabError::InvalidInput`] for an actor without a name.
    pub async fn load_draft(&self, request_id: &ShardableUuid, actor: &Actor) -> LabResult<DraftView> {
        let viewer = actor.stamp()?;
        let request = self.repository.get(request_id)?;
        let panel = self.catalog.lookup(request.panel_id.as_str())?;
        let draft = self.drafts.load_draft(&request, &panel, &viewer)?;
        Ok(view(&panel, draft))
    }

    /// Merges `patch` into the draft; the first save moves `registered` → `in-progress`.
    ///
    /// # Errors
    ///
    /// - [`LabError::IllegalTransition`] outside `registered`/`in-progress`,
    /// - [`LabError::DraftClaimed`] if another technician owns the draft,
    /// - [`LabError::InvalidInput`] for an actor without a name,
    /// - persistence errors; nothing is acknowledged unless stored.
    pub async fn save_draft(
        &self,
        request_id: &ShardableUuid,
        actor: &Actor,
        patch: &DraftPatch,
    ) -> LabResult<DraftView> {
        let author = actor.stamp()?;
        let _guard = self.locks.acquire(request_id).await;

        let request = self.repository.get(request_id)?;
        let panel = self.catalog.lookup(request.panel_id.as_str())?;
        let draft = self.drafts.save_draft(&request, &panel, &author, patch)?;

        if request.status == RequestStatus::Registered {
            let mut next = request.clone();
            next.status = Transition::BeginEncoding.check(&request)?;
            self.repository.replace(&next)?;
            tracing::info!(request_id = %request_id, status = %next.status, "encoding started");
        }
        Ok(view(&panel, draft))
    }

    /// The owner gives up the draft claim; entered values stay for whoever saves next.
    ///
    /// # Errors
    ///
    /// - [`LabError::IllegalTransition`] outside `registered`/`in-progress`,
    /// - [`LabError::DraftClaimed`] if `actor` is not the owner.
    pub async fn release_draft_claim(
        &self,
        request_id: &ShardableUuid,
        actor: &Actor,
    ) -> LabResult<DraftView> {
        let owner = actor.stamp()?;
        let _guard = self.locks.acquire(request_id).await;

        let request = self.repository.get(request_id)?;
        let panel = self.catalog.lookup(request.panel_id.as_str())?;
        let draft = self.drafts.release_claim(&request, &panel, &owner)?;
        Ok(view(&panel, draft))
    }

    /// Moves the draft claim to `actor`, for when the owning technician is gone.
    ///
    /// # Errors
    ///
    /// - [`LabError::IllegalTransition`] outside `registered`/`in-progress`,
    /// - [`LabError::InvalidInput`] for an actor without a name.
    pub async fn take_over_draft(
        &self,
        request_id: &ShardableUuid,
        actor: &Actor,
    ) -> LabResult<DraftView> {
        let technician = actor.stamp()?;
        let _guard = self.locks.acquire(request_id).await;

        let request = self.repository.get(request_id)?;
        let panel = self.catalog.lookup(request.panel_id.as_str())?;
        let draft = self.drafts.take_over(&request, &panel, &technician)?;
        Ok(view(&panel, draft))
    }

    /// `in-progress` → `completed`, gated by the completeness check.
    ///
    /// On success the entered values, their flags and the remarks are frozen on the request,
    /// `actor` is recorded as the finalizing technician and the draft is discarded.
    ///
    /// # Errors
    ///
    /// - [`LabError::IllegalTransition`] from any status other than `in-progress`,
    /// - [`LabError::ValidationFailed`] listing every missing mandatory field; the request is
    ///   left unchanged.
    pub async fn finalize(&self, request_id: &ShardableUuid, actor: &Actor) -> LabResult<TestRequest> {
        let _guard = self.locks.acquire(request_id).await;

        let current = self.repository.get(request_id)?;
        let status = Transition::Finalize.check(&current)?;
        let panel = self.catalog.lookup(current.panel_id.as_str())?;
        let draft = self.drafts.current_draft(&current, &panel)?;

        let values = draft.entered_values();
        let missing = check_completeness(&panel, &values, actor);
        if !missing.is_empty() {
            tracing::info!(
                request_id = %request_id,
                missing = missing.len(),
                "finalize blocked by missing fields"
            );
            return Err(LabError::ValidationFailed(missing));
        }
        let finalized_by = actor.technician_stamp()?;
        let flags = interpret(&panel, &values);

        let mut next = current.clone();
        next.status = status;
        next.timestamps.finalized_at = Some(next_timestamp(&current, Utc::now()));
        next.actors.finalized_by = Some(finalized_by);
        next.result = Some(ResultRecord {
            values,
            flags,
            remarks: draft.remarks,
        });
        self.repository.replace(&next)?;

        if let Err(e) = self.drafts.discard_draft(request_id) {
            tracing::warn!(
                request_id = %request_id,
                error = %e,
                "draft removal after finalize failed; it will be swept on next load"
            );
        }
        tracing::info!(request_id = %request_id, status = %next.status, "results finalized");
        Ok(next)
    }

    /// `completed` → `final`, delivered downstream before it is committed.
    ///
    /// The sinks receive the `final` record first. Only once all of them have accepted is the
    /// record written and published to the released view. Nothing after the delivery awaits, so
    /// dropping this future at any point leaves the request either untouched in `completed` or
    /// fully released.
    ///
    /// # Errors
    ///
    /// - [`LabError::IllegalTransition`] from any status other than `completed`,
    /// - [`LabError::PublishFailed`] if a sink rejects the record or the publish timeout elapses;
    ///   the request is still `completed` and the release can be retried,
    /// - persistence errors from committing `final`; the request is still `completed`, and a retry
    ///   delivers to the sinks again.
    pub async fn release(&self, request_id: &ShardableUuid, actor: &Actor) -> LabResult<TestRequest> {
        let released_by = actor.stamp()?;
        let _guard = self.locks.acquire(request_id).await;

        let current = self.repository.get(request_id)?;
        let status = Transition::Release.check(&current)?;

        let mut next = current.clone();
        next.status = status;
        next.timestamps.released_at = Some(next_timestamp(&current, Utc::now()));
        next.actors.released_by = Some(released_by);

        if let Err(e) = self.gateway.deliver(&next).await {
            tracing::warn!(request_id = %request_id, error = %e, "release not delivered, still completed");
            return Err(e);
        }
        if let Err(e) = self.repository.replace(&next) {
            tracing::warn!(
                request_id = %request_id,
                error = %e,
                "release delivered downstream but not committed; a retry will deliver again"
            );
            return Err(e);
        }
        self.gateway.publish(Arc::new(next.clone()));

        tracing::info!(request_id = %request_id, status = %next.status, "results released");
        Ok(next)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// # Errors
    ///
    /// Returns [`LabError::NotFound`] for an unknown id.
    pub fn get_request(&self, request_id: &ShardableUuid) -> LabResult<TestRequest> {
        self.repository.get(request_id)
    }

    pub fn list_requests(&self, filter: StatusFilter) -> LabResult<Vec<TestRequest>> {
        self.repository.list(filter)
    }

    /// # Errors
    ///
    /// Returns [`LabError::NotFound`] for an unknown id.
    pub fn panel(&self, panel_id: &str) -> LabResult<Arc<PanelDefinition>> {
        self.catalog.lookup(panel_id)
    }

    pub fn released(&self, request_id: &ShardableUuid) -> Option<Arc<TestRequest>> {
        self.gateway.released(request_id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<TestRequest>> {
        self.gateway.subscribe()
    }

    /// Generates and stores a printable or PDF rendering of a finalized request.
    ///
    /// # Errors
    ///
    /// Returns [`LabError::DocumentUnavailable`] for requests that are not `completed`/`final`
    /// or when the generator keeps failing.
    pub async fn request_document(
        &self,
        request_id: &ShardableUuid,
        format: DocumentFormat,
    ) -> LabResult<DocumentHandle> {
        let request = self.repository.get(request_id)?;
        let panel = self.catalog.lookup(request.panel_id.as_str())?;
        self.gateway.request_document(&request, &panel, format).await
    }
}

fn view(panel: &PanelDefinition, draft: ResultDraft) -> DraftView {
    let flags = interpret(panel, &draft.entered_values());
    DraftView { draft, flags }
}
