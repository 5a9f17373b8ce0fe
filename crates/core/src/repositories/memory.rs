//! In-memory request store for tests and demos. Nothing survives a restart.

use super::{sort_requests, RequestRepository, StatusFilter};
use crate::{LabError, LabResult};
use labflow_uuid::ShardableUuid;
use labflow_wire::{ResultDraft, TestRequest};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct Tables {
    requests: HashMap<ShardableUuid, TestRequest>,
    drafts: HashMap<ShardableUuid, ResultDraft>,
}

#[derive(Debug, Default)]
pub struct MemoryRequestRepository {
    tables: RwLock<Tables>,
    fail_writes: AtomicBool,
}

impl MemoryRequestRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail with [`LabError::Unavailable`], simulating a storage
    /// outage.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn read(&self) -> LabResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| LabError::Unavailable("request table lock poisoned".into()))
    }

    fn write(&self) -> LabResult<RwLockWriteGuard<'_, Tables>> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LabError::Unavailable("writes are disabled".into()));
        }
        self.tables
            .write()
            .map_err(|_| LabError::Unavailable("request table lock poisoned".into()))
    }
}

impl RequestRepository for MemoryRequestRepository {
    fn insert(&self, request: &TestRequest) -> LabResult<()> {
        let mut tables = self.write()?;
        if tables.requests.contains_key(&request.request_id) {
            return Err(LabError::InvalidInput(format!(
                "request {} already exists",
                request.request_id
            )));
        }
        tables.requests.insert(request.request_id, request.clone());
        Ok(())
    }

    fn get(&self, request_id: &ShardableUuid) -> LabResult<TestRequest> {
        self.read()?
            .requests
            .get(request_id)
            .cloned()
            .ok_or_else(|| LabError::request_not_found(request_id))
    }

    fn replace(&self, request: &TestRequest) -> LabResult<()> {
        let mut tables = self.write()?;
        match tables.requests.get_mut(&request.request_id) {
            Some(slot) => {
                *slot = request.clone();
                Ok(())
            }
            None => Err(LabError::request_not_found(&request.request_id)),
        }
    }

    fn list(&self, filter: StatusFilter) -> LabResult<Vec<TestRequest>> {
        let mut requests: Vec<TestRequest> = self
            .read()?
            .requests
            .values()
            .filter(|r| filter.matches(r.status))
            .cloned()
            .collect();
        sort_requests(&mut requests);
        Ok(requests)
    }

    fn load_draft(&self, request_id: &ShardableUuid) -> LabResult<Option<ResultDraft>> {
        Ok(self.read()?.drafts.get(request_id).cloned())
    }

    fn store_draft(&self, draft: &ResultDraft) -> LabResult<()> {
        let mut tables = self.write()?;
        if !tables.requests.contains_key(&draft.request_id) {
            return Err(LabError::request_not_found(&draft.request_id));
        }
        tables.drafts.insert(draft.request_id, draft.clone());
        Ok(())
    }

    fn remove_draft(&self, request_id: &ShardableUuid) -> LabResult<()> {
        self.write()?.drafts.remove(request_id);
        Ok(())
    }
}
