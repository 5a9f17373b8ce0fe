//! File-backed request store.
//!
//! Each request lives in its own sharded directory under the requests root:
//!
//! ```text
//! requests/
//! └── 55/0e/550e8400e29b41d4a716446655440000/
//!     ├── request.yaml
//!     ├── draft.yaml        (only while encoding)
//!     └── documents/        (see labflow-files)
//! ```
//!
//! Every write goes to a uniquely named temporary sibling, is synced, and is renamed over the
//! target, so a reader sees either the old or the new file and never a torn one. The parent
//! directory is synced after the rename on Unix so the rename itself survives a crash.
//!
//! Per-request locks only serialise writers inside one process. Two processes sharing a store
//! (the `labflow` CLI next to the server) never clobber each other's temporary files, but the
//! last rename wins.

use super::{sort_requests, RequestRepository, StatusFilter};
use crate::constants::{DRAFT_FILENAME, REQUEST_FILENAME};
use crate::{LabError, LabResult};
use labflow_uuid::ShardableUuid;
use labflow_wire::{DraftRecord, RequestRecord, ResultDraft, TestRequest};
use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Request store rooted at a `requests/` directory.
#[derive(Clone, Debug)]
pub struct FileRequestRepository {
    root: PathBuf,
}

impl FileRequestRepository {
    /// Opens the store, creating the root directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`LabError::StorageDirCreation`] if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> LabResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(LabError::StorageDirCreation)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn request_dir(&self, request_id: &ShardableUuid) -> PathBuf {
        request_id.sharded_dir(&self.root)
    }

    fn request_path(&self, request_id: &ShardableUuid) -> PathBuf {
        self.request_dir(request_id).join(REQUEST_FILENAME)
    }

    fn draft_path(&self, request_id: &ShardableUuid) -> PathBuf {
        self.request_dir(request_id).join(DRAFT_FILENAME)
    }

    fn read_request(path: &Path) -> LabResult<TestRequest> {
        let contents = fs::read_to_string(path).map_err(LabError::FileRead)?;
        Ok(RequestRecord::parse(&contents)?)
    }

    /// Every `request.yaml` under the three shard levels. Unreadable entries are skipped.
    fn request_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let Ok(s1_iter) = fs::read_dir(&self.root) else {
            return files;
        };
        for s1 in s1_iter.flatten() {
            let s1_path = s1.path();
            if !s1_path.is_dir() {
                continue;
            }
            let Ok(s2_iter) = fs::read_dir(&s1_path) else {
                continue;
            };
            for s2 in s2_iter.flatten() {
                let s2_path = s2.path();
                if !s2_path.is_dir() {
                    continue;
                }
                let Ok(id_iter) = fs::read_dir(&s2_path) else {
                    continue;
                };
                for id_ent in id_iter.flatten() {
                    let request_path = id_ent.path().join(REQUEST_FILENAME);
                    if request_path.is_file() {
                        files.push(request_path);
                    }
                }
            }
        }
        files
    }
}

impl RequestRepository for FileRequestRepository {
    fn insert(&self, request: &TestRequest) -> LabResult<()> {
        let path = self.request_path(&request.request_id);
        if path.exists() {
            return Err(LabError::InvalidInput(format!(
                "request {} already exists",
                request.request_id
            )));
        }
        let dir = self.request_dir(&request.request_id);
        fs::create_dir_all(&dir).map_err(LabError::StorageDirCreation)?;
        write_atomic(&path, &RequestRecord::render(request)?)
    }

    fn get(&self, request_id: &ShardableUuid) -> LabResult<TestRequest> {
        let path = self.request_path(request_id);
        if !path.is_file() {
            return Err(LabError::request_not_found(request_id));
        }
        Self::read_request(&path)
    }

    fn replace(&self, request: &TestRequest) -> LabResult<()> {
        let path = self.request_path(&request.request_id);
        if !path.is_file() {
            return Err(LabError::request_not_found(&request.request_id));
        }
        write_atomic(&path, &RequestRecord::render(request)?)
    }

    fn list(&self, filter: StatusFilter) -> LabResult<Vec<TestRequest>> {
        let mut requests = Vec::new();
        for path in self.request_files() {
            match Self::read_request(&path) {
                Ok(request) if filter.matches(request.status) => requests.push(request),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable request record");
                }
            }
        }
        sort_requests(&mut requests);
        Ok(requests)
    }

    fn load_draft(&self, request_id: &ShardableUuid) -> LabResult<Option<ResultDraft>> {
        let path = self.draft_path(request_id);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(DraftRecord::parse(&contents)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LabError::FileRead(e)),
        }
    }

    fn store_draft(&self, draft: &ResultDraft) -> LabResult<()> {
        if !self.request_path(&draft.request_id).is_file() {
            return Err(LabError::request_not_found(&draft.request_id));
        }
        write_atomic(
            &self.draft_path(&draft.request_id),
            &DraftRecord::render(draft)?,
        )
    }

    fn remove_draft(&self, request_id: &ShardableUuid) -> LabResult<()> {
        match fs::remove_file(self.draft_path(request_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LabError::FileWrite(e)),
        }
    }
}

static TMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Writes `contents` to `path` via a synced temporary file and a rename.
///
/// The temporary name carries the process id and a per-process sequence number, so concurrent
/// writers (threads, or the CLI next to the server) never share one. It is removed whenever the
/// write does not complete.
fn write_atomic(path: &Path, contents: &str) -> LabResult<()> {
    let parent = path.parent().ok_or_else(|| {
        LabError::InvalidInput(format!("path has no parent: {}", path.display()))
    })?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("record");
    let tmp_path = parent.join(format!(
        ".{file_name}.{}.{}.tmp",
        std::process::id(),
        TMP_SEQUENCE.fetch_add(1, Ordering::Relaxed)
    ));

    if let Err(e) = write_then_rename(&tmp_path, path, contents) {
        let _ = fs::remove_file(&tmp_path);
        return Err(LabError::FileWrite(e));
    }
    sync_dir(parent)
}

fn write_then_rename(tmp_path: &Path, path: &Path, contents: &str) -> io::Result<()> {
    let mut file = fs::File::create(tmp_path)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;
    drop(file);
    fs::rename(tmp_path, path)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> LabResult<()> {
    fs::File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(LabError::FileWrite)
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> LabResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{cbc_panel, new_request};
    use labflow_wire::{RequestStatus, ResultValue};
    use tempfile::TempDir;

    fn store() -> (TempDir, FileRequestRepository) {
        let temp = TempDir::new().unwrap();
        let repo = FileRequestRepository::open(temp.path().join("requests")).unwrap();
        (temp, repo)
    }

    #[test]
    fn insert_then_get_round_trips_through_sharded_dir() {
        let (_temp, repo) = store();
        let request = new_request(RequestStatus::Requested);
        repo.insert(&request).unwrap();

        let path = request
            .request_id
            .sharded_dir(repo.root())
            .join(REQUEST_FILENAME);
        assert!(path.is_file());
        assert_eq!(repo.get(&request.request_id).unwrap(), request);
    }

    #[test]
    fn insert_refuses_existing_id() {
        let (_temp, repo) = store();
        let request = new_request(RequestStatus::Requested);
        repo.insert(&request).unwrap();
        assert!(matches!(
            repo.insert(&request),
            Err(LabError::InvalidInput(_))
        ));
    }

    #[test]
    fn get_and_replace_unknown_request_are_not_found() {
        let (_temp, repo) = store();
        let request = new_request(RequestStatus::Requested);
        assert!(matches!(
            repo.get(&request.request_id),
            Err(LabError::NotFound { .. })
        ));
        assert!(matches!(
            repo.replace(&request),
            Err(LabError::NotFound { .. })
        ));
    }

    #[test]
    fn replace_leaves_no_temporary_files() {
        let (_temp, repo) = store();
        let mut request = new_request(RequestStatus::Requested);
        repo.insert(&request).unwrap();
        request.status = RequestStatus::Verified;
        repo.replace(&request).unwrap();

        let dir = request.request_id.sharded_dir(repo.root());
        assert_eq!(dir_entries(&dir), vec![REQUEST_FILENAME.to_string()]);
        assert_eq!(
            repo.get(&request.request_id).unwrap().status,
            RequestStatus::Verified
        );
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn failed_write_removes_its_temporary_file() {
        let temp = TempDir::new().unwrap();
        // A non-empty directory in the way makes the final rename fail.
        let target = temp.path().join(REQUEST_FILENAME);
        fs::create_dir(&target).unwrap();
        fs::write(target.join("keep"), "x").unwrap();

        let err = write_atomic(&target, "status: requested\n").expect_err("rename over a directory");
        assert!(matches!(err, LabError::FileWrite(_)));
        assert_eq!(dir_entries(temp.path()), vec![REQUEST_FILENAME.to_string()]);
    }

    #[test]
    fn concurrent_writers_use_distinct_temporary_files() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join(DRAFT_FILENAME);

        std::thread::scope(|scope| {
            for writer in 0..8 {
                let target = &target;
                scope.spawn(move || {
                    for round in 0..20 {
                        write_atomic(target, &format!("writer: {writer}\nround: {round}\n")).unwrap();
                    }
                });
            }
        });

        assert_eq!(dir_entries(temp.path()), vec![DRAFT_FILENAME.to_string()]);
        assert!(fs::read_to_string(&target).unwrap().starts_with("writer: "));
    }

    #[test]
    fn list_filters_and_skips_corrupt_records() {
        let (_temp, repo) = store();
        let active = new_request(RequestStatus::Requested);
        repo.insert(&active).unwrap();

        let corrupt = new_request(RequestStatus::Requested);
        repo.insert(&corrupt).unwrap();
        fs::write(
            corrupt.request_id.sharded_dir(repo.root()).join(REQUEST_FILENAME),
            "status: [",
        )
        .unwrap();

        let all = repo.list(StatusFilter::All).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].request_id, active.request_id);
        assert!(repo.list(StatusFilter::Final).unwrap().is_empty());
    }

    #[test]
    fn drafts_are_stored_beside_the_request_and_removed_idempotently() {
        let (_temp, repo) = store();
        let request = new_request(RequestStatus::Registered);
        repo.insert(&request).unwrap();
        assert!(repo.load_draft(&request.request_id).unwrap().is_none());

        let mut draft = ResultDraft::seeded(request.request_id, &cbc_panel());
        draft
            .values
            .insert("hemoglobin".into(), Some(ResultValue::Number(9.5)));
        repo.store_draft(&draft).unwrap();
        assert_eq!(repo.load_draft(&request.request_id).unwrap(), Some(draft));

        repo.remove_draft(&request.request_id).unwrap();
        repo.remove_draft(&request.request_id).unwrap();
        assert!(repo.load_draft(&request.request_id).unwrap().is_none());
    }

    #[test]
    fn draft_for_unknown_request_is_refused() {
        let (_temp, repo) = store();
        let draft = ResultDraft::seeded(ShardableUuid::new(), &cbc_panel());
        assert!(matches!(
            repo.store_draft(&draft),
            Err(LabError::NotFound { .. })
        ));
    }
}
