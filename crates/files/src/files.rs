//! Request-scoped document storage service.
//!
//! [`FilesService`] is bound to one request directory and stores generated documents inside it,
//! content-addressed by SHA-256 with two-level sharding:
//! `<request_root>/documents/sha256/<h[0..2]>/<h[2..4]>/<hash>`.
//!
//! # Implementation Notes
//!
//! - Writes go to a temporary sibling first and are renamed into place after `fsync`, so a
//!   reader never observes a partially written document.
//! - The root directory is canonicalised at construction; the request directory must already
//!   exist (it is created by the request store, not here).

use crate::{FilesError, Sha256Hash, DOCUMENTS_FOLDER_NAME};
use chrono::{DateTime, Utc};
use labflow_types::NonEmptyText;
use labflow_uuid::ShardableUuid;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static TMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Metadata for a stored document.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct FileMetadata {
    /// Hashing algorithm used (always "sha256")
    pub hash_algorithm: NonEmptyText,

    /// Hexadecimal digest of the content
    pub hash: Sha256Hash,

    /// Path relative to the request directory
    pub relative_path: NonEmptyText,

    pub size_bytes: u64,

    /// Best-effort media type. Falls back to the caller's declared type when the bytes carry
    /// no recognisable signature (plain text has none).
    pub media_type: Option<NonEmptyText>,

    /// Name the caller gave the document (e.g. `cbc-report.pdf`)
    pub name: NonEmptyText,

    pub stored_at: DateTime<Utc>,
}

/// Document storage scoped to a single request.
#[derive(Debug)]
pub struct FilesService {
    root_directory: PathBuf,
    request_id: ShardableUuid,
}

impl FilesService {
    /// Creates a service for the request stored under `root_directory`.
    ///
    /// # Errors
    ///
    /// - [`FilesError::InvalidRootDirectory`] if the root is missing, not a directory, or cannot
    ///   be canonicalised,
    /// - [`FilesError::RequestNotFound`] if the request's sharded directory does not exist.
    pub fn new(root_directory: &Path, request_id: ShardableUuid) -> Result<Self, FilesError> {
        if !root_directory.is_dir() {
            return Err(FilesError::InvalidRootDirectory(format!(
                "Not an existing directory: {}",
                root_directory.display()
            )));
        }

        let root_directory = root_directory.canonicalize().map_err(|e| {
            FilesError::InvalidRootDirectory(format!(
                "Cannot canonicalize path {}: {}",
                root_directory.display(),
                e
            ))
        })?;

        let request_root = request_id.sharded_dir(&root_directory);
        if !request_root.is_dir() {
            return Err(FilesError::RequestNotFound(format!(
                "Request directory does not exist: {}",
                request_root.display()
            )));
        }

        Ok(Self {
            root_directory,
            request_id,
        })
    }

    /// Stores `bytes` under their content address and returns the metadata.
    ///
    /// Storing bytes that are already present is not an error: documents are immutable, so the
    /// existing file is verified and reused.
    ///
    /// # Errors
    ///
    /// - [`FilesError::Corrupt`] if a file already at the address has different content,
    /// - [`FilesError::Io`] on directory creation, write, sync or rename failure.
    pub fn add_bytes(
        &self,
        name: &NonEmptyText,
        declared_media_type: Option<&str>,
        bytes: &[u8],
    ) -> Result<FileMetadata, FilesError> {
        let hash = Sha256Hash::digest(bytes);
        let relative_path = Self::relative_path(&hash);
        let storage_path = self.request_root().join(relative_path.as_str());

        if storage_path.exists() {
            let existing = fs::read(&storage_path)?;
            if Sha256Hash::digest(&existing) != hash {
                return Err(FilesError::Corrupt(hash.to_string()));
            }
        } else {
            let parent = storage_path.parent().ok_or_else(|| {
                FilesError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("storage path has no parent: {}", storage_path.display()),
                ))
            })?;
            fs::create_dir_all(parent)?;

            let tmp_path = parent.join(format!(
                ".{}.{}.{}.tmp",
                hash,
                std::process::id(),
                TMP_SEQUENCE.fetch_add(1, Ordering::Relaxed)
            ));
            if let Err(e) = write_then_rename(&tmp_path, &storage_path, bytes) {
                let _ = fs::remove_file(&tmp_path);
                return Err(e.into());
            }
        }

        let media_type = infer::get(bytes)
            .map(|kind| kind.mime_type())
            .or(declared_media_type)
            .and_then(|mime| NonEmptyText::new(mime).ok());

        Ok(FileMetadata {
            hash_algorithm: NonEmptyText::new("sha256")
                .map_err(|_| FilesError::InvalidHash("sha256".into()))?,
            hash,
            relative_path,
            size_bytes: bytes.len() as u64,
            media_type,
            name: name.clone(),
            stored_at: Utc::now(),
        })
    }

    /// Reads a stored document, verifying it against its hash.
    ///
    /// # Errors
    ///
    /// - [`FilesError::DocumentNotFound`] if nothing is stored at the address,
    /// - [`FilesError::Corrupt`] if the content no longer matches,
    /// - [`FilesError::Io`] on read failure.
    pub fn read(&self, hash: &Sha256Hash) -> Result<Vec<u8>, FilesError> {
        let storage_path = self
            .request_root()
            .join(Self::relative_path(hash).as_str());
        if !storage_path.is_file() {
            return Err(FilesError::DocumentNotFound(hash.to_string()));
        }
        let bytes = fs::read(&storage_path)?;
        if &Sha256Hash::digest(&bytes) != hash {
            return Err(FilesError::Corrupt(hash.to_string()));
        }
        Ok(bytes)
    }

    /// `documents/sha256/<s1>/<s2>/<hash>`
    fn relative_path(hash: &Sha256Hash) -> NonEmptyText {
        let hex = hash.as_str();
        NonEmptyText::new(format!(
            "{}/sha256/{}/{}/{}",
            DOCUMENTS_FOLDER_NAME,
            &hex[0..2],
            &hex[2..4],
            hex
        ))
        .unwrap_or_else(|_| unreachable!("formatted path is never blank"))
    }

    fn request_root(&self) -> PathBuf {
        self.request_id.sharded_dir(&self.root_directory)
    }
}

fn write_then_rename(tmp_path: &Path, path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(tmp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    fs::rename(tmp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathBuf, ShardableUuid) {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("requests");
        let id = ShardableUuid::new();
        fs::create_dir_all(id.sharded_dir(&root)).unwrap();
        (temp, root, id)
    }

    fn name(s: &str) -> NonEmptyText {
        NonEmptyText::new(s).unwrap()
    }

    #[test]
    fn rejects_missing_root() {
        let temp = TempDir::new().unwrap();
        let result = FilesService::new(&temp.path().join("missing"), ShardableUuid::new());
        assert!(matches!(result, Err(FilesError::InvalidRootDirectory(_))));
    }

    #[test]
    fn rejects_unknown_request() {
        let (_temp, root, _id) = setup();
        let result = FilesService::new(&root, ShardableUuid::new());
        assert!(matches!(result, Err(FilesError::RequestNotFound(_))));
    }

    #[test]
    fn stores_and_reads_document() {
        let (_temp, root, id) = setup();
        let service = FilesService::new(&root, id).unwrap();

        let meta = service
            .add_bytes(&name("cbc.txt"), Some("text/plain"), b"CBC REPORT")
            .unwrap();
        assert_eq!(meta.size_bytes, 10);
        assert_eq!(meta.media_type.as_ref().map(|m| m.as_str()), Some("text/plain"));
        assert!(meta
            .relative_path
            .as_str()
            .starts_with(&format!("documents/sha256/{}/", &meta.hash.as_str()[0..2])));

        let bytes = service.read(&meta.hash).unwrap();
        assert_eq!(bytes, b"CBC REPORT");
    }

    #[test]
    fn concurrent_stores_of_the_same_bytes_all_succeed() {
        let (_temp, root, id) = setup();
        let service = FilesService::new(&root, id).unwrap();

        let stored: Vec<FileMetadata> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| service.add_bytes(&name("cbc.txt"), None, b"CBC REPORT")))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap().unwrap()).collect()
        });
        assert!(stored.iter().all(|m| m.hash == stored[0].hash));

        let stored_path = id.sharded_dir(&root).join(stored[0].relative_path.as_str());
        let leftovers = fs::read_dir(stored_path.parent().unwrap())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn storing_identical_bytes_twice_reuses_the_file() {
        let (_temp, root, id) = setup();
        let service = FilesService::new(&root, id).unwrap();

        let first = service.add_bytes(&name("a.txt"), None, b"same").unwrap();
        let second = service.add_bytes(&name("b.txt"), None, b"same").unwrap();
        assert_eq!(first.hash, second.hash);
        assert_eq!(first.relative_path, second.relative_path);
    }

    #[test]
    fn detects_pdf_signature() {
        let (_temp, root, id) = setup();
        let service = FilesService::new(&root, id).unwrap();
        let meta = service
            .add_bytes(&name("r.pdf"), None, b"%PDF-1.7\n%fake body")
            .unwrap();
        assert_eq!(
            meta.media_type.as_ref().map(|m| m.as_str()),
            Some("application/pdf")
        );
    }

    #[test]
    fn read_reports_missing_and_corrupt_documents() {
        let (_temp, root, id) = setup();
        let service = FilesService::new(&root, id).unwrap();

        let absent = Sha256Hash::digest(b"never stored");
        assert!(matches!(
            service.read(&absent),
            Err(FilesError::DocumentNotFound(_))
        ));

        let meta = service.add_bytes(&name("x.txt"), None, b"original").unwrap();
        let path = id.sharded_dir(&root.canonicalize().unwrap()).join(meta.relative_path.as_str());
        fs::write(&path, b"tampered").unwrap();
        assert!(matches!(service.read(&meta.hash), Err(FilesError::Corrupt(_))));
    }
}
