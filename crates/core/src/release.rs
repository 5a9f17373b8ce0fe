//! Release & export gateway.
//!
//! Downstream modules only ever see results through this gateway:
//! - the released view, a read-mostly map of committed `final` records, updated under a write
//!   lock (read-after-write consistent for in-process readers),
//! - a broadcast channel notifying in-process subscribers of each release,
//! - configured [`ReleaseSink`]s for out-of-process consumers,
//! - document requests, brokered to the [`DocumentGenerator`] and stored per request.
//!
//! The gateway never changes lifecycle state. The lifecycle delivers to the sinks first, commits
//! `final` only once they have accepted, then publishes to the view.

use crate::config::CoreConfig;
use crate::constants::RELEASE_CHANNEL_CAPACITY;
use crate::documents::{DocumentFormat, DocumentGenerator, GeneratorError};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::{LabError, LabResult};
use async_trait::async_trait;
use labflow_files::{FileMetadata, FilesService};
use labflow_types::NonEmptyText;
use labflow_uuid::ShardableUuid;
use labflow_wire::{PanelDefinition, RequestStatus, TestRequest};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;

/// An out-of-process consumer of released results (HIS feed, billing, ...).
///
/// Delivery may be repeated for the same request when a release is retried, so sinks must treat
/// a redelivery as a no-op.
#[async_trait]
pub trait ReleaseSink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, request: &TestRequest) -> Result<(), String>;
}

/// A generated document stored under its request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DocumentHandle {
    pub request_id: ShardableUuid,
    pub format: DocumentFormat,
    pub file: FileMetadata,
}

pub struct ReleaseGateway {
    released: RwLock<HashMap<ShardableUuid, Arc<TestRequest>>>,
    notifier: broadcast::Sender<Arc<TestRequest>>,
    sinks: Vec<Arc<dyn ReleaseSink>>,
    publish_timeout: Duration,
    generator: Arc<dyn DocumentGenerator>,
    documents_root: PathBuf,
    document_timeout: Duration,
    document_retry: RetryPolicy,
}

impl ReleaseGateway {
    /// Documents are stored under the configured requests directory.
    pub fn new(cfg: &CoreConfig, generator: Arc<dyn DocumentGenerator>) -> Self {
        let (notifier, _) = broadcast::channel(RELEASE_CHANNEL_CAPACITY);
        Self {
            released: RwLock::new(HashMap::new()),
            notifier,
            sinks: Vec::new(),
            publish_timeout: cfg.publish_timeout(),
            generator,
            documents_root: cfg.requests_dir(),
            document_timeout: cfg.document_timeout(),
            document_retry: cfg.document_retry().clone(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ReleaseSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Hands a `final` record to every sink. Each must accept it within the publish timeout.
    ///
    /// Delivery changes nothing in the gateway; the record only becomes visible through
    /// [`ReleaseGateway::publish`] once the lifecycle has committed it.
    ///
    /// # Errors
    ///
    /// - [`LabError::InvalidInput`] if the record is not `final`,
    /// - [`LabError::PublishFailed`] if a sink rejects the record or the timeout elapses.
    pub async fn deliver(&self, request: &TestRequest) -> LabResult<()> {
        if request.status != RequestStatus::Final {
            return Err(LabError::InvalidInput(format!(
                "only final requests can be released, {} is {}",
                request.request_id, request.status
            )));
        }

        match tokio::time::timeout(self.publish_timeout, self.deliver_all(request)).await {
            Ok(result) => result,
            Err(_) => Err(LabError::PublishFailed(format!(
                "downstream delivery timed out after {} ms",
                self.publish_timeout.as_millis()
            ))),
        }
    }

    /// Makes a committed `final` record visible in the released view and notifies subscribers.
    ///
    /// A single write-locked insert, so any reader that runs after this returns sees the record.
    /// Records in any other status are ignored.
    pub fn publish(&self, record: Arc<TestRequest>) {
        if record.status != RequestStatus::Final {
            tracing::warn!(
                request_id = %record.request_id,
                status = %record.status,
                "refusing to publish a record that is not final"
            );
            return;
        }
        self.released
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.request_id, Arc::clone(&record));
        // No subscribers is not an error.
        let _ = self.notifier.send(record);
    }

    async fn deliver_all(&self, record: &TestRequest) -> LabResult<()> {
        for sink in &self.sinks {
            sink.deliver(record).await.map_err(|e| {
                LabError::PublishFailed(format!("sink '{}' rejected the release: {e}", sink.name()))
            })?;
        }
        Ok(())
    }

    /// Released record by id.
    pub fn released(&self, request_id: &ShardableUuid) -> Option<Arc<TestRequest>> {
        self.released
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(request_id)
            .cloned()
    }

    /// Every released record, ordered by release time.
    pub fn released_all(&self) -> Vec<Arc<TestRequest>> {
        let mut all: Vec<Arc<TestRequest>> = self
            .released
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        all.sort_by_key(|r| (r.timestamps.released_at, r.request_id));
        all
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<TestRequest>> {
        self.notifier.subscribe()
    }

    /// Seeds the released view from stored `final` records at startup, without notifying anyone.
    pub fn hydrate(&self, records: impl IntoIterator<Item = TestRequest>) {
        let mut released = self.released.write().unwrap_or_else(PoisonError::into_inner);
        for record in records {
            if record.status == RequestStatus::Final {
                released.insert(record.request_id, Arc::new(record));
            }
        }
    }

    /// Generates a document for a `completed` or `final` request and stores it under the request.
    ///
    /// Each attempt is bounded by the document timeout; transient failures are retried with
    /// exponential backoff.
    ///
    /// # Errors
    ///
    /// - [`LabError::DocumentUnavailable`] if results are not finalized yet, or the generator
    ///   keeps failing,
    /// - [`LabError::Files`] / [`LabError::StorageDirCreation`] if the bytes cannot be stored.
    pub async fn request_document(
        &self,
        request: &TestRequest,
        panel: &PanelDefinition,
        format: DocumentFormat,
    ) -> LabResult<DocumentHandle> {
        if !request.status.is_finalized() {
            return Err(LabError::DocumentUnavailable(format!(
                "request {} is {}; documents exist only for completed or final results",
                request.request_id, request.status
            )));
        }

        let generator = &self.generator;
        let timeout = self.document_timeout;
        let generated = retry_with_backoff(
            &self.document_retry,
            || async move {
                let attempt = generator.generate(request, panel, format);
                match tokio::time::timeout(timeout, attempt).await {
                    Ok(result) => result,
                    Err(_) => Err(GeneratorError::Unreachable(format!(
                        "no response within {} ms",
                        timeout.as_millis()
                    ))),
                }
            },
            GeneratorError::is_retryable,
        )
        .await
        .map_err(|e| LabError::DocumentUnavailable(e.to_string()))?;

        fs::create_dir_all(request.request_id.sharded_dir(&self.documents_root))
            .map_err(LabError::StorageDirCreation)?;
        let files = FilesService::new(&self.documents_root, request.request_id)?;
        let name = NonEmptyText::new(format!(
            "{}-{}.{}",
            request.panel_id,
            format,
            format.file_extension()
        ))
        .map_err(|e| LabError::InvalidInput(e.to_string()))?;
        let declared = generated
            .media_type
            .as_deref()
            .unwrap_or(format.default_media_type());
        let file = files.add_bytes(&name, Some(declared), &generated.bytes)?;

        tracing::info!(
            request_id = %request.request_id,
            format = %format,
            hash = %file.hash,
            "document stored"
        );
        Ok(DocumentHandle {
            request_id: request.request_id,
            format,
            file,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::{GeneratedDocument, PlainTextGenerator};
    use crate::test_support::{cbc_panel, new_request};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct RejectingSink;

    #[async_trait]
    impl ReleaseSink for RejectingSink {
        fn name(&self) -> &str {
            "his-feed"
        }

        async fn deliver(&self, _request: &TestRequest) -> Result<(), String> {
            Err("connection refused".into())
        }
    }

    struct StalledSink;

    #[async_trait]
    impl ReleaseSink for StalledSink {
        fn name(&self) -> &str {
            "billing"
        }

        async fn deliver(&self, _request: &TestRequest) -> Result<(), String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    /// Fails `failures` times with a transient error, then succeeds.
    struct FlakyGenerator {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DocumentGenerator for FlakyGenerator {
        async fn generate(
            &self,
            _request: &TestRequest,
            _panel: &PanelDefinition,
            _format: DocumentFormat,
        ) -> Result<GeneratedDocument, GeneratorError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(GeneratorError::Unreachable("connection reset".into()));
            }
            Ok(GeneratedDocument {
                bytes: b"%PDF-1.4 cbc".to_vec(),
                media_type: None,
            })
        }
    }

    fn config(temp: &TempDir) -> CoreConfig {
        CoreConfig::new(temp.path().to_path_buf(), None)
            .with_publish_timeout(Duration::from_millis(50))
            .unwrap()
            .with_document_timeout(Duration::from_millis(200))
            .unwrap()
            .with_document_retry(
                RetryPolicy::builder()
                    .max_retries(2)
                    .initial_delay(Duration::from_millis(1))
                    .max_delay(Duration::from_millis(2))
                    .build(),
            )
    }

    #[tokio::test]
    async fn publish_makes_record_visible_and_notifies() {
        let temp = TempDir::new().unwrap();
        let gateway = ReleaseGateway::new(&config(&temp), Arc::new(PlainTextGenerator));
        let mut rx = gateway.subscribe();
        let request = new_request(RequestStatus::Final);

        gateway.deliver(&request).await.unwrap();
        assert!(gateway.released(&request.request_id).is_none());

        gateway.publish(Arc::new(request.clone()));
        assert_eq!(
            gateway.released(&request.request_id).as_deref(),
            Some(&request)
        );
        let notified = rx.recv().await.unwrap();
        assert_eq!(notified.request_id, request.request_id);
    }

    #[tokio::test]
    async fn non_final_records_are_neither_delivered_nor_published() {
        let temp = TempDir::new().unwrap();
        let gateway = ReleaseGateway::new(&config(&temp), Arc::new(PlainTextGenerator));
        let request = new_request(RequestStatus::Completed);
        assert!(matches!(
            gateway.deliver(&request).await,
            Err(LabError::InvalidInput(_))
        ));
        gateway.publish(Arc::new(request.clone()));
        assert!(gateway.released(&request.request_id).is_none());
    }

    #[tokio::test]
    async fn rejected_or_stalled_delivery_reports_publish_failed() {
        let temp = TempDir::new().unwrap();
        for sink in [
            Arc::new(RejectingSink) as Arc<dyn ReleaseSink>,
            Arc::new(StalledSink) as Arc<dyn ReleaseSink>,
        ] {
            let gateway =
                ReleaseGateway::new(&config(&temp), Arc::new(PlainTextGenerator)).with_sink(sink);
            let request = new_request(RequestStatus::Final);
            let err = gateway.deliver(&request).await.expect_err("delivery fails");
            assert!(matches!(err, LabError::PublishFailed(_)), "{err:?}");
            assert!(gateway.released(&request.request_id).is_none());
        }
    }

    #[tokio::test]
    async fn hydrate_only_keeps_final_records() {
        let temp = TempDir::new().unwrap();
        let gateway = ReleaseGateway::new(&config(&temp), Arc::new(PlainTextGenerator));
        let done = new_request(RequestStatus::Final);
        let pending = new_request(RequestStatus::Completed);
        gateway.hydrate(vec![done.clone(), pending.clone()]);
        assert!(gateway.released(&done.request_id).is_some());
        assert!(gateway.released(&pending.request_id).is_none());
        assert_eq!(gateway.released_all().len(), 1);
    }

    #[tokio::test]
    async fn documents_require_finalized_results() {
        let temp = TempDir::new().unwrap();
        let gateway = ReleaseGateway::new(&config(&temp), Arc::new(PlainTextGenerator));
        let request = new_request(RequestStatus::InProgress);
        let err = gateway
            .request_document(&request, &cbc_panel(), DocumentFormat::Print)
            .await
            .expect_err("not finalized");
        assert!(matches!(err, LabError::DocumentUnavailable(_)));
    }

    #[tokio::test]
    async fn transient_generator_failures_are_retried_then_stored() {
        let temp = TempDir::new().unwrap();
        let generator = Arc::new(FlakyGenerator {
            failures: 2,
            calls: AtomicUsize::new(0),
        });
        let gateway = ReleaseGateway::new(&config(&temp), generator.clone());
        let request = new_request(RequestStatus::Final);

        let handle = gateway
            .request_document(&request, &cbc_panel(), DocumentFormat::Pdf)
            .await
            .unwrap();
        assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
        assert_eq!(handle.format, DocumentFormat::Pdf);
        assert_eq!(handle.file.name.as_str(), "cbc-pdf.pdf");
        assert_eq!(
            handle.file.media_type.as_ref().map(|m| m.as_str()),
            Some("application/pdf")
        );

        let files = FilesService::new(&temp.path().join("requests"), request.request_id).unwrap();
        assert_eq!(files.read(&handle.file.hash).unwrap(), b"%PDF-1.4 cbc");
    }

    #[tokio::test]
    async fn exhausted_retries_report_document_unavailable() {
        let temp = TempDir::new().unwrap();
        let generator = Arc::new(FlakyGenerator {
            failures: usize::MAX,
            calls: AtomicUsize::new(0),
        });
        let gateway = ReleaseGateway::new(&config(&temp), generator.clone());
        let err = gateway
            .request_document(&new_request(RequestStatus::Completed), &cbc_panel(), DocumentFormat::Pdf)
            .await
            .expect_err("generator down");
        assert!(matches!(err, LabError::DocumentUnavailable(_)));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unsupported_format_is_not_retried() {
        let temp = TempDir::new().unwrap();
        let gateway = ReleaseGateway::new(&config(&temp), Arc::new(PlainTextGenerator));
        let err = gateway
            .request_document(&new_request(RequestStatus::Final), &cbc_panel(), DocumentFormat::Pdf)
            .await
            .expect_err("no pdf renderer");
        assert!(matches!(err, LabError::DocumentUnavailable(_)));
    }
}
