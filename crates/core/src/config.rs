//! Core runtime configuration.
//!
//! This module defines configuration that should be resolved once at process startup and then
//! passed into core services. The intent is to avoid reading process-wide environment variables
//! during request handling, which can lead to inconsistent behaviour in multi-threaded runtimes
//! and test harnesses.

use crate::constants::{
    DEFAULT_DOCUMENT_RETRIES, DEFAULT_DOCUMENT_TIMEOUT, DEFAULT_PUBLISH_TIMEOUT,
    REQUESTS_DIR_NAME,
};
use crate::retry::RetryPolicy;
use crate::{LabError, LabResult};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    data_dir: PathBuf,
    panel_dir: Option<PathBuf>,
    publish_timeout: Duration,
    document_timeout: Duration,
    document_retry: RetryPolicy,
    document_service_url: Option<String>,
}

impl CoreConfig {
    /// Create a new `CoreConfig` with default timeouts.
    ///
    /// `panel_dir` of `None` selects the panels bundled with this crate.
    pub fn new(data_dir: PathBuf, panel_dir: Option<PathBuf>) -> Self {
        Self {
            data_dir,
            panel_dir,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            document_timeout: DEFAULT_DOCUMENT_TIMEOUT,
            document_retry: RetryPolicy::builder()
                .max_retries(DEFAULT_DOCUMENT_RETRIES)
                .initial_delay(Duration::from_millis(200))
                .max_delay(Duration::from_secs(2))
                .build(),
            document_service_url: None,
        }
    }

    /// # Errors
    ///
    /// Returns [`LabError::InvalidInput`] for a zero timeout.
    pub fn with_publish_timeout(mut self, timeout: Duration) -> LabResult<Self> {
        if timeout.is_zero() {
            return Err(LabError::InvalidInput(
                "publish timeout must be greater than zero".into(),
            ));
        }
        self.publish_timeout = timeout;
        Ok(self)
    }

    /// # Errors
    ///
    /// Returns [`LabError::InvalidInput`] for a zero timeout.
    pub fn with_document_timeout(mut self, timeout: Duration) -> LabResult<Self> {
        if timeout.is_zero() {
            return Err(LabError::InvalidInput(
                "document timeout must be greater than zero".into(),
            ));
        }
        self.document_timeout = timeout;
        Ok(self)
    }

    pub fn with_document_retry(mut self, policy: RetryPolicy) -> Self {
        self.document_retry = policy;
        self
    }

    /// # Errors
    ///
    /// Returns [`LabError::InvalidInput`] unless the URL is `http://` or `https://`.
    pub fn with_document_service_url(mut self, url: Option<String>) -> LabResult<Self> {
        let url = url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty());
        if let Some(url) = &url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(LabError::InvalidInput(format!(
                    "document service URL must be http(s): {url}"
                )));
            }
        }
        self.document_service_url = url;
        Ok(self)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn requests_dir(&self) -> PathBuf {
        self.data_dir.join(REQUESTS_DIR_NAME)
    }

    pub fn panel_dir(&self) -> Option<&Path> {
        self.panel_dir.as_deref()
    }

    pub fn publish_timeout(&self) -> Duration {
        self.publish_timeout
    }

    pub fn document_timeout(&self) -> Duration {
        self.document_timeout
    }

    pub fn document_retry(&self) -> &RetryPolicy {
        &self.document_retry
    }

    pub fn document_service_url(&self) -> Option<&str> {
        self.document_service_url.as_deref()
    }
}

/// Resolve the panel directory without reading environment variables.
///
/// An override must be an existing directory. Without one, `None` is returned and the catalog
/// falls back to the panels compiled into this crate.
pub fn resolve_panel_dir(override_dir: Option<PathBuf>) -> LabResult<Option<PathBuf>> {
    match override_dir {
        Some(dir) if dir.is_dir() => Ok(Some(dir)),
        Some(dir) => Err(LabError::InvalidInput(format!(
            "LABFLOW_PANEL_DIR override is not a directory: {}",
            dir.display()
        ))),
        None => Ok(None),
    }
}

/// Parse a millisecond duration from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns `default`.
pub fn duration_from_env_value(value: Option<String>, default: Duration) -> LabResult<Duration> {
    let value = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    let Some(value) = value else {
        return Ok(default);
    };
    let millis: u64 = value
        .parse()
        .map_err(|_| LabError::InvalidInput(format!("not a millisecond count: '{value}'")))?;
    if millis == 0 {
        return Err(LabError::InvalidInput(
            "timeout must be greater than zero".into(),
        ));
    }
    Ok(Duration::from_millis(millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn duration_defaults_when_unset_or_blank() {
        let default = Duration::from_secs(3);
        assert_eq!(duration_from_env_value(None, default).unwrap(), default);
        assert_eq!(
            duration_from_env_value(Some("  ".into()), default).unwrap(),
            default
        );
        assert_eq!(
            duration_from_env_value(Some("250".into()), default).unwrap(),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn duration_rejects_garbage_and_zero() {
        let default = Duration::from_secs(3);
        assert!(duration_from_env_value(Some("soon".into()), default).is_err());
        assert!(duration_from_env_value(Some("0".into()), default).is_err());
    }

    #[test]
    fn panel_dir_override_must_exist() {
        let temp = TempDir::new().unwrap();
        assert_eq!(resolve_panel_dir(None).unwrap(), None);
        assert_eq!(
            resolve_panel_dir(Some(temp.path().to_path_buf())).unwrap(),
            Some(temp.path().to_path_buf())
        );
        let err = resolve_panel_dir(Some(temp.path().join("missing"))).expect_err("missing dir");
        assert!(matches!(err, LabError::InvalidInput(_)));
    }

    #[test]
    fn document_url_must_be_http() {
        let cfg = CoreConfig::new(PathBuf::from("lab_data"), None);
        assert!(cfg
            .clone()
            .with_document_service_url(Some("ftp://docs".into()))
            .is_err());
        let cfg = cfg
            .with_document_service_url(Some(" http://docs.local/render ".into()))
            .unwrap();
        assert_eq!(cfg.document_service_url(), Some("http://docs.local/render"));
        assert_eq!(cfg.requests_dir(), PathBuf::from("lab_data").join("requests"));
    }
}
