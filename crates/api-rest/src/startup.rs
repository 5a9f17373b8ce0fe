//! Startup wiring shared by the REST binaries.
//!
//! All environment variables are read here, once. Handlers only ever see the resolved
//! [`CoreConfig`] through the [`LabService`].

use labflow_core::config::{duration_from_env_value, resolve_panel_dir};
use labflow_core::constants::{DEFAULT_DATA_DIR, DEFAULT_DOCUMENT_TIMEOUT, DEFAULT_PUBLISH_TIMEOUT};
use labflow_core::{
    CoreConfig, DocumentGenerator, FileRequestRepository, HttpDocumentGenerator, LabService,
    PanelCatalog, PlainTextGenerator, ReleaseGateway,
};
use std::path::PathBuf;
use std::sync::Arc;

pub const DEFAULT_REST_ADDR: &str = "0.0.0.0:3000";

/// Process settings resolved from the environment.
#[derive(Clone, Debug)]
pub struct Settings {
    pub rest_addr: String,
    /// `None` disables the API key guard.
    pub api_key: Option<String>,
    pub core: CoreConfig,
}

impl Settings {
    /// Reads the `LABFLOW_*` environment variables.
    ///
    /// # Environment Variables
    /// - `LABFLOW_DATA_DIR`: data directory (default: `lab_data`)
    /// - `LABFLOW_PANEL_DIR`: panel definitions (default: bundled panels)
    /// - `LABFLOW_REST_ADDR`: REST server address (default: `0.0.0.0:3000`)
    /// - `LABFLOW_API_KEY`: key required in the `x-api-key` header
    /// - `LABFLOW_DOCUMENT_URL`: document generation service (default: local plain-text renderer)
    /// - `LABFLOW_PUBLISH_TIMEOUT_MS`, `LABFLOW_DOCUMENT_TIMEOUT_MS`
    ///
    /// # Errors
    ///
    /// Returns an error if a panel directory override is not a directory, a timeout is not a
    /// positive millisecond count, or the document URL is not http(s).
    pub fn from_env() -> anyhow::Result<Self> {
        let data_dir = std::env::var("LABFLOW_DATA_DIR").unwrap_or_else(|_| DEFAULT_DATA_DIR.into());
        let panel_dir = resolve_panel_dir(std::env::var("LABFLOW_PANEL_DIR").ok().map(PathBuf::from))?;

        let publish_timeout = duration_from_env_value(
            std::env::var("LABFLOW_PUBLISH_TIMEOUT_MS").ok(),
            DEFAULT_PUBLISH_TIMEOUT,
        )?;
        let document_timeout = duration_from_env_value(
            std::env::var("LABFLOW_DOCUMENT_TIMEOUT_MS").ok(),
            DEFAULT_DOCUMENT_TIMEOUT,
        )?;

        let core = CoreConfig::new(PathBuf::from(data_dir), panel_dir)
            .with_publish_timeout(publish_timeout)?
            .with_document_timeout(document_timeout)?
            .with_document_service_url(std::env::var("LABFLOW_DOCUMENT_URL").ok())?;

        let api_key = std::env::var("LABFLOW_API_KEY")
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        Ok(Self {
            rest_addr: std::env::var("LABFLOW_REST_ADDR")
                .unwrap_or_else(|_| DEFAULT_REST_ADDR.into()),
            api_key,
            core,
        })
    }
}

/// Builds the lifecycle service over the file store described by `cfg`.
///
/// # Errors
///
/// Returns an error if the panel catalog cannot be loaded, the request directory cannot be
/// created, or stored requests cannot be listed.
pub fn build_service(cfg: &CoreConfig) -> anyhow::Result<LabService> {
    let catalog = PanelCatalog::load(cfg.panel_dir())?;
    tracing::info!(panels = catalog.len(), "panel catalog loaded");

    let repository = FileRequestRepository::open(cfg.requests_dir())?;

    let generator: Arc<dyn DocumentGenerator> = match cfg.document_service_url() {
        Some(url) => {
            tracing::info!(url, "using document generation service");
            Arc::new(HttpDocumentGenerator::new(url))
        }
        None => {
            tracing::info!("no document service configured, using plain-text print renderer");
            Arc::new(PlainTextGenerator)
        }
    };
    let gateway = ReleaseGateway::new(cfg, generator);

    Ok(LabService::new(
        Arc::new(catalog),
        Arc::new(repository),
        Arc::new(gateway),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn builds_service_over_an_empty_data_dir() {
        let temp = TempDir::new().unwrap();
        let cfg = CoreConfig::new(temp.path().to_path_buf(), None);
        let service = build_service(&cfg).unwrap();
        assert!(!service.catalog().is_empty());
        assert!(cfg.requests_dir().is_dir());
    }
}
