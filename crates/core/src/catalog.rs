//! Panel catalog.
//!
//! The catalog is loaded once at startup and is read-only afterwards. Every panel file is
//! validated against the fixed panel schema while loading, so a malformed panel fails startup
//! with the file name and the YAML path of the offending field rather than surfacing during
//! result entry.

use crate::{LabError, LabResult};
use labflow_wire::{Panel, PanelDefinition};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Panels compiled into the crate, used when no panel directory is configured.
const BUNDLED_PANELS: [(&str, &str); 4] = [
    ("cbc.yaml", include_str!("../panels/cbc.yaml")),
    ("fbs.yaml", include_str!("../panels/fbs.yaml")),
    ("lipid_profile.yaml", include_str!("../panels/lipid_profile.yaml")),
    ("urinalysis.yaml", include_str!("../panels/urinalysis.yaml")),
];

/// Read-only registry of panel definitions, keyed by panel id.
#[derive(Clone, Debug, Default)]
pub struct PanelCatalog {
    panels: BTreeMap<String, Arc<PanelDefinition>>,
}

impl PanelCatalog {
    /// Builds a catalog from already-parsed definitions.
    ///
    /// # Errors
    ///
    /// Returns [`LabError::Catalog`] if two definitions share a panel id.
    pub fn from_panels(panels: impl IntoIterator<Item = PanelDefinition>) -> LabResult<Self> {
        let mut catalog = Self::default();
        for panel in panels {
            catalog.insert(panel, "<memory>")?;
        }
        Ok(catalog)
    }

    /// Loads every `*.yaml` / `*.yml` file in `dir`, in file name order.
    ///
    /// # Errors
    ///
    /// Returns [`LabError::Catalog`] naming the file when a panel fails to parse or validate,
    /// when two files declare the same panel id, or when the directory holds no panels.
    pub fn load_dir(dir: &Path) -> LabResult<Self> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir).map_err(LabError::FileRead)? {
            let path = entry.map_err(LabError::FileRead)?.path();
            let is_yaml = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext == "yaml" || ext == "yml");
            if is_yaml && path.is_file() {
                files.push(path);
            }
        }
        files.sort();

        let mut catalog = Self::default();
        for path in &files {
            let source = path.display().to_string();
            let text = fs::read_to_string(path).map_err(LabError::FileRead)?;
            let panel =
                Panel::parse(&text).map_err(|e| LabError::Catalog(format!("{source}: {e}")))?;
            catalog.insert(panel, &source)?;
        }

        if catalog.is_empty() {
            return Err(LabError::Catalog(format!(
                "no panel definitions found in {}",
                dir.display()
            )));
        }
        tracing::info!(dir = %dir.display(), panels = catalog.len(), "panel catalog loaded");
        Ok(catalog)
    }

    /// The panels shipped with this crate (CBC, fasting blood sugar, lipid profile,
    /// urinalysis).
    ///
    /// # Errors
    ///
    /// Returns [`LabError::Catalog`] if a bundled file is malformed.
    pub fn bundled() -> LabResult<Self> {
        let mut catalog = Self::default();
        for (name, text) in BUNDLED_PANELS {
            let panel =
                Panel::parse(text).map_err(|e| LabError::Catalog(format!("{name}: {e}")))?;
            catalog.insert(panel, name)?;
        }
        Ok(catalog)
    }

    /// Loads from `dir` when given, otherwise the bundled panels.
    pub fn load(dir: Option<&Path>) -> LabResult<Self> {
        match dir {
            Some(dir) => Self::load_dir(dir),
            None => Self::bundled(),
        }
    }

    /// # Errors
    ///
    /// Returns [`LabError::NotFound`] for an unknown panel id.
    pub fn lookup(&self, panel_id: &str) -> LabResult<Arc<PanelDefinition>> {
        self.panels
            .get(panel_id.trim())
            .cloned()
            .ok_or_else(|| LabError::NotFound {
                kind: "panel",
                id: panel_id.to_string(),
            })
    }

    pub fn contains(&self, panel_id: &str) -> bool {
        self.panels.contains_key(panel_id.trim())
    }

    /// All panels in panel id order.
    pub fn list(&self) -> impl Iterator<Item = &Arc<PanelDefinition>> {
        self.panels.values()
    }

    pub fn len(&self) -> usize {
        self.panels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.panels.is_empty()
    }

    fn insert(&mut self, panel: PanelDefinition, source: &str) -> LabResult<()> {
        let id = panel.panel_id.as_str().to_string();
        if self.panels.contains_key(&id) {
            return Err(LabError::Catalog(format!(
                "{source}: duplicate panel id '{id}'"
            )));
        }
        self.panels.insert(id, Arc::new(panel));
        Ok(())
    }
}
