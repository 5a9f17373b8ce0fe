//! Panel definition wire model and translation helpers.
//!
//! A panel file describes one test panel and its ordered parameters:
//!
//! ```yaml
//! panel_id: cbc
//! title: Complete Blood Count
//! parameters:
//!   - key: hemoglobin
//!     label: Hemoglobin
//!     unit: g/dL
//!     required: true
//!     step: 0.1
//!     kind:
//!       type: numeric
//!       low: 12.0
//!       high: 16.0
//!   - key: blood_type
//!     label: Blood type
//!     kind:
//!       type: qualitative
//!       allowed: [A, B, AB, O]
//! ```
//!
//! The parameter kind is a closed, tagged choice (`numeric` or `qualitative`). Everything that
//! can be wrong with a panel is rejected here, at load time, never during result entry.

use crate::{parse_yaml, WireError, WireResult};
use labflow_types::NonEmptyText;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ============================================================================
// Public domain-level types
// ============================================================================

/// A validated test panel.
#[derive(Clone, Debug, PartialEq)]
pub struct PanelDefinition {
    pub panel_id: NonEmptyText,
    pub title: NonEmptyText,
    /// Parameters in display order. Keys are unique.
    pub parameters: Vec<ParameterSpec>,
}

impl PanelDefinition {
    /// Looks up a parameter by key.
    pub fn parameter(&self, key: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.key == key)
    }

    /// Parameter keys in panel order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().map(|p| p.key.as_str())
    }

    /// Parameters that must carry a value before the request can be finalized.
    pub fn required_parameters(&self) -> impl Iterator<Item = &ParameterSpec> {
        self.parameters.iter().filter(|p| p.required)
    }
}

/// One parameter of a panel.
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterSpec {
    pub key: String,
    pub label: NonEmptyText,
    pub unit: Option<String>,
    pub required: bool,
    /// Input step precision (e.g. `0.1`), a hint for result entry.
    pub step: Option<f64>,
    pub kind: ParameterKind,
}

/// Closed set of parameter kinds.
#[derive(Clone, Debug, PartialEq)]
pub enum ParameterKind {
    Numeric(NumericRange),
    Qualitative(QualitativeDomain),
}

/// Reference and critical limits of a numeric parameter. Any bound may be absent.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct NumericRange {
    pub low: Option<f64>,
    pub high: Option<f64>,
    pub critical_low: Option<f64>,
    pub critical_high: Option<f64>,
}

impl NumericRange {
    /// A range with neither bound produces no automated flag.
    pub fn has_reference(&self) -> bool {
        self.low.is_some() || self.high.is_some()
    }
}

/// Enumerated domain of a qualitative parameter.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QualitativeDomain {
    /// Permitted values. Empty means free text.
    pub allowed: Vec<String>,
    /// Values interpreted as abnormal (matched trimmed, case-insensitively).
    pub abnormal: Vec<String>,
}

impl QualitativeDomain {
    pub fn is_abnormal(&self, value: &str) -> bool {
        let value = value.trim();
        self.abnormal.iter().any(|a| a.eq_ignore_ascii_case(value))
    }
}

// ============================================================================
// Public Panel operations
// ============================================================================

/// Panel file operations.
///
/// Zero-sized namespace; all methods are associated functions.
pub struct Panel;

impl Panel {
    /// Parse and validate a panel definition from YAML text.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Translation`] when the YAML does not match the schema (unknown keys,
    /// wrong types, unknown parameter kind) and [`WireError::InvalidPanel`] when it matches but
    /// breaks a panel invariant: duplicate keys, malformed ids, inverted ranges, non-positive
    /// step, critical limits inside the reference range, abnormal values outside the allowed
    /// domain.
    pub fn parse(yaml_text: &str) -> WireResult<PanelDefinition> {
        let wire: PanelWire = parse_yaml(yaml_text, "Panel")?;
        wire_to_domain(wire)
    }

    /// Render a panel definition as YAML text.
    pub fn render(panel: &PanelDefinition) -> WireResult<String> {
        let wire = domain_to_wire(panel);
        serde_yaml::to_string(&wire)
            .map_err(|e| WireError::Translation(format!("Failed to serialize panel: {e}")))
    }
}

// ============================================================================
// Wire types (internal)
// ============================================================================

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct PanelWire {
    panel_id: String,
    title: String,
    parameters: Vec<ParameterWire>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct ParameterWire {
    key: String,
    label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    unit: Option<String>,
    #[serde(default)]
    required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    step: Option<f64>,
    kind: KindWire,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
enum KindWire {
    Numeric {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        low: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        high: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        critical_low: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        critical_high: Option<f64>,
    },
    Qualitative {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        allowed: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        abnormal: Vec<String>,
    },
}

// ============================================================================
// Helper functions (internal)
// ============================================================================

fn is_identifier(value: &str) -> bool {
    !value.is_empty()
        && value
            .bytes()
            .all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-'))
}

fn invalid(panel_id: &str, message: String) -> WireError {
    WireError::InvalidPanel(format!("{panel_id}: {message}"))
}

fn wire_to_domain(wire: PanelWire) -> WireResult<PanelDefinition> {
    let panel_id_raw = wire.panel_id.trim().to_string();
    if !is_identifier(&panel_id_raw) {
        return Err(WireError::InvalidPanel(format!(
            "panel_id must be lowercase letters, digits, '_' or '-': '{}'",
            wire.panel_id
        )));
    }
    let panel_id = NonEmptyText::new(&panel_id_raw)
        .map_err(|_| WireError::InvalidPanel("panel_id cannot be empty".into()))?;
    let title = NonEmptyText::new(&wire.title)
        .map_err(|_| invalid(&panel_id_raw, "title cannot be empty".into()))?;

    if wire.parameters.is_empty() {
        return Err(invalid(&panel_id_raw, "panel has no parameters".into()));
    }

    let mut seen = HashSet::new();
    let mut parameters = Vec::with_capacity(wire.parameters.len());
    for param in wire.parameters {
        let key = param.key.trim().to_string();
        if !is_identifier(&key) {
            return Err(invalid(
                &panel_id_raw,
                format!("parameter key '{}' is not a valid identifier", param.key),
            ));
        }
        if !seen.insert(key.clone()) {
            return Err(invalid(
                &panel_id_raw,
                format!("duplicate parameter key '{key}'"),
            ));
        }

        let label = NonEmptyText::new(&param.label)
            .map_err(|_| invalid(&panel_id_raw, format!("parameter '{key}' has no label")))?;

        if let Some(step) = param.step {
            if !step.is_finite() || step <= 0.0 {
                return Err(invalid(
                    &panel_id_raw,
                    format!("parameter '{key}' step must be a positive number"),
                ));
            }
        }

        let kind = match param.kind {
            KindWire::Numeric {
                low,
                high,
                critical_low,
                critical_high,
            } => {
                let range = NumericRange {
                    low,
                    high,
                    critical_low,
                    critical_high,
                };
                validate_range(&range).map_err(|msg| {
                    invalid(&panel_id_raw, format!("parameter '{key}' {msg}"))
                })?;
                ParameterKind::Numeric(range)
            }
            KindWire::Qualitative { allowed, abnormal } => {
                let domain = QualitativeDomain {
                    allowed: allowed.iter().map(|v| v.trim().to_string()).collect(),
                    abnormal: abnormal.iter().map(|v| v.trim().to_string()).collect(),
                };
                validate_domain(&domain).map_err(|msg| {
                    invalid(&panel_id_raw, format!("parameter '{key}' {msg}"))
                })?;
                ParameterKind::Qualitative(domain)
            }
        };

        parameters.push(ParameterSpec {
            key,
            label,
            unit: param
                .unit
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty()),
            required: param.required,
            step: param.step,
            kind,
        });
    }

    Ok(PanelDefinition {
        panel_id,
        title,
        parameters,
    })
}

fn validate_range(range: &NumericRange) -> Result<(), String> {
    let bounds = [
        range.low,
        range.high,
        range.critical_low,
        range.critical_high,
    ];
    if bounds.iter().flatten().any(|b| !b.is_finite()) {
        return Err("has a non-finite bound".into());
    }
    if let (Some(low), Some(high)) = (range.low, range.high) {
        if low > high {
            return Err(format!("reference low {low} is above high {high}"));
        }
    }
    if let Some(critical_low) = range.critical_low {
        if range.low.is_some_and(|low| critical_low > low) {
            return Err("critical_low lies inside the reference range".into());
        }
    }
    if let Some(critical_high) = range.critical_high {
        if range.high.is_some_and(|high| critical_high < high) {
            return Err("critical_high lies inside the reference range".into());
        }
    }
    if let (Some(cl), Some(ch)) = (range.critical_low, range.critical_high) {
        if cl > ch {
            return Err(format!("critical_low {cl} is above critical_high {ch}"));
        }
    }
    Ok(())
}

fn validate_domain(domain: &QualitativeDomain) -> Result<(), String> {
    if domain.allowed.iter().any(|v| v.is_empty()) || domain.abnormal.iter().any(|v| v.is_empty())
    {
        return Err("has an empty qualitative value".into());
    }
    let mut seen = HashSet::new();
    for value in &domain.allowed {
        if !seen.insert(value.to_ascii_lowercase()) {
            return Err(format!("lists allowed value '{value}' twice"));
        }
    }
    if !domain.allowed.is_empty() {
        if let Some(stray) = domain
            .abnormal
            .iter()
            .find(|a| !domain.allowed.iter().any(|v| v.eq_ignore_ascii_case(a)))
        {
            return Err(format!("abnormal value '{stray}' is not an allowed value"));
        }
    }
    Ok(())
}

fn domain_to_wire(panel: &PanelDefinition) -> PanelWire {
    PanelWire {
        panel_id: panel.panel_id.to_string(),
        title: panel.title.to_string(),
        parameters: panel
            .parameters
            .iter()
            .map(|p| ParameterWire {
                key: p.key.clone(),
                label: p.label.to_string(),
                unit: p.unit.clone(),
                required: p.required,
                step: p.step,
                kind: match &p.kind {
                    ParameterKind::Numeric(range) => KindWire::Numeric {
                        low: range.low,
                        high: range.high,
                        critical_low: range.critical_low,
                        critical_high: range.critical_high,
                    },
                    ParameterKind::Qualitative(domain) => KindWire::Qualitative {
                        allowed: domain.allowed.clone(),
                        abnormal: domain.abnormal.clone(),
                    },
                },
            })
            .collect(),
    }
}
