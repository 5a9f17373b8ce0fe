//! Validation & interpretation engine.
//!
//! Pure functions over a panel definition and an entered payload. Nothing here touches
//! storage or request status, so the same payload always yields the same flags.

use crate::actor::Actor;
use crate::error::MissingField;
use labflow_wire::{
    FlagTier, InterpretationFlag, NumericRange, PanelDefinition, ParameterKind, ParameterSpec,
    QualitativeDomain, ResultValue, Severity,
};
use std::collections::BTreeMap;

/// Flags every entered value of `payload` that the panel can interpret, in panel parameter
/// order.
///
/// Keys the panel does not declare are ignored, as are numeric parameters without a reference
/// range and values that cannot be read as numbers.
pub fn interpret(
    panel: &PanelDefinition,
    payload: &BTreeMap<String, ResultValue>,
) -> Vec<InterpretationFlag> {
    panel
        .parameters
        .iter()
        .filter_map(|spec| {
            let value = payload.get(&spec.key)?;
            interpret_parameter(spec, value)
        })
        .collect()
}

/// Flag for a single value, or `None` when the parameter yields no automated interpretation.
pub fn interpret_parameter(spec: &ParameterSpec, value: &ResultValue) -> Option<InterpretationFlag> {
    if value.is_blank() {
        return None;
    }
    let (tier, severity) = match &spec.kind {
        ParameterKind::Numeric(range) => classify_numeric(range, value.as_number()?)?,
        ParameterKind::Qualitative(domain) => classify_qualitative(domain, value),
    };
    Some(InterpretationFlag {
        key: spec.key.clone(),
        value: value.clone(),
        tier,
        severity,
    })
}

fn classify_numeric(range: &NumericRange, n: f64) -> Option<(FlagTier, Severity)> {
    if !range.has_reference() {
        return None;
    }
    let below_critical = range.critical_low.is_some_and(|limit| n < limit);
    let above_critical = range.critical_high.is_some_and(|limit| n > limit);

    let tier = if below_critical || range.low.is_some_and(|low| n < low) {
        FlagTier::Low
    } else if above_critical || range.high.is_some_and(|high| n > high) {
        FlagTier::High
    } else {
        FlagTier::Normal
    };

    let severity = if below_critical || above_critical {
        Severity::Critical
    } else if tier == FlagTier::Normal {
        Severity::Normal
    } else {
        Severity::Attention
    };
    Some((tier, severity))
}

fn classify_qualitative(domain: &QualitativeDomain, value: &ResultValue) -> (FlagTier, Severity) {
    if domain.is_abnormal(&value.as_text()) {
        (FlagTier::Abnormal, Severity::Attention)
    } else {
        (FlagTier::Normal, Severity::Normal)
    }
}

/// Mandatory fields that block finalization. Empty means ready.
///
/// A required parameter is missing when absent, blank, or (for numeric parameters) not
/// readable as a number. Technician name and license number are always mandatory.
pub fn check_completeness(
    panel: &PanelDefinition,
    payload: &BTreeMap<String, ResultValue>,
    actor: &Actor,
) -> Vec<MissingField> {
    let mut missing: Vec<MissingField> = panel
        .required_parameters()
        .filter(|spec| !is_present(spec, payload.get(&spec.key)))
        .map(|spec| MissingField::Parameter(spec.key.clone()))
        .collect();
    missing.extend(actor.missing_technician_fields());
    missing
}

fn is_present(spec: &ParameterSpec, value: Option<&ResultValue>) -> bool {
    match value {
        None => false,
        Some(value) if value.is_blank() => false,
        Some(value) => match spec.kind {
            ParameterKind::Numeric(_) => value.as_number().is_some(),
            ParameterKind::Qualitative(_) => true,
        },
    }
}
