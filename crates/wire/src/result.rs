//! Result values and interpretation flags.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single entered result: a number, or free text for qualitative parameters.
///
/// On the wire a YAML/JSON number becomes [`ResultValue::Number`] and a string becomes
/// [`ResultValue::Text`]. Numeric parameters also accept numeric text (`"9.5"`) so values typed
/// into a text field are not lost.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultValue {
    Number(f64),
    Text(String),
}

impl ResultValue {
    /// Reads the value as a finite number, parsing numeric text.
    pub fn as_number(&self) -> Option<f64> {
        let n = match self {
            ResultValue::Number(n) => *n,
            ResultValue::Text(t) => t.trim().parse::<f64>().ok()?,
        };
        n.is_finite().then_some(n)
    }

    /// True for whitespace-only text and non-finite numbers.
    pub fn is_blank(&self) -> bool {
        match self {
            ResultValue::Number(n) => !n.is_finite(),
            ResultValue::Text(t) => t.trim().is_empty(),
        }
    }

    /// Trimmed textual form, used for qualitative matching.
    pub fn as_text(&self) -> String {
        match self {
            ResultValue::Number(n) => n.to_string(),
            ResultValue::Text(t) => t.trim().to_string(),
        }
    }
}

impl fmt::Display for ResultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultValue::Number(n) => write!(f, "{n}"),
            ResultValue::Text(t) => f.write_str(t.trim()),
        }
    }
}

impl From<f64> for ResultValue {
    fn from(value: f64) -> Self {
        ResultValue::Number(value)
    }
}

impl From<&str> for ResultValue {
    fn from(value: &str) -> Self {
        ResultValue::Text(value.to_string())
    }
}

/// Interpretation tier of a value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagTier {
    Normal,
    Low,
    High,
    /// Qualitative value matching a configured abnormal value.
    Abnormal,
}

impl FlagTier {
    pub fn as_str(self) -> &'static str {
        match self {
            FlagTier::Normal => "normal",
            FlagTier::Low => "low",
            FlagTier::High => "high",
            FlagTier::Abnormal => "abnormal",
        }
    }
}

impl fmt::Display for FlagTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Presentation class of a flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Normal,
    Attention,
    /// Outside a critical (panic) limit.
    Critical,
}

/// Computed interpretation of one parameter value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InterpretationFlag {
    pub key: String,
    pub value: ResultValue,
    pub tier: FlagTier,
    pub severity: Severity,
}

/// The frozen result payload of a finalized request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResultRecord {
    pub values: BTreeMap<String, ResultValue>,
    #[serde(default)]
    pub flags: Vec<InterpretationFlag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_text_is_read_as_number() {
        assert_eq!(ResultValue::from(" 9.5 ").as_number(), Some(9.5));
        assert_eq!(ResultValue::from(9.5).as_number(), Some(9.5));
        assert_eq!(ResultValue::from("trace").as_number(), None);
        assert_eq!(ResultValue::Number(f64::NAN).as_number(), None);
    }

    #[test]
    fn blank_detection() {
        assert!(ResultValue::from("  ").is_blank());
        assert!(ResultValue::Number(f64::INFINITY).is_blank());
        assert!(!ResultValue::from("negative").is_blank());
        assert!(!ResultValue::from(0.0).is_blank());
    }

    #[test]
    fn untagged_yaml_distinguishes_numbers_from_text() {
        let values: BTreeMap<String, ResultValue> =
            serde_yaml::from_str("hemoglobin: 9.5\ncolor: yellow\nwbc: \"7.2\"\n").unwrap();
        assert_eq!(values["hemoglobin"], ResultValue::Number(9.5));
        assert_eq!(values["color"], ResultValue::Text("yellow".into()));
        assert_eq!(values["wbc"], ResultValue::Text("7.2".into()));
    }
}
