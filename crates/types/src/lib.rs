//! Validated text types shared across the labflow crates.
//!
//! Free text reaching the core (names, identifiers, license numbers) is wrapped in one of these
//! types at the boundary, so blank or malformed values never make it into a stored record.

/// Errors that can occur when creating validated text types.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TextError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    Empty,

    /// A license number contained characters outside `[A-Za-z0-9-]`
    #[error("license number may only contain letters, digits and '-': {0}")]
    InvalidLicenseNumber(String),
}

/// A string type that guarantees non-empty content.
///
/// The input is trimmed of leading and trailing whitespace during construction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText` from the given input.
    ///
    /// # Errors
    ///
    /// Returns [`TextError::Empty`] if the trimmed input is empty.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Builds a `NonEmptyText` from optional input, treating `None` and blank input alike.
    pub fn from_optional(input: Option<&str>) -> Option<Self> {
        input.and_then(|s| Self::new(s).ok())
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the wrapper and returns the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for NonEmptyText {
    type Err = TextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl serde::Serialize for NonEmptyText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NonEmptyText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NonEmptyText::new(&s).map_err(serde::de::Error::custom)
    }
}

/// A professional license or registration number (e.g. a PRC number).
///
/// Stored upper-cased so that `prc-0012345` and `PRC-0012345` identify the same technician.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LicenseNumber(NonEmptyText);

impl LicenseNumber {
    /// Parses a license number.
    ///
    /// # Errors
    ///
    /// Returns [`TextError::Empty`] for blank input and [`TextError::InvalidLicenseNumber`] when
    /// the value contains whitespace or punctuation other than `-`.
    pub fn parse(input: impl AsRef<str>) -> Result<Self, TextError> {
        let text = NonEmptyText::new(input)?;
        if !text
            .as_str()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(TextError::InvalidLicenseNumber(text.into_inner()));
        }
        let upper = text.as_str().to_ascii_uppercase();
        Ok(Self(NonEmptyText(upper)))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl std::fmt::Display for LicenseNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl serde::Serialize for LicenseNumber {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for LicenseNumber {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        LicenseNumber::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_empty_text_trims_input() {
        let text = NonEmptyText::new("  Maria Santos \n").unwrap();
        assert_eq!(text.as_str(), "Maria Santos");
    }

    #[test]
    fn non_empty_text_rejects_whitespace() {
        assert_eq!(NonEmptyText::new("   ").unwrap_err(), TextError::Empty);
        assert!(NonEmptyText::from_optional(Some("\t")).is_none());
        assert!(NonEmptyText::from_optional(None).is_none());
    }

    #[test]
    fn license_number_is_normalised_to_upper_case() {
        let license = LicenseNumber::parse(" prc-0012345 ").unwrap();
        assert_eq!(license.as_str(), "PRC-0012345");
        assert_eq!(license, LicenseNumber::parse("PRC-0012345").unwrap());
    }

    #[test]
    fn license_number_rejects_embedded_whitespace() {
        let err = LicenseNumber::parse("PRC 001").unwrap_err();
        assert!(matches!(err, TextError::InvalidLicenseNumber(_)));
    }

    #[test]
    fn deserialising_blank_text_fails() {
        let result: Result<NonEmptyText, _> = serde_yaml::from_str("\"  \"");
        assert!(result.is_err());
    }
}
