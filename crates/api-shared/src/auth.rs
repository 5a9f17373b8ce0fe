/// Header carrying the API key on every guarded request.
pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing {API_KEY_HEADER} header")]
    Missing,
    #[error("invalid API key")]
    Invalid,
}

/// Validates the provided API key against the key configured at startup.
///
/// The expected key is resolved once by the binary; it is never re-read from the environment per
/// request.
///
/// # Errors
///
/// - [`AuthError::Missing`] if no key was sent,
/// - [`AuthError::Invalid`] if the key does not match.
pub fn validate_api_key(provided_key: Option<&str>, expected_key: &str) -> Result<(), AuthError> {
    let provided_key = provided_key.ok_or(AuthError::Missing)?;
    if keys_match(provided_key.trim().as_bytes(), expected_key.as_bytes()) {
        Ok(())
    } else {
        Err(AuthError::Invalid)
    }
}

/// Compares without short-circuiting on the first differing byte.
fn keys_match(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_matching_key() {
        assert_eq!(validate_api_key(Some("s3cret"), "s3cret"), Ok(()));
        assert_eq!(validate_api_key(Some(" s3cret "), "s3cret"), Ok(()));
    }

    #[test]
    fn rejects_missing_and_wrong_keys() {
        assert_eq!(validate_api_key(None, "s3cret"), Err(AuthError::Missing));
        assert_eq!(
            validate_api_key(Some("s3cre"), "s3cret"),
            Err(AuthError::Invalid)
        );
        assert_eq!(
            validate_api_key(Some("s3creT"), "s3cret"),
            Err(AuthError::Invalid)
        );
    }
}
