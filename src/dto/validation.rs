//! Validation helpers for DTOs.

use validator::ValidationError;

/// Rejects strings that are empty once surrounding whitespace is removed.
pub fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("must not be blank".into());
        return Err(err);
    }
    Ok(())
}

/// Canonical form of a user-typed join code: trimmed and upper-cased.
///
/// # Examples
///
/// ```ignore
/// normalize_join_code(" abc234 ") // Some("ABC234")
/// normalize_join_code("ab-23")    // None - not alphanumeric
/// ```
pub fn normalize_join_code(code: &str) -> Option<String> {
    let code = code.trim();
    if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(code.to_ascii_uppercase())
}
