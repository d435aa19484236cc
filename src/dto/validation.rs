//! Validation helpers for DTOs.

use validator::ValidationError;

/// Longest room or user identifier accepted on the wire.
pub const MAX_ID_LEN: usize = 64;

/// Validates that a room or user identifier is 1 to 64 characters of `[A-Za-z0-9_-]`.
///
/// # Examples
///
/// ```ignore
/// validate_path_id("ABCD1234")   // Ok
/// validate_path_id("user_01-x")  // Ok
/// validate_path_id("")           // Err - empty
/// validate_path_id("a/b")        // Err - invalid character
/// ```
pub fn validate_path_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() || id.len() > MAX_ID_LEN {
        let mut err = ValidationError::new("id_length");
        err.message = Some(
            format!(
                "identifier must be between 1 and {MAX_ID_LEN} characters (got {})",
                id.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        let mut err = ValidationError::new("id_format");
        err.message =
            Some("identifier may only contain ASCII letters, digits, '-' and '_'".into());
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_room_codes_and_uuids() {
        assert!(validate_path_id("ABCD1234").is_ok());
        assert!(validate_path_id("3f2b8c1e-9d4a-4f6b-8e2a-1c5d7e9f0a1b").is_ok());
        assert!(validate_path_id("user_01").is_ok());
    }

    #[test]
    fn rejects_bad_lengths() {
        assert!(validate_path_id("").is_err());
        assert!(validate_path_id(&"a".repeat(MAX_ID_LEN + 1)).is_err());
        assert!(validate_path_id(&"a".repeat(MAX_ID_LEN)).is_ok());
    }

    #[test]
    fn rejects_separators_and_spaces() {
        assert!(validate_path_id("a/b").is_err());
        assert!(validate_path_id("a b").is_err());
        assert!(validate_path_id("é").is_err());
    }
}
