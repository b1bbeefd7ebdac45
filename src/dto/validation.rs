//! Validation helpers for DTOs.

use validator::ValidationError;

/// Longest session key accepted on the HTTP surface.
pub const MAX_SESSION_KEY_LEN: usize = 64;

/// Validates that a session key is a non-empty nickname made of `[A-Za-z0-9_.-]`.
///
/// # Examples
///
/// ```ignore
/// validate_session_key("alice")      // Ok
/// validate_session_key("worship.team-2") // Ok
/// validate_session_key("alice/bob")  // Err - separator
/// ```
pub fn validate_session_key(key: &str) -> Result<(), ValidationError> {
    if key.is_empty() || key.len() > MAX_SESSION_KEY_LEN {
        let mut err = ValidationError::new("session_key_length");
        err.message = Some(
            format!(
                "Session key must be between 1 and {MAX_SESSION_KEY_LEN} characters (got {})",
                key.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        let mut err = ValidationError::new("session_key_format");
        err.message = Some("Session key may only contain letters, digits, '_', '-' and '.'".into());
        return Err(err);
    }

    Ok(())
}
