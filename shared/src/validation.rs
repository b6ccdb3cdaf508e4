//! Input validation functions
//!
//! Registration and rotation inputs are checked here before any hashing or
//! database work happens.

use regex_lite::Regex;
use std::sync::OnceLock;

pub const HANDLE_MIN_LEN: usize = 3;
pub const HANDLE_MAX_LEN: usize = 32;
/// Upper bound keeps a single hash request from becoming a CPU lever.
pub const SECRET_MAX_LEN: usize = 128;

fn handle_regex() -> &'static Regex {
    static HANDLE: OnceLock<Regex> = OnceLock::new();
    HANDLE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").expect("valid handle regex"))
}

/// Validate a user handle
pub fn validate_handle(handle: &str) -> Result<(), String> {
    let len = handle.chars().count();
    if len < HANDLE_MIN_LEN {
        return Err(format!("Handle must be at least {} characters", HANDLE_MIN_LEN));
    }
    if len > HANDLE_MAX_LEN {
        return Err(format!("Handle must be at most {} characters", HANDLE_MAX_LEN));
    }
    if !handle_regex().is_match(handle) {
        return Err("Handle may only contain letters, digits, '.', '_' and '-'".to_string());
    }
    Ok(())
}

/// Validate a secret
///
/// No strength policy: any non-empty secret up to the length cap is accepted.
pub fn validate_secret(secret: &str) -> Result<(), String> {
    if secret.is_empty() {
        return Err("Secret is required".to_string());
    }
    if secret.len() > SECRET_MAX_LEN {
        return Err("Secret too long".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case("alice")]
    #[case("bob_99")]
    #[case("a.b-c")]
    #[case("Zed")]
    fn test_valid_handles(#[case] handle: &str) {
        assert!(validate_handle(handle).is_ok());
    }

    #[rstest]
    #[case("")]
    #[case("ab")]
    #[case("_alice")]
    #[case("alice smith")]
    #[case("alice;drop")]
    #[case("ålice")]
    fn test_invalid_handles(#[case] handle: &str) {
        assert!(validate_handle(handle).is_err());
    }

    #[test]
    fn test_handle_length_limit() {
        assert!(validate_handle(&"a".repeat(HANDLE_MAX_LEN)).is_ok());
        assert!(validate_handle(&"a".repeat(HANDLE_MAX_LEN + 1)).is_err());
    }

    #[rstest]
    #[case("password123", true)]
    #[case("S1", true)]
    #[case("x", true)]
    #[case("", false)]
    fn test_validate_secret(#[case] secret: &str, #[case] ok: bool) {
        assert_eq!(validate_secret(secret).is_ok(), ok);
    }

    #[test]
    fn test_secret_length_limit() {
        assert!(validate_secret(&"a".repeat(SECRET_MAX_LEN)).is_ok());
        assert!(validate_secret(&"a".repeat(SECRET_MAX_LEN + 1)).is_err());
    }

    proptest! {
        #[test]
        fn prop_generated_handles_are_accepted(handle in "[a-z0-9][a-z0-9_.-]{2,31}") {
            prop_assert!(validate_handle(&handle).is_ok());
        }

        #[test]
        fn prop_whitespace_is_never_part_of_a_handle(prefix in "[a-z]{2,10}", suffix in "[a-z]{1,10}") {
            let handle = format!("{} {}", prefix, suffix);
            prop_assert!(validate_handle(&handle).is_err());
        }
    }
}
