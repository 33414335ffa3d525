//! Shared secrets for inbound trigger endpoints.

use crate::error::RegistrationError;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rootcause::Report;

const SECRET_BYTES: usize = 32;

/// Generates a random URL-safe secret.
///
/// The alphabet (`A-Z a-z 0-9 - _`) is also what Telegram accepts for webhook
/// secret tokens.
///
/// # Errors
///
/// Returns an error if the operating system RNG is unavailable.
pub fn generate_secret() -> Result<String, Report<RegistrationError>> {
    let mut bytes = [0_u8; SECRET_BYTES];
    getrandom::fill(&mut bytes).map_err(|e| RegistrationError::SecretGeneration {
        reason: e.to_string(),
    })?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Compares two secrets in time independent of where they differ.
#[must_use]
pub fn secrets_match(expected: &str, provided: &str) -> bool {
    let expected = expected.as_bytes();
    let provided = provided.as_bytes();
    if expected.len() != provided.len() {
        return false;
    }
    expected
        .iter()
        .zip(provided)
        .fold(0_u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_url_safe_and_distinct() {
        let first = generate_secret().expect("rng");
        let second = generate_secret().expect("rng");

        assert_eq!(first.len(), 43);
        assert_ne!(first, second);
        assert!(
            first
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn comparison_requires_exact_match() {
        assert!(secrets_match("abc", "abc"));
        assert!(!secrets_match("abc", "abd"));
        assert!(!secrets_match("abc", "ab"));
        assert!(!secrets_match("abc", ""));
    }
}
