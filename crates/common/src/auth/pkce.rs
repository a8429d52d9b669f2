//! PKCE (Proof Key for Code Exchange) for OAuth 2.0
//!
//! Implements RFC 7636 with the S256 method. Public clients cannot keep a
//! secret, so the verifier binds the authorization code to this process.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Number of random bytes behind verifiers and state tokens (43 chars encoded).
const RANDOM_BYTES: usize = 32;

fn random_urlsafe() -> String {
    let mut bytes = [0u8; RANDOM_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate a code verifier: 32 random bytes, base64url without padding.
#[must_use]
pub fn generate_code_verifier() -> String {
    random_urlsafe()
}

/// `BASE64URL(SHA256(ASCII(code_verifier)))`
#[must_use]
pub fn generate_code_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Generate a random state token for CSRF protection.
#[must_use]
pub fn generate_state() -> String {
    random_urlsafe()
}

/// Compare the state sent with the one received, in constant time.
#[must_use]
pub fn validate_state(expected: &str, actual: &str) -> bool {
    let (expected, actual) = (expected.as_bytes(), actual.as_bytes());
    if expected.len() != actual.len() {
        return false;
    }
    expected.iter().zip(actual).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
}

/// Verifier, challenge and state for one authorization request.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    /// Kept secret until the code exchange
    pub code_verifier: String,

    /// Sent with the authorization request
    pub code_challenge: String,

    /// Must round-trip through the redirect unchanged
    pub state: String,
}

impl PkceChallenge {
    #[must_use]
    pub fn generate() -> Self {
        let code_verifier = generate_code_verifier();
        let code_challenge = generate_code_challenge(&code_verifier);
        Self { code_verifier, code_challenge, state: generate_state() }
    }

    /// Always `"S256"`.
    #[must_use]
    pub fn challenge_method(&self) -> &'static str {
        "S256"
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for auth::pkce.
    use super::*;

    /// Validates `generate_code_challenge` against the RFC 7636 Appendix B
    /// example.
    ///
    /// Assertions:
    /// - Confirms the challenge equals the published value.
    #[test]
    fn challenge_matches_rfc_example() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(generate_code_challenge(verifier), "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    /// Validates `PkceChallenge::generate` output shape.
    ///
    /// Assertions:
    /// - Verifier length is within the RFC 7636 43-128 range.
    /// - No padding or non URL-safe characters appear.
    /// - The challenge is derived from the verifier.
    #[test]
    fn generated_challenge_is_urlsafe_and_consistent() {
        let challenge = PkceChallenge::generate();

        assert!((43..=128).contains(&challenge.code_verifier.len()));
        for value in [&challenge.code_verifier, &challenge.code_challenge, &challenge.state] {
            assert!(!value.contains('='));
            assert!(!value.contains('+'));
            assert!(!value.contains('/'));
        }
        assert_eq!(challenge.code_challenge, generate_code_challenge(&challenge.code_verifier));
        assert_eq!(challenge.challenge_method(), "S256");
    }

    #[test]
    fn challenges_are_unique() {
        let first = PkceChallenge::generate();
        let second = PkceChallenge::generate();
        assert_ne!(first.code_verifier, second.code_verifier);
        assert_ne!(first.state, second.state);
    }

    #[test]
    fn state_validation() {
        assert!(validate_state("abc", "abc"));
        assert!(!validate_state("abc", "abd"));
        assert!(!validate_state("abc", "abcd"));
    }
}
