//! Signed tokens and sealed payloads
//!
//! Workers and browser sessions talk to the broker through two opaque shapes:
//!
//! - **Token**: `"<value>.<signature>"` - a plain string (worker id, batch id)
//!   with a signature appended. Verifying returns the original value.
//! - **Sealed blob**: `"<base64url(json)>.<signature>"` - a JSON document that
//!   cannot be altered without the shared secret.
//!
//! # Signature Algorithm
//!
//! 1. Take the exact payload text (value or base64url JSON)
//! 2. Append the shared secret
//! 3. Calculate SHA-256 of the concatenated string
//! 4. Render as 64 lowercase hex characters
//!
//! This module contains ONLY pure functions. The broker and the worker client
//! wrap them with their own transport code.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Separator between payload and signature
const SEPARATOR: char = '.';

// ========================================
// Error Types
// ========================================

/// Envelope verification error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// Input has no `.signature` suffix
    MissingSignature,

    /// Signature does not match the payload
    InvalidSignature,

    /// Sealed payload is not valid base64url
    Decode(String),

    /// Sealed payload is not valid JSON for the requested type
    Parse(String),

    /// Value could not be serialized for sealing
    Serialize(String),
}

impl std::fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvelopeError::MissingSignature => write!(f, "Missing signature"),
            EnvelopeError::InvalidSignature => write!(f, "Invalid signature"),
            EnvelopeError::Decode(err) => write!(f, "Decode error: {}", err),
            EnvelopeError::Parse(err) => write!(f, "Parse error: {}", err),
            EnvelopeError::Serialize(err) => write!(f, "Serialize error: {}", err),
        }
    }
}

impl std::error::Error for EnvelopeError {}

// ========================================
// Signer
// ========================================

/// Signs and verifies tokens and sealed payloads with one shared secret
#[derive(Clone)]
pub struct Signer {
    secret: String,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").finish_non_exhaustive()
    }
}

impl Signer {
    /// Create a signer from a shared secret
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Create a signer with a random secret
    ///
    /// Used for browser sessions, which never need to outlive the process.
    pub fn generate() -> Self {
        use rand::Rng;

        let secret: String = rand::thread_rng()
            .sample_iter(&rand::distributions::Alphanumeric)
            .take(48)
            .map(char::from)
            .collect();
        Self { secret }
    }

    /// Sign a plain value, producing `"<value>.<signature>"`
    ///
    /// # Examples
    ///
    /// ```
    /// use genreml_common::envelope::Signer;
    ///
    /// let signer = Signer::new("secret");
    /// let token = signer.sign("worker-1");
    /// assert!(token.starts_with("worker-1."));
    /// assert_eq!(signer.verify(&token).unwrap(), "worker-1");
    /// ```
    pub fn sign(&self, value: &str) -> String {
        format!("{}{}{}", value, SEPARATOR, calculate_signature(value, &self.secret))
    }

    /// Verify a token and return the signed value
    pub fn verify(&self, token: &str) -> Result<String, EnvelopeError> {
        let token = token.trim();
        let (value, signature) = token
            .rsplit_once(SEPARATOR)
            .ok_or(EnvelopeError::MissingSignature)?;

        let calculated = calculate_signature(value, &self.secret);
        if !constant_time_eq(signature.as_bytes(), calculated.as_bytes()) {
            return Err(EnvelopeError::InvalidSignature);
        }

        Ok(value.to_string())
    }

    /// Serialize a value to JSON and seal it
    ///
    /// # Examples
    ///
    /// ```
    /// use genreml_common::envelope::Signer;
    /// use serde_json::{json, Value};
    ///
    /// let signer = Signer::new("secret");
    /// let blob = signer.seal(&json!({"uid": "abc"})).unwrap();
    /// let value: Value = signer.unseal(&blob).unwrap();
    /// assert_eq!(value["uid"], "abc");
    /// ```
    pub fn seal<T: Serialize>(&self, value: &T) -> Result<String, EnvelopeError> {
        let json = serde_json::to_vec(value).map_err(|e| EnvelopeError::Serialize(e.to_string()))?;
        Ok(self.sign(&URL_SAFE_NO_PAD.encode(json)))
    }

    /// Verify a sealed blob and deserialize its JSON payload
    pub fn unseal<T: DeserializeOwned>(&self, blob: &str) -> Result<T, EnvelopeError> {
        let encoded = self.verify(blob)?;
        let json = URL_SAFE_NO_PAD
            .decode(encoded.as_bytes())
            .map_err(|e| EnvelopeError::Decode(e.to_string()))?;
        serde_json::from_slice(&json).map_err(|e| EnvelopeError::Parse(e.to_string()))
    }
}

// ========================================
// Signature Calculation
// ========================================

/// Calculate the signature of a payload
///
/// # Examples
///
/// ```
/// use genreml_common::envelope::calculate_signature;
///
/// let signature = calculate_signature("worker-1", "secret");
/// assert_eq!(signature.len(), 64); // SHA-256 is 64 hex chars
/// ```
pub fn calculate_signature(payload: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// ========================================
// Tests
// ========================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Finished {
        batch_id: String,
        uid: String,
        predictions: String,
    }

    #[test]
    fn test_signature_algorithm() {
        let signature = calculate_signature("worker-1", "secret");

        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));

        // Same input, same signature
        assert_eq!(signature, calculate_signature("worker-1", "secret"));

        // Different secret, different signature
        assert_ne!(signature, calculate_signature("worker-1", "other"));
    }

    #[test]
    fn test_valid_token_accepted() {
        let signer = Signer::new("secret");
        let token = signer.sign("worker-1");
        assert_eq!(signer.verify(&token), Ok("worker-1".to_string()));
    }

    #[test]
    fn test_value_containing_separator() {
        let signer = Signer::new("secret");
        let token = signer.sign("host.example.com");
        assert_eq!(signer.verify(&token).unwrap(), "host.example.com");
    }

    #[test]
    fn test_token_from_other_secret_rejected() {
        let token = Signer::new("secret").sign("worker-1");
        assert_eq!(
            Signer::new("wrong").verify(&token),
            Err(EnvelopeError::InvalidSignature)
        );
    }

    #[test]
    fn test_tampered_token_rejected() {
        let signer = Signer::new("secret");
        let token = signer.sign("worker-1").replacen("worker-1", "worker-2", 1);
        assert_eq!(signer.verify(&token), Err(EnvelopeError::InvalidSignature));
    }

    #[test]
    fn test_unsigned_value_rejected() {
        let signer = Signer::new("secret");
        assert_eq!(signer.verify("worker1"), Err(EnvelopeError::MissingSignature));
    }

    #[test]
    fn test_seal_and_unseal() {
        let signer = Signer::new("secret");
        let finished = Finished {
            batch_id: "b1".to_string(),
            uid: "u1".to_string(),
            predictions: "Rock|Pop".to_string(),
        };

        let blob = signer.seal(&finished).unwrap();
        let opened: Finished = signer.unseal(&blob).unwrap();
        assert_eq!(opened, finished);
    }

    #[test]
    fn test_forged_blob_rejected() {
        let blob = Signer::new("attacker").seal(&serde_json::json!({"uid": "u1"})).unwrap();
        let result: Result<serde_json::Value, _> = Signer::new("secret").unseal(&blob);
        assert_eq!(result.unwrap_err(), EnvelopeError::InvalidSignature);
    }

    #[test]
    fn test_sealed_wrong_shape_is_parse_error() {
        let signer = Signer::new("secret");
        let blob = signer.seal(&serde_json::json!({"unexpected": true})).unwrap();
        let result: Result<Finished, _> = signer.unseal(&blob);
        assert!(matches!(result, Err(EnvelopeError::Parse(_))));
    }

    #[test]
    fn test_generated_signers_differ() {
        let a = Signer::generate();
        let b = Signer::generate();
        let token = a.sign("batch");
        assert!(a.verify(&token).is_ok());
        assert!(b.verify(&token).is_err());
    }

    #[test]
    fn test_debug_hides_secret() {
        let signer = Signer::new("very-secret-value");
        assert!(!format!("{:?}", signer).contains("very-secret-value"));
    }
}
