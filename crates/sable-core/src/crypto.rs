//! # Hash/Signature Service
//!
//! Hashes the canonical string and produces the device signature; verifies
//! the gateway's counter-signature on success responses.
//!
//! ## Signing Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Signature Flow                                   │
//! │                                                                         │
//! │  canonical string (UTF-8)                                              │
//! │       │                                                                 │
//! │       ├──► SHA-256 ──► Base64 ──► receipt_hash                         │
//! │       │                           (next receipt chains to this)        │
//! │       │                                                                 │
//! │       └──► Ed25519(device key) ──► Base64 ──► device_signature         │
//! │                                                                         │
//! │  gateway response:                                                     │
//! │       receipt_hash ──► Ed25519-verify(gateway key) ──► accept/reject   │
//! │                                                                         │
//! │  A 200 response with a missing or malformed counter-signature is a     │
//! │  FULL submission failure, decided by the submitter, not here.          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::types::DeviceSignature;

// =============================================================================
// Crypto Errors
// =============================================================================

/// Key material and signature failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// Signing seed is not exactly 32 bytes.
    #[error("Invalid signing seed: expected 32 bytes, got {0}")]
    InvalidSeed(usize),

    /// Verifying key bytes do not describe a valid public key.
    #[error("Invalid verifying key")]
    InvalidVerifyingKey,

    /// A Base64 field could not be decoded.
    #[error("Malformed Base64 in {field}")]
    MalformedBase64 { field: &'static str },

    /// Signature bytes have the wrong length.
    #[error("Malformed signature: expected 64 bytes, got {0}")]
    MalformedSignature(usize),

    /// The signature does not verify against the expected key.
    #[error("Signature verification failed")]
    VerificationFailed,
}

// =============================================================================
// Receipt Signer
// =============================================================================

/// Signs canonical strings with a device's Ed25519 key.
///
/// One signer per device; key material comes from the device registry and
/// is never logged.
pub struct ReceiptSigner {
    signing_key: SigningKey,
}

impl ReceiptSigner {
    /// Creates a signer from a 32-byte seed.
    pub fn from_seed(seed: &[u8]) -> Result<Self, CryptoError> {
        let seed: [u8; 32] = seed
            .try_into()
            .map_err(|_| CryptoError::InvalidSeed(seed.len()))?;
        Ok(ReceiptSigner {
            signing_key: SigningKey::from_bytes(&seed),
        })
    }

    /// Hashes and signs a canonical string.
    ///
    /// The hash is SHA-256 over the UTF-8 bytes; the signature is Ed25519
    /// over the same bytes (not over the digest). Both are Base64.
    pub fn sign(&self, canonical: &str) -> DeviceSignature {
        let digest = Sha256::digest(canonical.as_bytes());
        let signature = self.signing_key.sign(canonical.as_bytes());

        DeviceSignature {
            hash: BASE64.encode(digest),
            signature: BASE64.encode(signature.to_bytes()),
        }
    }

    /// The device's verifying (public) key bytes, for registration.
    pub fn verifying_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }
}

// Keep key material out of Debug output.
impl std::fmt::Debug for ReceiptSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiptSigner").finish_non_exhaustive()
    }
}

// =============================================================================
// Gateway Verifier
// =============================================================================

/// Verifies the gateway's counter-signature over a device receipt hash.
#[derive(Clone)]
pub struct GatewayVerifier {
    verifying_key: VerifyingKey,
}

impl GatewayVerifier {
    /// Creates a verifier from the gateway's 32-byte public key.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let verifying_key =
            VerifyingKey::from_bytes(bytes).map_err(|_| CryptoError::InvalidVerifyingKey)?;
        Ok(GatewayVerifier { verifying_key })
    }

    /// Creates a verifier from a Base64-encoded public key.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|_| CryptoError::MalformedBase64 {
                field: "gateway verifying key",
            })?;
        let bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidVerifyingKey)?;
        Self::from_bytes(&bytes)
    }

    /// Checks the gateway counter-signature (Base64) over the device
    /// receipt hash (Base64, as sent in the submission payload).
    ///
    /// Returns an error for malformed material as well as for a signature
    /// that does not verify - the caller treats both as submission
    /// failure.
    pub fn verify(&self, receipt_hash_b64: &str, signature_b64: &str) -> Result<(), CryptoError> {
        let signature_bytes =
            BASE64
                .decode(signature_b64)
                .map_err(|_| CryptoError::MalformedBase64 {
                    field: "gateway signature",
                })?;
        let signature_len = signature_bytes.len();
        let signature_bytes: [u8; 64] = signature_bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::MalformedSignature(signature_len))?;
        let signature = Signature::from_bytes(&signature_bytes);

        self.verifying_key
            .verify(receipt_hash_b64.as_bytes(), &signature)
            .map_err(|_| CryptoError::VerificationFailed)
    }
}

impl std::fmt::Debug for GatewayVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayVerifier").finish_non_exhaustive()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
