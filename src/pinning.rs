//! Certificate pinning.
//!
//! Raw TLS and transport parsing are out of scope for this crate (owned by
//! the external HTTP client); the pinner's input is the leaf certificate's
//! already-extracted SPKI DER bytes, handed in via the certificate-challenge
//! hook. Comparison only needs `sha2` + `base64`, both already used
//! elsewhere in this crate.

use base64::Engine;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PinningError {
    #[error("no certificate presented")]
    NoCertificate,
    #[error("could not extract a public key from the certificate")]
    NoExtractablePublicKey,
    #[error("certificate pin mismatch: {reason}")]
    NoMatch { reason: String },
}

impl PinningError {
    pub fn is_recoverable(&self) -> bool {
        false
    }

    pub fn reason(&self) -> String {
        match self {
            PinningError::NoCertificate => "no certificate presented".to_string(),
            PinningError::NoExtractablePublicKey => "no extractable public key".to_string(),
            PinningError::NoMatch { reason } => reason.clone(),
        }
    }
}

/// What the pinner was asked to evaluate for one TLS handshake.
pub struct PinningChallenge<'a> {
    pub host: &'a str,
    /// Subject public key info, DER-encoded, of the leaf certificate —
    /// `None` if the handshake presented no certificate or it could not be
    /// extracted upstream.
    pub leaf_spki_der: Option<&'a [u8]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinningDecision {
    Accept,
    Cancel,
}

pub struct CertificatePinner {
    pinned_spki_sha256_base64: Vec<String>,
    allow_insecure_localhost: bool,
}

impl CertificatePinner {
    pub fn new(pinned_spki_sha256_base64: Vec<String>, allow_insecure_localhost: bool) -> Self {
        CertificatePinner {
            pinned_spki_sha256_base64,
            allow_insecure_localhost,
        }
    }

    pub fn decide(&self, challenge: &PinningChallenge<'_>) -> Result<(PinningDecision, String), PinningError> {
        if self.allow_insecure_localhost && is_localhost(challenge.host) {
            return Ok((PinningDecision::Accept, String::new()));
        }
        if self.pinned_spki_sha256_base64.is_empty() {
            // No pins configured: pinning is off, not "everything rejected."
            return Ok((PinningDecision::Accept, String::new()));
        }

        let spki = challenge.leaf_spki_der.ok_or(PinningError::NoCertificate)?;
        if spki.is_empty() {
            return Err(PinningError::NoExtractablePublicKey);
        }

        let digest = Sha256::digest(spki);
        let hash = base64::engine::general_purpose::STANDARD.encode(digest);

        if self.pinned_spki_sha256_base64.iter().any(|p| p == &hash) {
            Ok((PinningDecision::Accept, hash))
        } else {
            Err(PinningError::NoMatch {
                reason: format!("{hash} not in pinned set"),
            })
        }
    }
}

fn is_localhost(host: &str) -> bool {
    host == "localhost" || host == "127.0.0.1" || host == "::1"
}
