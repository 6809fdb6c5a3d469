//! Manifest data model and freshness/signature validation.
//!
//! Canonical serialization for signing goes through `serde_json::Value`,
//! whose `Map` is `BTreeMap`-backed (the `preserve_order` feature is not
//! enabled), giving sorted keys for free and matching the server's signer.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audit::{AuditEvent, AuditSink};
use crate::signature::{SignatureError, SignatureVerifier};

pub const MIN_NONCE_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub id: String,
    pub name: String,
    #[serde(rename = "version")]
    pub semantic_version: semver::Version,
    #[serde(rename = "checksum")]
    pub checksum_hex: String,
    #[serde(rename = "size")]
    pub size_bytes: u64,
    #[serde(rename = "environment")]
    pub declared_environment: Environment,
    pub download_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestBody {
    pub modules: Vec<ModuleDescriptor>,
    pub timestamp: DateTime<Utc>,
    pub nonce: String,
    pub environment: Environment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedManifest {
    pub body: ManifestBody,
    pub signature_base64: String,
}

/// The manifest after freshness, nonce, and signature checks have all
/// passed. `ModuleDescriptor.declared_environment`/`checksum_hex` are taken
/// as server-confirmed at this point.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedManifest {
    pub modules: Vec<ModuleDescriptor>,
    pub environment: Environment,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest timestamp is {0}s in the future")]
    TimestampInFuture(i64),
    #[error("manifest is {0}s old, exceeding the replay window")]
    TooOld(i64),
    #[error("nonce must be at least {MIN_NONCE_LEN} characters")]
    InvalidNonce,
    #[error("signature verification failed: {0}")]
    InvalidSignature(#[from] SignatureError),
    #[error("environment mismatch: expected {expected}, got {actual}")]
    EnvironmentMismatch { expected: Environment, actual: Environment },
    #[error("failed to canonicalize manifest body: {0}")]
    Canonicalization(#[from] serde_json::Error),
}

impl ManifestError {
    /// Freshness/signature/environment failures are all fatal for the
    /// attempt; none of them are worth retrying without a new manifest.
    pub fn is_recoverable(&self) -> bool {
        false
    }
}

/// Serializes `body` (without the signature) to the exact bytes the server
/// signed: sorted keys, ISO-8601 timestamp, UTF-8.
pub fn canonical_bytes(body: &ManifestBody) -> Result<Vec<u8>, serde_json::Error> {
    let value = serde_json::to_value(body)?;
    serde_json::to_vec(&value)
}

pub struct ManifestValidator {
    verifier: Arc<dyn SignatureVerifier>,
    audit: Arc<dyn AuditSink>,
    max_manifest_age: Duration,
    enforce_environment_match: bool,
}

impl ManifestValidator {
    pub fn new(
        verifier: Arc<dyn SignatureVerifier>,
        audit: Arc<dyn AuditSink>,
        max_manifest_age: Duration,
        enforce_environment_match: bool,
    ) -> Self {
        ManifestValidator {
            verifier,
            audit,
            max_manifest_age,
            enforce_environment_match,
        }
    }

    pub fn validate(
        &self,
        signed: &SignedManifest,
        now: DateTime<Utc>,
        current_env: Environment,
    ) -> Result<ValidatedManifest, ManifestError> {
        let age = now - signed.body.timestamp;

        if age < Duration::seconds(-60) {
            self.audit.emit(AuditEvent::ManifestTimestampInFuture);
            return Err(ManifestError::TimestampInFuture(-age.num_seconds()));
        }
        if age >= self.max_manifest_age {
            self.audit
                .emit(AuditEvent::ReplayAttemptDetected { age_seconds: age.num_seconds() });
            return Err(ManifestError::TooOld(age.num_seconds()));
        }
        if signed.body.nonce.len() < MIN_NONCE_LEN {
            return Err(ManifestError::InvalidNonce);
        }

        let canonical = canonical_bytes(&signed.body)?;
        if let Err(e) = self.verifier.verify(&canonical, &signed.signature_base64) {
            self.audit.emit(AuditEvent::SignatureVerificationFailed);
            return Err(ManifestError::InvalidSignature(e));
        }
        self.audit.emit(AuditEvent::SignatureVerified { algorithm: "rsa-pkcs1v15-sha256".into() });

        if self.enforce_environment_match && signed.body.environment != current_env {
            return Err(ManifestError::EnvironmentMismatch {
                expected: current_env,
                actual: signed.body.environment,
            });
        }

        Ok(ValidatedManifest {
            modules: signed.body.modules.clone(),
            environment: signed.body.environment,
            timestamp: signed.body.timestamp,
        })
    }
}
