//! SHA-256/SHA-512 digest computation and comparison.
//!
//! Grounded on the teacher's streaming `verify_checksum()` (hash a file in
//! fixed-size chunks rather than reading it whole into memory).

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;

const READ_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Sha256,
    Sha512,
}

impl Default for ChecksumAlgorithm {
    fn default() -> Self {
        ChecksumAlgorithm::Sha256
    }
}

impl ChecksumAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Sha512 => "sha512",
        }
    }
}

#[derive(Debug, Error)]
pub enum ChecksumError {
    #[error("I/O error hashing file: {0}")]
    Io(#[from] io::Error),
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    Mismatch { expected: String, actual: String },
}

impl ChecksumError {
    pub fn is_recoverable(&self) -> bool {
        false
    }
}

/// Computes and compares digests. Stateless; safe to share across attempts.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChecksumEngine;

impl ChecksumEngine {
    pub fn new() -> Self {
        ChecksumEngine
    }

    pub fn hash_file(&self, path: &Path, algorithm: ChecksumAlgorithm) -> Result<String, ChecksumError> {
        let mut file = File::open(path)?;
        let mut buf = [0u8; READ_CHUNK_SIZE];
        match algorithm {
            ChecksumAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                loop {
                    let n = file.read(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&buf[..n]);
                }
                Ok(hex::encode(hasher.finalize()))
            }
            ChecksumAlgorithm::Sha512 => {
                let mut hasher = Sha512::new();
                loop {
                    let n = file.read(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&buf[..n]);
                }
                Ok(hex::encode(hasher.finalize()))
            }
        }
    }

    /// Verifies `path` against `expected_hex`, case-insensitively.
    pub fn verify_file(
        &self,
        path: &Path,
        expected_hex: &str,
        algorithm: ChecksumAlgorithm,
    ) -> Result<(), ChecksumError> {
        let actual = self.hash_file(path, algorithm)?;
        if actual.eq_ignore_ascii_case(expected_hex) {
            Ok(())
        } else {
            Err(ChecksumError::Mismatch {
                expected: expected_hex.to_string(),
                actual,
            })
        }
    }
}
