//! Security-parameter configuration.
//!
//! Grounded on the teacher's `auto_update::Config`/`UpdateConfig`: a serde
//! struct with a `Default` impl matching the documented defaults and an
//! `apply_env_overrides()` pass, loadable from TOML.

use std::collections::HashSet;
use std::env;

use serde::{Deserialize, Serialize};

use crate::checksum::ChecksumAlgorithm;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub max_download_size: u64,
    pub max_uncompressed_size: u64,
    pub max_individual_file_size: u64,
    pub max_file_count: usize,
    pub download_timeout_secs: u64,
    pub download_cooldown_secs: i64,
    pub max_manifest_age_secs: i64,
    pub max_concurrent_downloads: usize,
    pub max_downloads_per_hour: usize,
    pub max_history: usize,
    pub allowed_extensions: HashSet<String>,
    pub forbidden_patterns: Vec<String>,
    pub enforce_environment_match: bool,
    pub allow_insecure_localhost: bool,
    /// Base64 SHA-256 SPKI hashes to pin transport connections against. An
    /// empty set means pinning is off.
    pub pinned_spki_sha256_base64: Vec<String>,
    pub checksum_algorithm: ChecksumAlgorithm,
    /// Must be set explicitly (e.g. by a test harness) — never implied by a
    /// build profile. See SPEC_FULL.md design notes.
    pub allow_unsigned_manifests: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        SecurityConfig {
            max_download_size: 50 * 1024 * 1024,
            max_uncompressed_size: 100 * 1024 * 1024,
            max_individual_file_size: 20 * 1024 * 1024,
            max_file_count: 500,
            download_timeout_secs: 60,
            download_cooldown_secs: 5,
            max_manifest_age_secs: 300,
            max_concurrent_downloads: 3,
            max_downloads_per_hour: 20,
            max_history: 200,
            allowed_extensions: [
                "html", "css", "js", "json", "png", "jpg", "jpeg", "svg", "woff", "woff2", "ttf",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            forbidden_patterns: vec![
                "..".into(),
                "~".into(),
                "__MACOSX".into(),
                ".DS_Store".into(),
                ".git".into(),
                ".svn".into(),
            ],
            enforce_environment_match: true,
            allow_insecure_localhost: cfg!(debug_assertions),
            pinned_spki_sha256_base64: Vec::new(),
            checksum_algorithm: ChecksumAlgorithm::Sha256,
            allow_unsigned_manifests: false,
        }
    }
}

impl SecurityConfig {
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Overrides individual fields from `MODULE_PIPELINE_*` environment
    /// variables, one per field, mirroring the teacher's `CCO_AUTO_UPDATE*`
    /// convention.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("MODULE_PIPELINE_MAX_DOWNLOAD_SIZE") {
            if let Ok(n) = v.parse() {
                self.max_download_size = n;
            }
        }
        if let Ok(v) = env::var("MODULE_PIPELINE_MAX_CONCURRENT_DOWNLOADS") {
            if let Ok(n) = v.parse() {
                self.max_concurrent_downloads = n;
            }
        }
        if let Ok(v) = env::var("MODULE_PIPELINE_MAX_DOWNLOADS_PER_HOUR") {
            if let Ok(n) = v.parse() {
                self.max_downloads_per_hour = n;
            }
        }
        if let Ok(v) = env::var("MODULE_PIPELINE_DOWNLOAD_COOLDOWN_SECS") {
            if let Ok(n) = v.parse() {
                self.download_cooldown_secs = n;
            }
        }
        if let Ok(v) = env::var("MODULE_PIPELINE_ENFORCE_ENVIRONMENT_MATCH") {
            self.enforce_environment_match = v == "true" || v == "1";
        }
        if let Ok(v) = env::var("MODULE_PIPELINE_ALLOW_INSECURE_LOCALHOST") {
            self.allow_insecure_localhost = v == "true" || v == "1";
        }
    }
}
