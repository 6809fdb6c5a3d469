//! Path-safe ZIP extraction: zip-slip, zip-bomb, and forbidden/symlink
//! defense.
//!
//! The two-pass design (validate everything, then extract) is spec-mandated
//! (§8: "if any per-entry or aggregate cap is exceeded, no file from `A` is
//! written to `R`"). The manual path-traversal checks in Pass 1 follow the
//! pattern other pack repos use for rejecting `..`/absolute entries; the
//! canonicalize-and-prefix check in Pass 2 is the spec's own containment
//! technique (I6).

use std::collections::HashSet;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::audit::{AuditEvent, AuditSink};

#[derive(Debug, Clone)]
pub struct ExtractionLimits {
    pub max_download_size: u64,
    pub max_uncompressed_size: u64,
    pub max_individual_file_size: u64,
    pub max_file_count: usize,
    pub allowed_extensions: HashSet<String>,
    pub forbidden_patterns: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("archive size exceeds the cap")]
    FileSizeExceeded,
    #[error("archive has too many entries")]
    FileCountExceeded,
    #[error("path traversal detected in entry {path}")]
    PathTraversalDetected { path: String },
    #[error("forbidden filename: {name}")]
    ForbiddenFilename { name: String },
    #[error("unsupported file type: {extension}")]
    UnsupportedFileType { extension: String },
    #[error("total uncompressed size exceeds the cap")]
    TotalSizeExceeded,
    #[error("symlink detected in extracted entry {path}")]
    SymlinkDetected { path: String },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("archive could not be read: {0}")]
    Archive(#[from] zip::result::ZipError),
}

impl ExtractionError {
    /// Containment/sizing errors in spec §7's taxonomy: always fatal for
    /// the attempt, and archive-bound, so the orchestrator routes these to
    /// quarantine.
    pub fn is_recoverable(&self) -> bool {
        false
    }
}

pub trait Extractor: Send + Sync {
    fn extract(&self, archive_path: &Path, destination: &Path) -> Result<(), ExtractionError>;
}

pub struct SafeExtractor {
    limits: ExtractionLimits,
    audit: std::sync::Arc<dyn AuditSink>,
}

impl SafeExtractor {
    pub fn new(limits: ExtractionLimits, audit: std::sync::Arc<dyn AuditSink>) -> Self {
        SafeExtractor { limits, audit }
    }

    fn validate_entry_path(&self, name: &str) -> Result<(), ExtractionError> {
        if name.contains("..") {
            self.audit.emit(AuditEvent::PathTraversalAttempt { path: name.to_string() });
            return Err(ExtractionError::PathTraversalDetected { path: name.to_string() });
        }
        for pattern in &self.limits.forbidden_patterns {
            if name.contains(pattern.as_str()) {
                self.audit.emit(AuditEvent::ForbiddenFileDetected { name: name.to_string() });
                return Err(ExtractionError::ForbiddenFilename { name: name.to_string() });
            }
        }
        let leaf = Path::new(name)
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or(name);
        if leaf.starts_with('.') {
            self.audit.emit(AuditEvent::ForbiddenFileDetected { name: name.to_string() });
            return Err(ExtractionError::ForbiddenFilename { name: name.to_string() });
        }
        Ok(())
    }

    /// The `zip` crate never materializes a symlink entry as an actual
    /// filesystem symlink on extraction — it always writes the link target
    /// text as a regular file's contents. The only place a symlink entry can
    /// still be caught is its declared Unix mode, here in Pass 1.
    fn validate_not_symlink(&self, name: &str, unix_mode: Option<u32>) -> Result<(), ExtractionError> {
        const S_IFMT: u32 = 0o170000;
        const S_IFLNK: u32 = 0o120000;
        if let Some(mode) = unix_mode {
            if mode & S_IFMT == S_IFLNK {
                self.audit.emit(AuditEvent::SymlinkDetected { path: name.to_string() });
                return Err(ExtractionError::SymlinkDetected { path: name.to_string() });
            }
        }
        Ok(())
    }

    fn validate_extension(&self, name: &str) -> Result<(), ExtractionError> {
        if let Some(ext) = Path::new(name).extension().and_then(|e| e.to_str()) {
            let lowered = ext.to_ascii_lowercase();
            if !self.limits.allowed_extensions.contains(&lowered) {
                return Err(ExtractionError::UnsupportedFileType { extension: lowered });
            }
        }
        Ok(())
    }
}

impl Extractor for SafeExtractor {
    fn extract(&self, archive_path: &Path, destination: &Path) -> Result<(), ExtractionError> {
        let archive_size = archive_path.metadata()?.len();
        if archive_size > self.limits.max_download_size {
            return Err(ExtractionError::FileSizeExceeded);
        }

        let file = File::open(archive_path)?;
        let mut archive = zip::ZipArchive::new(file)?;

        if archive.len() > self.limits.max_file_count {
            return Err(ExtractionError::FileCountExceeded);
        }

        // Pass 1: validate every entry without writing anything.
        let mut total_uncompressed: u64 = 0;
        for i in 0..archive.len() {
            let entry = archive.by_index(i)?;
            let name = entry.name().to_string();
            self.validate_entry_path(&name)?;
            self.validate_not_symlink(&name, entry.unix_mode())?;

            if entry.is_file() {
                self.validate_extension(&name)?;
                if entry.size() > self.limits.max_individual_file_size {
                    return Err(ExtractionError::FileSizeExceeded);
                }
                total_uncompressed += entry.size();
            }
        }
        if total_uncompressed > self.limits.max_uncompressed_size {
            self.audit.emit(AuditEvent::ZipBombDetected { size: total_uncompressed });
            return Err(ExtractionError::TotalSizeExceeded);
        }

        // Pass 2: extract, re-checking containment against the canonical
        // destination root for every entry (defense in depth against Pass 1
        // having missed a normalization edge case).
        std::fs::create_dir_all(destination)?;
        let canonical_root = destination.canonicalize()?;

        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            let name = entry.name().to_string();
            let joined = destination.join(&name);

            if let Some(parent) = joined.parent() {
                std::fs::create_dir_all(parent)?;
            }

            if entry.is_dir() {
                std::fs::create_dir_all(&joined)?;
                continue;
            }

            assert_contained(&canonical_root, &joined, &name)?;

            let mut out = File::create(&joined)?;
            io::copy(&mut entry, &mut out)?;
        }

        Ok(())
    }
}

/// Asserts `joined`'s canonical form sits under `canonical_root` with a
/// directory separator at the boundary (I6).
fn assert_contained(canonical_root: &Path, joined: &Path, entry_name: &str) -> Result<(), ExtractionError> {
    let joined_canonical = canonicalize_best_effort(joined);
    let root_str = canonical_root.to_string_lossy();
    let joined_str = joined_canonical.to_string_lossy();
    let prefix = format!("{root_str}{}", std::path::MAIN_SEPARATOR);
    if joined_str.starts_with(prefix.as_str()) || joined_canonical == *canonical_root {
        Ok(())
    } else {
        Err(ExtractionError::PathTraversalDetected { path: entry_name.to_string() })
    }
}

/// The destination file doesn't exist yet at validation time, so
/// `canonicalize()` would fail; resolve `.`/`..` lexically against the
/// existing parent instead.
fn canonicalize_best_effort(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                result.pop();
            }
            std::path::Component::CurDir => {}
            other => result.push(other.as_os_str()),
        }
    }
    result
}
