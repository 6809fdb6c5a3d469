//! Post-install and periodic integrity sweeps.
//!
//! No direct teacher precedent (the teacher never re-validates an installed
//! binary after the fact); walks the tree with `walkdir`, the ecosystem's
//! conventional recursive-enumeration crate, looking for what the extractor
//! already forbids creeping back in: missing content, and symlinks.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use walkdir::WalkDir;

use crate::audit::{AuditEvent, AuditSink};

#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("module directory does not exist: {0}")]
    MissingDirectory(PathBuf),
    #[error("module directory is empty: {0}")]
    EmptyDirectory(PathBuf),
    #[error("symlink found at {0}")]
    SymlinkDetected(PathBuf),
    #[error("I/O error while walking {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
}

impl IntegrityError {
    pub fn is_recoverable(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IntegritySummary {
    pub file_count: usize,
    pub total_bytes: u64,
}

pub trait Integrity: Send + Sync {
    fn check(&self, module_root: &Path) -> Result<IntegritySummary, IntegrityError>;

    /// Walks `<root>/Modules/*/*`, checking every installed version.
    /// Returns one error per failing module rather than stopping at the
    /// first; the orchestrator decides what to do with each.
    fn sweep(&self, root: &Path) -> Vec<(PathBuf, Result<IntegritySummary, IntegrityError>)>;
}

pub struct FilesystemIntegrityValidator {
    audit: Arc<dyn AuditSink>,
}

impl FilesystemIntegrityValidator {
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        FilesystemIntegrityValidator { audit }
    }
}

impl Integrity for FilesystemIntegrityValidator {
    fn check(&self, module_root: &Path) -> Result<IntegritySummary, IntegrityError> {
        if !module_root.exists() {
            return Err(IntegrityError::MissingDirectory(module_root.to_path_buf()));
        }

        let mut summary = IntegritySummary::default();
        let mut saw_entry = false;

        for entry in WalkDir::new(module_root).min_depth(1) {
            let entry = entry.map_err(|e| IntegrityError::Io {
                path: e.path().map(Path::to_path_buf).unwrap_or_else(|| module_root.to_path_buf()),
                source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
            })?;
            saw_entry = true;

            let file_type = entry.file_type();
            if file_type.is_symlink() {
                self.audit.emit(AuditEvent::SymlinkDetected { path: entry.path().display().to_string() });
                return Err(IntegrityError::SymlinkDetected(entry.path().to_path_buf()));
            }
            if file_type.is_file() {
                summary.file_count += 1;
                summary.total_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }

        if !saw_entry {
            return Err(IntegrityError::EmptyDirectory(module_root.to_path_buf()));
        }

        self.audit.emit(AuditEvent::IntegrityCheckPassed { module: module_root.display().to_string() });
        Ok(summary)
    }

    fn sweep(&self, root: &Path) -> Vec<(PathBuf, Result<IntegritySummary, IntegrityError>)> {
        let modules_dir = root.join("Modules");
        let mut results = Vec::new();
        if !modules_dir.exists() {
            return results;
        }

        let module_dirs = match std::fs::read_dir(&modules_dir) {
            Ok(entries) => entries,
            Err(_) => return results,
        };

        for module_dir in module_dirs.flatten() {
            if !module_dir.path().is_dir() {
                continue;
            }
            let version_dirs = match std::fs::read_dir(module_dir.path()) {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            for version_dir in version_dirs.flatten() {
                let path = version_dir.path();
                if !path.is_dir() {
                    continue;
                }
                let result = self.check(&path);
                if let Err(e) = &result {
                    self.audit.emit(AuditEvent::IntegrityCheckFailed {
                        module: path.display().to_string(),
                        reason: e.to_string(),
                    });
                }
                results.push((path, result));
            }
        }
        results
    }
}
