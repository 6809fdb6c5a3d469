//! Transactional backup/rename/rollback install.
//!
//! Grounded directly on the teacher's `updater.rs::replace_binary()`: copy
//! the new artifact alongside the old one, back up what's there, rename
//! atomically, re-verify, and roll back from the backup on any failure in
//! between. Generalized here from a single binary file to a directory tree.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::fs_ops::Fs;

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("installation failed: {0}")]
    InstallationFailed(String),
}

impl InstallError {
    pub fn is_recoverable(&self) -> bool {
        false
    }
}

pub trait Installer: Send + Sync {
    fn install(&self, source_staging: &Path, name: &str, version: &semver::Version) -> Result<PathBuf, InstallError>;
}

pub struct AtomicInstaller {
    root: PathBuf,
    fs: Arc<dyn Fs>,
}

impl AtomicInstaller {
    pub fn new(root: PathBuf, fs: Arc<dyn Fs>) -> Self {
        AtomicInstaller { root, fs }
    }

    fn modules_dir(&self, name: &str) -> PathBuf {
        self.root.join("Modules").join(name)
    }

    fn backups_dir(&self) -> PathBuf {
        self.root.join("ModuleBackups")
    }

    fn validate_installed(&self, path: &Path) -> Result<(), InstallError> {
        let entries: Vec<_> = std::fs::read_dir(path)
            .map_err(|e| InstallError::InstallationFailed(format!("cannot read {}: {e}", path.display())))?
            .collect();
        if entries.is_empty() {
            return Err(InstallError::InstallationFailed("installed directory is empty".into()));
        }
        for entry in &entries {
            let entry = entry.as_ref().map_err(|e| InstallError::InstallationFailed(e.to_string()))?;
            let meta = self
                .fs
                .symlink_metadata(&entry.path())
                .map_err(|e| InstallError::InstallationFailed(e.to_string()))?;
            if meta.file_type().is_symlink() {
                return Err(InstallError::InstallationFailed(format!(
                    "symlink at top level: {}",
                    entry.path().display()
                )));
            }
        }
        if !path.join("index.html").exists() {
            tracing::warn!(path = %path.display(), "installed module has no index.html (content-agnostic installer, not an error)");
        }
        Ok(())
    }
}

impl Installer for AtomicInstaller {
    fn install(&self, source_staging: &Path, name: &str, version: &semver::Version) -> Result<PathBuf, InstallError> {
        let final_dir = self.modules_dir(name).join(version.to_string());
        if let Some(parent) = final_dir.parent() {
            self.fs
                .create_dir_all(parent)
                .map_err(|e| InstallError::InstallationFailed(e.to_string()))?;
        }

        let mut backup: Option<PathBuf> = None;
        if final_dir.exists() {
            self.fs
                .create_dir_all(&self.backups_dir())
                .map_err(|e| InstallError::InstallationFailed(e.to_string()))?;
            let epoch = Utc::now().timestamp();
            let backup_path = self.backups_dir().join(format!("{name}_{version}_{epoch}"));
            self.fs
                .rename(&final_dir, &backup_path)
                .map_err(|e| InstallError::InstallationFailed(format!("backup move failed: {e}")))?;
            backup = Some(backup_path);
        }

        let result = self.install_inner(source_staging, &final_dir);

        match result {
            Ok(()) => {
                if let Some(backup_path) = &backup {
                    let _ = self.fs.remove_dir_all(backup_path);
                }
                Ok(final_dir)
            }
            Err(e) => {
                let _ = self.fs.remove_dir_all(&final_dir);
                if let Some(backup_path) = backup {
                    // best-effort rollback; if this also fails there is
                    // nothing further we can do locally.
                    let _ = self.fs.rename(&backup_path, &final_dir);
                }
                Err(e)
            }
        }
    }
}

impl AtomicInstaller {
    fn install_inner(&self, source_staging: &Path, final_dir: &Path) -> Result<(), InstallError> {
        let staging_under_root = final_dir
            .parent()
            .unwrap_or(final_dir)
            .join(format!(".staging-{}", Uuid::new_v4()));

        let result = self.install_inner_staged(source_staging, final_dir, &staging_under_root);
        if result.is_err() {
            let _ = self.fs.remove_dir_all(&staging_under_root);
        }
        result
    }

    fn install_inner_staged(
        &self,
        source_staging: &Path,
        final_dir: &Path,
        staging_under_root: &Path,
    ) -> Result<(), InstallError> {
        self.fs
            .copy_dir_all(source_staging, staging_under_root)
            .map_err(|e| InstallError::InstallationFailed(format!("staging copy failed: {e}")))?;
        self.validate_installed(staging_under_root)?;

        self.fs
            .rename(staging_under_root, final_dir)
            .map_err(|e| InstallError::InstallationFailed(format!("final rename failed: {e}")))?;
        self.validate_installed(final_dir)?;

        let _ = self.fs.remove_dir_all(staging_under_root);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs_ops::{FailingRenameFs, StdFs};
    use tempfile::tempdir;

    fn make_source(dir: &Path) -> PathBuf {
        let source = dir.join("source");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("index.html"), b"<html></html>").unwrap();
        source
    }

    #[test]
    fn installs_into_final_path() {
        let root = tempdir().unwrap();
        let source_dir = tempdir().unwrap();
        let source = make_source(source_dir.path());

        let installer = AtomicInstaller::new(root.path().to_path_buf(), Arc::new(StdFs));
        let version = semver::Version::new(1, 0, 0);
        let final_dir = installer.install(&source, "Dashboard Module", &version).unwrap();

        assert!(final_dir.join("index.html").exists());
        assert_eq!(final_dir, root.path().join("Modules/Dashboard Module/1.0.0"));
    }

    #[test]
    fn replaces_existing_install_and_removes_backup() {
        let root = tempdir().unwrap();
        let source_dir = tempdir().unwrap();
        let source = make_source(source_dir.path());
        let installer = AtomicInstaller::new(root.path().to_path_buf(), Arc::new(StdFs));
        let version = semver::Version::new(1, 2, 3);

        let first = installer.install(&source, "Settings Module", &version).unwrap();
        std::fs::write(first.join("marker.txt"), b"v1").unwrap();

        let source2_dir = tempdir().unwrap();
        let source2 = make_source(source2_dir.path());
        let second = installer.install(&source2, "Settings Module", &version).unwrap();

        assert!(!second.join("marker.txt").exists());
        assert!(root.path().join("ModuleBackups").read_dir().unwrap().next().is_none());
    }

    #[test]
    fn rolls_back_on_injected_rename_failure() {
        let root = tempdir().unwrap();
        let source_dir = tempdir().unwrap();
        let source = make_source(source_dir.path());
        let version = semver::Version::new(1, 2, 3);

        // Seed a pre-existing install so a backup gets created.
        let plain_installer = AtomicInstaller::new(root.path().to_path_buf(), Arc::new(StdFs));
        let final_dir = plain_installer.install(&source, "Settings Module", &version).unwrap();
        std::fs::write(final_dir.join("original.txt"), b"keep me").unwrap();

        let source2_dir = tempdir().unwrap();
        let source2 = make_source(source2_dir.path());

        let failing_fs = FailingRenameFs {
            inner: StdFs,
            should_fail: |_from: &Path, to: &Path| to.file_name().map(|n| n == "1.2.3").unwrap_or(false),
        };
        let installer = AtomicInstaller::new(root.path().to_path_buf(), Arc::new(failing_fs));
        let err = installer.install(&source2, "Settings Module", &version).unwrap_err();
        assert!(matches!(err, InstallError::InstallationFailed(_)));

        // final dir restored bit-for-bit from backup
        assert!(final_dir.join("original.txt").exists());
        assert!(root.path().join("ModuleBackups").read_dir().unwrap().next().is_none());

        // no leaked .staging-<uuid> artifact next to the restored final dir
        let leftovers: Vec<_> = final_dir
            .parent()
            .unwrap()
            .read_dir()
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".staging-"))
            .collect();
        assert!(leftovers.is_empty(), "leaked staging dir: {leftovers:?}");
    }
}
