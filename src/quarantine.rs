//! Quarantine index for modules pulled out of circulation.
//!
//! Same `RwLock<HashMap<...>>`-guarded index idiom as `coordinator.rs`'s
//! `DownloadCoordinator`, applied to quarantine entries instead of download
//! attempts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::audit::{AuditEvent, AuditSink};
use crate::clock::Clock;
use crate::fs_ops::Fs;

#[derive(Debug, Clone)]
pub struct QuarantineEntry {
    pub module_id: String,
    pub version: semver::Version,
    pub quarantined_path: PathBuf,
    pub reason: String,
    pub quarantined_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum QuarantineError {
    #[error("module {module_id} is not quarantined")]
    NotQuarantined { module_id: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl QuarantineError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, QuarantineError::Io(_))
    }
}

#[async_trait]
pub trait Quarantine: Send + Sync {
    async fn quarantine(
        &self,
        module_id: &str,
        version: &semver::Version,
        installed_path: &Path,
        reason: &str,
    ) -> Result<(), QuarantineError>;

    async fn release(&self, module_id: &str, restore_to: &Path) -> Result<(), QuarantineError>;

    async fn delete(&self, module_id: &str) -> Result<(), QuarantineError>;

    async fn list(&self) -> Vec<QuarantineEntry>;
}

pub struct QuarantineManager {
    root: PathBuf,
    index: tokio::sync::RwLock<HashMap<String, QuarantineEntry>>,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
    fs: Arc<dyn Fs>,
}

impl QuarantineManager {
    pub fn new(root: PathBuf, clock: Arc<dyn Clock>, audit: Arc<dyn AuditSink>, fs: Arc<dyn Fs>) -> Self {
        QuarantineManager {
            root,
            index: tokio::sync::RwLock::new(HashMap::new()),
            clock,
            audit,
            fs,
        }
    }

    fn quarantine_dir(&self) -> PathBuf {
        self.root.join("Quarantine")
    }
}

#[async_trait]
impl Quarantine for QuarantineManager {
    async fn quarantine(
        &self,
        module_id: &str,
        version: &semver::Version,
        installed_path: &Path,
        reason: &str,
    ) -> Result<(), QuarantineError> {
        let mut index = self.index.write().await;
        if let Some(existing) = index.remove(module_id) {
            self.fs.remove_dir_all(&existing.quarantined_path)?;
        }

        self.fs.create_dir_all(&self.quarantine_dir())?;
        let quarantined_path = self.quarantine_dir().join(format!("{module_id}_{version}"));
        self.fs.rename(installed_path, &quarantined_path)?;

        let entry = QuarantineEntry {
            module_id: module_id.to_string(),
            version: version.clone(),
            quarantined_path,
            reason: reason.to_string(),
            quarantined_at: self.clock.now(),
        };
        index.insert(module_id.to_string(), entry);
        self.audit.emit(AuditEvent::ModuleQuarantined {
            module: module_id.to_string(),
            reason: reason.to_string(),
        });
        Ok(())
    }

    async fn release(&self, module_id: &str, restore_to: &Path) -> Result<(), QuarantineError> {
        let mut index = self.index.write().await;
        let entry = index
            .remove(module_id)
            .ok_or_else(|| QuarantineError::NotQuarantined { module_id: module_id.to_string() })?;

        if let Some(parent) = restore_to.parent() {
            self.fs.create_dir_all(parent)?;
        }
        self.fs.rename(&entry.quarantined_path, restore_to)?;
        self.audit.emit(AuditEvent::QuarantineReleased { module: module_id.to_string() });
        Ok(())
    }

    async fn delete(&self, module_id: &str) -> Result<(), QuarantineError> {
        let mut index = self.index.write().await;
        let entry = index
            .remove(module_id)
            .ok_or_else(|| QuarantineError::NotQuarantined { module_id: module_id.to_string() })?;
        self.fs.remove_dir_all(&entry.quarantined_path)?;
        Ok(())
    }

    async fn list(&self) -> Vec<QuarantineEntry> {
        self.index.read().await.values().cloned().collect()
    }
}
