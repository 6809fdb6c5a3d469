//! The state machine that wires every collaborator together and drives one
//! module through `CheckingNetwork -> PreflightChecks -> Downloading ->
//! VerifyingChecksum -> Extracting -> Installing -> IntegrityCheck ->
//! Completed | Failed`.
//!
//! Composition root pattern: every collaborator arrives as an `Arc<dyn
//! Trait>` constructed once by the caller (see `main.rs`), never as a
//! global singleton. Sync, CPU/IO-heavy collaborators (checksum, disk
//! space, extraction, install, integrity) run inside `spawn_blocking` so a
//! slow one never stalls the async runtime the coordinator and transport
//! depend on.

use std::path::PathBuf;
use std::sync::Arc;

use uuid::Uuid;

use crate::audit::{AuditEvent, AuditSink};
use crate::checksum::{ChecksumAlgorithm, ChecksumEngine};
use crate::clock::Clock;
use crate::coordinator::{Coordinator, DownloadEndReason};
use crate::disk_space::{required_bytes_for_archive, DiskSpaceChecker};
use crate::errors::PipelineError;
use crate::extractor::Extractor;
use crate::fs_ops::Fs;
use crate::installer::Installer;
use crate::integrity::Integrity;
use crate::manifest::{Environment, ManifestValidator, ModuleDescriptor, SignedManifest};
use crate::pinning::CertificatePinner;
use crate::quarantine::Quarantine;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    CheckingNetwork,
    PreflightChecks,
    Pinning,
    Downloading,
    VerifyingChecksum,
    Extracting,
    Installing,
    IntegrityCheck,
    Completed,
    Failed,
}

/// Extracts the host from a `scheme://[user@]host[:port]/path` URL without
/// pulling in a URL-parsing crate — good enough for the pinning challenge,
/// which only needs the host component.
fn extract_host(url: &str) -> Option<&str> {
    let after_scheme = url.split("://").nth(1)?;
    let host_port = after_scheme.split('/').next()?;
    let host_port = host_port.rsplit('@').next()?;
    host_port.split(':').next()
}

/// Owns the per-attempt temp archive file and staging directory; both are
/// removed on drop regardless of how the attempt ends, mirroring the
/// teacher's `updater::TempDirGuard`. The installer copies out of
/// `staging_dir` rather than moving it, so cleanup on success is just as
/// safe as cleanup on failure.
struct TempDirGuard {
    archive_path: PathBuf,
    staging_dir: PathBuf,
}

impl TempDirGuard {
    fn new() -> std::io::Result<Self> {
        let attempt = Uuid::new_v4();
        let base = std::env::temp_dir().join(format!("modvault-{attempt}"));
        std::fs::create_dir_all(&base)?;
        Ok(TempDirGuard {
            archive_path: base.join("archive.zip"),
            staging_dir: base.join("staging"),
        })
    }
}

impl Drop for TempDirGuard {
    fn drop(&mut self) {
        if let Some(parent) = self.archive_path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }
}

pub struct InstallOrchestrator {
    transport: Arc<dyn Transport>,
    coordinator: Arc<dyn Coordinator>,
    extractor: Arc<dyn Extractor>,
    installer: Arc<dyn Installer>,
    integrity: Arc<dyn Integrity>,
    quarantine: Arc<dyn Quarantine>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    fs: Arc<dyn Fs>,
    disk_space: Arc<dyn DiskSpaceChecker>,
    manifest_validator: ManifestValidator,
    pinner: Arc<CertificatePinner>,
    checksum: ChecksumEngine,
    checksum_algorithm: ChecksumAlgorithm,
    max_download_size: u64,
}

#[allow(clippy::too_many_arguments)]
impl InstallOrchestrator {
    pub fn new(
        transport: Arc<dyn Transport>,
        coordinator: Arc<dyn Coordinator>,
        extractor: Arc<dyn Extractor>,
        installer: Arc<dyn Installer>,
        integrity: Arc<dyn Integrity>,
        quarantine: Arc<dyn Quarantine>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        fs: Arc<dyn Fs>,
        disk_space: Arc<dyn DiskSpaceChecker>,
        manifest_validator: ManifestValidator,
        pinner: Arc<CertificatePinner>,
        checksum_algorithm: ChecksumAlgorithm,
        max_download_size: u64,
    ) -> Self {
        InstallOrchestrator {
            transport,
            coordinator,
            extractor,
            installer,
            integrity,
            quarantine,
            audit,
            clock,
            fs,
            disk_space,
            manifest_validator,
            pinner,
            checksum: ChecksumEngine::new(),
            checksum_algorithm,
            max_download_size,
        }
    }

    /// Fetches and validates the manifest, then installs every module it
    /// lists, one at a time. A failure installing one module does not stop
    /// the others; each gets its own `Result`.
    pub async fn run(
        &self,
        manifest_url: &str,
        current_env: Environment,
    ) -> Result<Vec<(String, Result<PathBuf, PipelineError>)>, PipelineError> {
        let raw = self.transport.fetch_manifest(manifest_url).await?;
        let signed: SignedManifest = serde_json::from_slice(&raw.body)
            .map_err(crate::manifest::ManifestError::Canonicalization)?;
        let now = self.clock.now();
        let validated = self.manifest_validator.validate(&signed, now, current_env)?;

        let mut results = Vec::with_capacity(validated.modules.len());
        for descriptor in &validated.modules {
            let outcome = self.install_module(descriptor).await;
            results.push((descriptor.id.clone(), outcome));
        }
        Ok(results)
    }

    /// Drives a single module through every stage, reporting its `Stage` at
    /// each transition via `tracing` and ensuring `coordinator.complete()`
    /// is called exactly once regardless of where the attempt ends.
    pub async fn install_module(&self, descriptor: &ModuleDescriptor) -> Result<PathBuf, PipelineError> {
        tracing::info!(stage = ?Stage::CheckingNetwork, module = %descriptor.id, "starting install");

        tracing::info!(stage = ?Stage::PreflightChecks, module = %descriptor.id);
        let required = required_bytes_for_archive(descriptor.size_bytes);
        let disk_space = self.disk_space.clone();
        let guard_dir = std::env::temp_dir();
        let disk_result = tokio::task::spawn_blocking(move || disk_space.check(&guard_dir, required))
            .await
            .expect("disk space check task panicked");
        if let Err(crate::disk_space::DiskSpaceError::Insufficient { required, available }) = &disk_result {
            self.audit
                .emit(AuditEvent::InsufficientDiskSpace { required: *required, available: *available });
        }
        disk_result?;

        let attempt_id = self.coordinator.reserve(&descriptor.id).await?;

        let guard = match TempDirGuard::new() {
            Ok(guard) => guard,
            Err(e) => {
                self.coordinator
                    .complete(&descriptor.id, attempt_id, DownloadEndReason::Unknown, 0, Some(descriptor.size_bytes))
                    .await;
                return Err(crate::installer::InstallError::InstallationFailed(format!(
                    "could not create staging area: {e}"
                ))
                .into());
            }
        };

        tracing::info!(stage = ?Stage::Pinning, module = %descriptor.id);
        let host = extract_host(&descriptor.download_url).unwrap_or("");
        let challenge = self.transport.certificate_challenge(host);
        match self.pinner.decide(&challenge) {
            Ok((_, hash)) => {
                self.audit.emit(AuditEvent::CertificatePinningSuccess { hash });
            }
            Err(e) => {
                self.audit
                    .emit(AuditEvent::CertificatePinningFailed { reason: e.reason() });
                self.coordinator
                    .complete(&descriptor.id, attempt_id, DownloadEndReason::PinningFailed, 0, Some(descriptor.size_bytes))
                    .await;
                return Err(e.into());
            }
        }

        tracing::info!(stage = ?Stage::Downloading, module = %descriptor.id);
        let download_result = self
            .transport
            .download(&descriptor.download_url, &guard.archive_path, self.max_download_size)
            .await;

        let outcome = match download_result {
            Ok(outcome) => outcome,
            Err(e) => {
                self.coordinator
                    .complete(&descriptor.id, attempt_id, map_network_reason(&e), 0, Some(descriptor.size_bytes))
                    .await;
                return Err(e.into());
            }
        };

        tracing::info!(stage = ?Stage::VerifyingChecksum, module = %descriptor.id);
        let checksum = self.checksum;
        let algorithm = self.checksum_algorithm;
        let archive_path = guard.archive_path.clone();
        let expected = descriptor.checksum_hex.clone();
        let check_result = tokio::task::spawn_blocking(move || checksum.verify_file(&archive_path, &expected, algorithm))
            .await
            .expect("checksum task panicked");

        if let Err(e) = check_result {
            self.audit.emit(AuditEvent::ChecksumMismatch {
                expected: descriptor.checksum_hex.clone(),
                actual: String::new(),
            });
            self.quarantine
                .quarantine(&descriptor.id, &descriptor.semantic_version, &guard.archive_path, &e.to_string())
                .await
                .ok();
            self.coordinator
                .complete(
                    &descriptor.id,
                    attempt_id,
                    DownloadEndReason::ChecksumMismatch,
                    outcome.bytes_written,
                    Some(descriptor.size_bytes),
                )
                .await;
            return Err(e.into());
        }
        self.audit.emit(AuditEvent::ChecksumVerified {
            algorithm: algorithm.as_str().to_string(),
            size: outcome.bytes_written,
        });

        tracing::info!(stage = ?Stage::Extracting, module = %descriptor.id);
        let extractor = self.extractor.clone();
        let archive_path = guard.archive_path.clone();
        let staging_dir = guard.staging_dir.clone();
        let extract_result =
            tokio::task::spawn_blocking(move || extractor.extract(&archive_path, &staging_dir))
                .await
                .expect("extraction task panicked");

        if let Err(e) = extract_result {
            self.quarantine
                .quarantine(&descriptor.id, &descriptor.semantic_version, &guard.archive_path, &e.to_string())
                .await
                .ok();
            self.coordinator
                .complete(&descriptor.id, attempt_id, DownloadEndReason::Unknown, outcome.bytes_written, Some(descriptor.size_bytes))
                .await;
            return Err(e.into());
        }

        tracing::info!(stage = ?Stage::Installing, module = %descriptor.id);
        let installer = self.installer.clone();
        let staging_dir = guard.staging_dir.clone();
        let name = descriptor.name.clone();
        let version = descriptor.semantic_version.clone();
        let install_result =
            tokio::task::spawn_blocking(move || installer.install(&staging_dir, &name, &version))
                .await
                .expect("install task panicked");

        let final_dir = match install_result {
            Ok(dir) => dir,
            Err(e) => {
                self.audit.emit(AuditEvent::InstallationFailed {
                    module: descriptor.id.clone(),
                    error: e.to_string(),
                });
                self.coordinator
                    .complete(&descriptor.id, attempt_id, DownloadEndReason::Unknown, outcome.bytes_written, Some(descriptor.size_bytes))
                    .await;
                return Err(e.into());
            }
        };

        tracing::info!(stage = ?Stage::IntegrityCheck, module = %descriptor.id);
        let integrity = self.integrity.clone();
        let check_dir = final_dir.clone();
        let integrity_result = tokio::task::spawn_blocking(move || integrity.check(&check_dir))
            .await
            .expect("integrity task panicked");

        if let Err(e) = integrity_result {
            let _ = self.fs.remove_dir_all(&final_dir);
            self.coordinator
                .complete(&descriptor.id, attempt_id, DownloadEndReason::IntegrityFailed, outcome.bytes_written, Some(descriptor.size_bytes))
                .await;
            return Err(e.into());
        }

        self.audit.emit(AuditEvent::InstallationSuccess {
            module: descriptor.id.clone(),
            version: descriptor.semantic_version.to_string(),
        });
        self.coordinator
            .complete(&descriptor.id, attempt_id, DownloadEndReason::Success, outcome.bytes_written, Some(descriptor.size_bytes))
            .await;

        tracing::info!(stage = ?Stage::Completed, module = %descriptor.id, path = %final_dir.display());
        Ok(final_dir)
    }
}

fn map_network_reason(e: &crate::transport::NetworkError) -> DownloadEndReason {
    use crate::transport::NetworkError::*;
    match e {
        NoInternet => DownloadEndReason::NoInternet,
        Timeout => DownloadEndReason::Timeout,
        Cancelled => DownloadEndReason::Cancelled,
        ServerError(code) => DownloadEndReason::ServerError(*code),
        _ => DownloadEndReason::Unknown,
    }
}
