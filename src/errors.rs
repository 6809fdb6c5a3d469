//! Aggregate pipeline error, closing the surface named in the external
//! interface contract: every stage's error rolls up into one of these
//! variants, and nothing else escapes the orchestrator.

use thiserror::Error;

use crate::checksum::ChecksumError;
use crate::coordinator::CoordinatorError;
use crate::disk_space::DiskSpaceError;
use crate::extractor::ExtractionError;
use crate::installer::InstallError;
use crate::integrity::IntegrityError;
use crate::manifest::ManifestError;
use crate::pinning::PinningError;
use crate::quarantine::QuarantineError;
use crate::transport::NetworkError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
    #[error(transparent)]
    Checksum(#[from] ChecksumError),
    #[error(transparent)]
    Pinning(#[from] PinningError),
    #[error(transparent)]
    DiskSpace(#[from] DiskSpaceError),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Install(#[from] InstallError),
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
    #[error(transparent)]
    Quarantine(#[from] QuarantineError),
}

impl PipelineError {
    pub fn is_recoverable(&self) -> bool {
        match self {
            PipelineError::Network(e) => e.is_recoverable(),
            PipelineError::Manifest(e) => e.is_recoverable(),
            PipelineError::Coordinator(e) => e.is_recoverable(),
            PipelineError::Checksum(e) => e.is_recoverable(),
            PipelineError::Pinning(e) => e.is_recoverable(),
            PipelineError::DiskSpace(e) => e.is_recoverable(),
            PipelineError::Extraction(e) => e.is_recoverable(),
            PipelineError::Install(e) => e.is_recoverable(),
            PipelineError::Integrity(e) => e.is_recoverable(),
            PipelineError::Quarantine(e) => e.is_recoverable(),
        }
    }

    /// Whether a failure at this stage leaves behind an installed artifact
    /// that ought to be pulled into quarantine rather than just reported.
    pub fn is_fatal_for_attempt(&self) -> bool {
        !self.is_recoverable()
    }
}
