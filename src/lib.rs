//! Client-side secure module delivery pipeline.
//!
//! Fetches a signed manifest, verifies and downloads the modules it lists,
//! extracts them defensively, and installs them atomically with rollback on
//! failure. See `SPEC_FULL.md` for the full component breakdown.

pub mod audit;
pub mod checksum;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod disk_space;
pub mod errors;
pub mod extractor;
pub mod fs_ops;
pub mod installer;
pub mod integrity;
pub mod manifest;
pub mod orchestrator;
pub mod pinning;
pub mod quarantine;
pub mod signature;
pub mod transport;

pub use audit::{AuditEvent, AuditSink, ChannelAuditSink, Severity, TracingAuditSink};
pub use checksum::{ChecksumAlgorithm, ChecksumEngine, ChecksumError};
pub use clock::{Clock, SystemClock};
pub use config::SecurityConfig;
pub use coordinator::{Coordinator, CoordinatorError, DownloadCoordinator};
pub use disk_space::{DiskSpaceChecker, DiskSpaceError, SysinfoDiskSpaceChecker};
pub use errors::PipelineError;
pub use extractor::{Extractor, ExtractionError, ExtractionLimits, SafeExtractor};
pub use fs_ops::{Fs, StdFs};
pub use installer::{AtomicInstaller, InstallError, Installer};
pub use integrity::{FilesystemIntegrityValidator, Integrity, IntegrityError};
pub use manifest::{Environment, ManifestError, ManifestValidator, ModuleDescriptor, SignedManifest};
pub use orchestrator::InstallOrchestrator;
pub use pinning::{CertificatePinner, PinningError};
pub use quarantine::{Quarantine, QuarantineError, QuarantineManager};
pub use signature::{RsaPkcs1Sha256Verifier, SignatureError, SignatureVerifier};
pub use transport::{NetworkError, ReqwestTransport, Transport};
