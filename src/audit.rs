//! Structured, severity-tagged security events.
//!
//! The sink is the product surface named by the spec ("the core emits
//! structured events only") — not a log file or database. `ChannelAuditSink`
//! buffers on a dedicated worker so `emit()` never blocks a caller holding a
//! coordinator or extraction lock.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Default,
    Error,
    Fault,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEvent {
    SignatureVerified { algorithm: String },
    SignatureVerificationFailed,
    InvalidSignatureDetected,
    ChecksumVerified { algorithm: String, size: u64 },
    ChecksumMismatch { expected: String, actual: String },
    CertificatePinningSuccess { hash: String },
    CertificatePinningFailed { reason: String },
    PathTraversalAttempt { path: String },
    SymlinkDetected { path: String },
    ForbiddenFileDetected { name: String },
    ZipBombDetected { size: u64 },
    InstallationSuccess { module: String, version: String },
    InstallationFailed { module: String, error: String },
    RollbackPerformed { module: String },
    ReplayAttemptDetected { age_seconds: i64 },
    RateLimitExceeded { cooldown_remaining_seconds: i64 },
    ManifestTimestampInFuture,
    ModuleQuarantined { module: String, reason: String },
    QuarantineReleased { module: String },
    IntegrityCheckPassed { module: String },
    IntegrityCheckFailed { module: String, reason: String },
    InsufficientDiskSpace { required: u64, available: u64 },
}

impl AuditEvent {
    pub fn severity(&self) -> Severity {
        use AuditEvent::*;
        match self {
            CertificatePinningFailed { .. }
            | PathTraversalAttempt { .. }
            | SymlinkDetected { .. }
            | ForbiddenFileDetected { .. }
            | ReplayAttemptDetected { .. }
            | ModuleQuarantined { .. }
            | InvalidSignatureDetected => Severity::Fault,

            ChecksumMismatch { .. }
            | RollbackPerformed { .. }
            | ZipBombDetected { .. }
            | InstallationFailed { .. }
            | IntegrityCheckFailed { .. }
            | SignatureVerificationFailed => Severity::Error,

            RateLimitExceeded { .. } | InsufficientDiskSpace { .. } | ManifestTimestampInFuture => {
                Severity::Default
            }

            SignatureVerified { .. }
            | ChecksumVerified { .. }
            | CertificatePinningSuccess { .. }
            | InstallationSuccess { .. }
            | QuarantineReleased { .. }
            | IntegrityCheckPassed { .. } => Severity::Info,
        }
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

/// Logs every event via `tracing` at a level matching its severity.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        match event.severity() {
            Severity::Fault => tracing::error!(target: "audit", ?event, "fault"),
            Severity::Error => tracing::error!(target: "audit", ?event, "error"),
            Severity::Default => tracing::warn!(target: "audit", ?event, "default"),
            Severity::Info => tracing::info!(target: "audit", ?event, "info"),
        }
    }
}

/// Non-blocking sink: `emit()` pushes onto an unbounded channel drained by a
/// background task that forwards to `inner`. Lossless under backpressure
/// because the channel never rejects a send.
pub struct ChannelAuditSink {
    tx: mpsc::UnboundedSender<AuditEvent>,
}

impl ChannelAuditSink {
    pub fn new(inner: std::sync::Arc<dyn AuditSink>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<AuditEvent>();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                inner.emit(event);
            }
        });
        ChannelAuditSink { tx }
    }
}

impl AuditSink for ChannelAuditSink {
    fn emit(&self, event: AuditEvent) {
        // Receiver only disconnects once the sink itself is dropped; a send
        // error at that point means there is nothing left to deliver to.
        let _ = self.tx.send(event);
    }
}

/// Captures events in order, for assertions in tests.
#[derive(Default)]
pub struct RecordingAuditSink {
    events: std::sync::Mutex<Vec<AuditEvent>>,
}

impl RecordingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl AuditSink for RecordingAuditSink {
    fn emit(&self, event: AuditEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_mapping_matches_spec() {
        assert_eq!(
            AuditEvent::PathTraversalAttempt { path: "x".into() }.severity(),
            Severity::Fault
        );
        assert_eq!(
            AuditEvent::ChecksumMismatch {
                expected: "a".into(),
                actual: "b".into()
            }
            .severity(),
            Severity::Error
        );
        assert_eq!(
            AuditEvent::RateLimitExceeded {
                cooldown_remaining_seconds: 3
            }
            .severity(),
            Severity::Default
        );
        assert_eq!(
            AuditEvent::SignatureVerified { algorithm: "rsa".into() }.severity(),
            Severity::Info
        );
    }

    #[tokio::test]
    async fn channel_sink_forwards_in_order() {
        let recorder = std::sync::Arc::new(RecordingAuditSink::new());
        let sink = ChannelAuditSink::new(recorder.clone());
        sink.emit(AuditEvent::ManifestTimestampInFuture);
        sink.emit(AuditEvent::InvalidSignatureDetected);
        // allow the background task to drain
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let events = recorder.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], AuditEvent::ManifestTimestampInFuture);
    }
}
