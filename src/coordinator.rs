//! Download concurrency, cooldown, and quota bookkeeping.
//!
//! Grounded directly on the teacher's `RateLimiter`
//! (`Arc<RwLock<HashMap<String, TokenBucket>>>`): one lock guards the whole
//! table, `active` and `history` are mutated together, matching spec §5's
//! "no fine-grained locking" directive.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditSink};
use crate::clock::Clock;

pub type AttemptId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEndReason {
    Success,
    Cancelled,
    NoInternet,
    Timeout,
    ServerError(Option<u16>),
    ChecksumMismatch,
    PinningFailed,
    IntegrityFailed,
    Unknown,
}

impl DownloadEndReason {
    pub fn is_success(&self) -> bool {
        matches!(self, DownloadEndReason::Success)
    }
}

#[derive(Debug, Clone)]
pub struct DownloadAttempt {
    pub module_id: String,
    pub attempt_id: AttemptId,
    pub started_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub bytes_received: u64,
    pub expected_bytes: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct DownloadRecord {
    pub module_id: String,
    pub attempt_id: AttemptId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub end_reason: DownloadEndReason,
    pub bytes_downloaded: u64,
    pub expected_bytes: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CoordinatorStatistics {
    pub active: usize,
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub total_bytes: u64,
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("too many concurrent downloads (limit {limit})")]
    TooManyConcurrentDownloads { limit: usize },
    #[error("download already in progress for module {module_id}")]
    DownloadAlreadyInProgress { module_id: String },
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimitExceeded { retry_after_secs: i64 },
    #[error("download quota exceeded (limit {limit} per hour)")]
    DownloadQuotaExceeded { limit: usize },
}

impl CoordinatorError {
    /// Network/Policy errors in spec §7's taxonomy: always recoverable on
    /// the next attempt once the coordinator's window clears.
    pub fn is_recoverable(&self) -> bool {
        true
    }
}

#[async_trait]
pub trait Coordinator: Send + Sync {
    async fn reserve(&self, module_id: &str) -> Result<AttemptId, CoordinatorError>;
    async fn update_progress(
        &self,
        module_id: &str,
        attempt_id: AttemptId,
        bytes_received: u64,
        expected_bytes: Option<u64>,
    );
    async fn complete(
        &self,
        module_id: &str,
        attempt_id: AttemptId,
        reason: DownloadEndReason,
        bytes_downloaded: u64,
        expected_bytes: Option<u64>,
    );
    async fn statistics(&self) -> CoordinatorStatistics;
}

struct CoordinatorState {
    active: HashMap<String, DownloadAttempt>,
    history: VecDeque<DownloadRecord>,
}

pub struct DownloadCoordinator {
    state: RwLock<CoordinatorState>,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
    max_concurrent: usize,
    cooldown: Duration,
    max_per_hour: usize,
    max_history: usize,
}

impl DownloadCoordinator {
    pub fn new(
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
        max_concurrent: usize,
        cooldown: Duration,
        max_per_hour: usize,
        max_history: usize,
    ) -> Self {
        DownloadCoordinator {
            state: RwLock::new(CoordinatorState {
                active: HashMap::new(),
                history: VecDeque::new(),
            }),
            clock,
            audit,
            max_concurrent,
            cooldown,
            max_per_hour,
            max_history,
        }
    }
}

#[async_trait]
impl Coordinator for DownloadCoordinator {
    async fn reserve(&self, module_id: &str) -> Result<AttemptId, CoordinatorError> {
        let now = self.clock.now();
        let mut state = self.state.write().await;

        if state.active.len() >= self.max_concurrent {
            return Err(CoordinatorError::TooManyConcurrentDownloads { limit: self.max_concurrent });
        }
        if state.active.contains_key(module_id) {
            return Err(CoordinatorError::DownloadAlreadyInProgress { module_id: module_id.to_string() });
        }

        if let Some(last_finished) = state
            .history
            .iter()
            .filter(|r| r.module_id == module_id)
            .map(|r| r.finished_at)
            .max()
        {
            let elapsed = now - last_finished;
            if elapsed < self.cooldown {
                let retry_after = self.cooldown - elapsed;
                self.audit.emit(AuditEvent::RateLimitExceeded {
                    cooldown_remaining_seconds: retry_after.num_seconds(),
                });
                return Err(CoordinatorError::RateLimitExceeded {
                    retry_after_secs: retry_after.num_seconds(),
                });
            }
        }

        let window_start = now - Duration::hours(1);
        let recent_count = state.history.iter().filter(|r| r.finished_at >= window_start).count();
        if recent_count >= self.max_per_hour {
            return Err(CoordinatorError::DownloadQuotaExceeded { limit: self.max_per_hour });
        }

        let attempt_id = Uuid::new_v4();
        state.active.insert(
            module_id.to_string(),
            DownloadAttempt {
                module_id: module_id.to_string(),
                attempt_id,
                started_at: now,
                last_updated_at: now,
                bytes_received: 0,
                expected_bytes: None,
            },
        );
        Ok(attempt_id)
    }

    async fn update_progress(
        &self,
        module_id: &str,
        attempt_id: AttemptId,
        bytes_received: u64,
        expected_bytes: Option<u64>,
    ) {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        if let Some(attempt) = state.active.get_mut(module_id) {
            if attempt.attempt_id == attempt_id {
                attempt.bytes_received = bytes_received;
                attempt.expected_bytes = expected_bytes.or(attempt.expected_bytes);
                attempt.last_updated_at = now;
            }
            // stale (attempt_id, module_id) tuple: ignored.
        }
    }

    async fn complete(
        &self,
        module_id: &str,
        attempt_id: AttemptId,
        reason: DownloadEndReason,
        bytes_downloaded: u64,
        expected_bytes: Option<u64>,
    ) {
        let now = self.clock.now();
        let mut state = self.state.write().await;

        let started_at = match state.active.get(module_id) {
            Some(attempt) if attempt.attempt_id == attempt_id => {
                let started = attempt.started_at;
                state.active.remove(module_id);
                started
            }
            _ => state
                .history
                .iter()
                .find(|r| r.attempt_id == attempt_id)
                .map(|r| r.started_at)
                .unwrap_or(now),
        };

        let success = reason.is_success();
        state.history.push_back(DownloadRecord {
            module_id: module_id.to_string(),
            attempt_id,
            started_at,
            finished_at: now,
            success,
            end_reason: reason,
            bytes_downloaded,
            expected_bytes,
        });

        while state.history.len() > self.max_history {
            state.history.pop_front();
        }
    }

    async fn statistics(&self) -> CoordinatorStatistics {
        let state = self.state.read().await;
        let total = state.history.len();
        let success = state.history.iter().filter(|r| r.success).count();
        let failed = total - success;
        let total_bytes = state.history.iter().map(|r| r.bytes_downloaded).sum::<u64>()
            + state.active.values().map(|a| a.bytes_received).sum::<u64>();
        CoordinatorStatistics {
            active: state.active.len(),
            total,
            success,
            failed,
            total_bytes,
        }
    }
}
