//! # Transfer Job State Machine
//!
//! Lifecycle of one unit of copy, delete or metadata work against a device
//! session.
//!
//! ## Overview
//!
//! A [`TransferJob`] is created by the pipeline when an operation is
//! requested and is only ever mutated through its transition methods. Each
//! job covers a batch of items; per-item results are recorded while the job
//! is running, so a batch can finish `Done` with individual failures.
//!
//! ## State Machine
//!
//! ```text
//! Pending → Running → Done
//!     ↓         ↓
//!     ├──────→ Failed
//!     └──────→ Cancelled
//! ```
//!
//! `Failed` carries the originating error message. A pending job may be
//! cancelled outright; a running job is cancelled cooperatively by the
//! pipeline between steps.
//!
//! ## Usage
//!
//! ```rust
//! use core_sync::{ItemOutcome, TransferJob, TransferKind, TransferStatus};
//! use core_device::SessionId;
//!
//! let job = TransferJob::new(TransferKind::CopyOut, SessionId::new(), 2);
//! let mut job = job.start().unwrap();
//! job.record(0, ItemOutcome::Succeeded).unwrap();
//! job.record(1, ItemOutcome::Failed("read error".into())).unwrap();
//!
//! let job = job.complete().unwrap();
//! assert_eq!(job.status, TransferStatus::Done);
//! assert_eq!(job.succeeded(), 1);
//! assert_eq!(job.failed(), 1);
//! ```

use crate::{Result, SyncError};
use bridge_traits::device::FieldRejection;
use core_device::SessionId;
use core_runtime::events::JobOutcome;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a transfer job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferJobId(Uuid);

impl TransferJobId {
    /// Create a new random transfer job ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a transfer job ID from a string
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn from_string(s: &str) -> Result<Self> {
        Ok(Self(
            Uuid::parse_str(s).map_err(|e| SyncError::InvalidJobId(e.to_string()))?,
        ))
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for TransferJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransferJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for TransferJobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<TransferJobId> for Uuid {
    fn from(id: TransferJobId) -> Self {
        id.0
    }
}

// ============================================================================
// Status Types
// ============================================================================

/// The current status of a transfer job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    /// Queued on the worker pool, not yet picked up
    Pending,
    /// A worker is processing items
    Running,
    /// Every item was attempted
    Done,
    /// The job stopped on an error; see `error_message`
    Failed,
    /// Cancelled before or while running
    Cancelled,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Done | TransferStatus::Failed | TransferStatus::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, TransferStatus::Pending | TransferStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Running => "running",
            TransferStatus::Done => "done",
            TransferStatus::Failed => "failed",
            TransferStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for TransferStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TransferStatus::Pending),
            "running" => Ok(TransferStatus::Running),
            "done" => Ok(TransferStatus::Done),
            "failed" => Ok(TransferStatus::Failed),
            "cancelled" => Ok(TransferStatus::Cancelled),
            _ => Err(SyncError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a transfer job does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    /// Host file onto the device
    CopyIn,
    /// Device track into local staging
    CopyOut,
    /// Remove tracks from the device
    Delete,
    /// Push edited fields to the device's metadata store
    MetadataUpdate,
}

impl TransferKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferKind::CopyIn => "copy_in",
            TransferKind::CopyOut => "copy_out",
            TransferKind::Delete => "delete",
            TransferKind::MetadataUpdate => "metadata_update",
        }
    }
}

impl FromStr for TransferKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "copy_in" => Ok(TransferKind::CopyIn),
            "copy_out" => Ok(TransferKind::CopyOut),
            "delete" => Ok(TransferKind::Delete),
            "metadata_update" => Ok(TransferKind::MetadataUpdate),
            _ => Err(SyncError::InvalidTransferKind(s.to_string())),
        }
    }
}

impl std::fmt::Display for TransferKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Item Results
// ============================================================================

/// Result of one item in a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "message", rename_all = "lowercase")]
pub enum ItemOutcome {
    Succeeded,
    Failed(String),
    /// Not started because the job was cancelled first
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemResult {
    /// Position of the item in the request, starting at 0
    pub index: usize,
    pub outcome: ItemOutcome,
    /// Fields the device refused while the item was otherwise applied
    pub rejections: Vec<FieldRejection>,
    /// Staged copy of the track, for copy-out
    pub local_path: Option<PathBuf>,
}

impl ItemResult {
    pub fn new(index: usize, outcome: ItemOutcome) -> Self {
        Self {
            index,
            outcome,
            rejections: Vec::new(),
            local_path: None,
        }
    }

    pub fn with_rejections(mut self, rejections: Vec<FieldRejection>) -> Self {
        self.rejections = rejections;
        self
    }

    pub fn with_local_path(mut self, path: PathBuf) -> Self {
        self.local_path = Some(path);
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome == ItemOutcome::Succeeded
    }
}

// ============================================================================
// Transfer Job Entity
// ============================================================================

/// A transfer job with state machine semantics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferJob {
    pub id: TransferJobId,
    pub session_id: SessionId,
    pub kind: TransferKind,
    pub status: TransferStatus,
    /// Number of items requested
    pub items: usize,
    /// Per-item results, in the order items were processed
    pub results: Vec<ItemResult>,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl TransferJob {
    /// Create a new transfer job in pending state
    pub fn new(kind: TransferKind, session_id: SessionId, items: usize) -> Self {
        Self::new_at(kind, session_id, items, current_timestamp())
    }

    /// Like [`new`](Self::new), stamped with `created_at` (Unix seconds).
    pub fn new_at(
        kind: TransferKind,
        session_id: SessionId,
        items: usize,
        created_at: i64,
    ) -> Self {
        Self {
            id: TransferJobId::new(),
            session_id,
            kind,
            status: TransferStatus::Pending,
            items,
            results: Vec::with_capacity(items),
            error_message: None,
            created_at,
            started_at: None,
            completed_at: None,
        }
    }

    /// Start the job
    ///
    /// # Errors
    ///
    /// Returns an error if the job is not in `Pending` state
    pub fn start(self) -> Result<Self> {
        self.start_at(current_timestamp())
    }

    pub fn start_at(mut self, now: i64) -> Result<Self> {
        self.validate_transition(TransferStatus::Running)?;
        self.status = TransferStatus::Running;
        self.started_at = Some(now);
        Ok(self)
    }

    /// Record the result of one item
    ///
    /// # Errors
    ///
    /// Returns an error if the job is not in `Running` state
    pub fn record(&mut self, index: usize, outcome: ItemOutcome) -> Result<()> {
        self.record_result(ItemResult::new(index, outcome))
    }

    pub fn record_result(&mut self, result: ItemResult) -> Result<()> {
        if self.status != TransferStatus::Running {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: "record".to_string(),
                reason: "Job must be running to record item results".to_string(),
            });
        }
        self.results.push(result);
        Ok(())
    }

    /// Mark the job as done
    pub fn complete(self) -> Result<Self> {
        self.complete_at(current_timestamp())
    }

    pub fn complete_at(mut self, now: i64) -> Result<Self> {
        self.validate_transition(TransferStatus::Done)?;
        self.status = TransferStatus::Done;
        self.completed_at = Some(now);
        Ok(self)
    }

    /// Mark the job as failed with the originating error message
    pub fn fail(self, error_message: impl Into<String>) -> Result<Self> {
        self.fail_at(error_message, current_timestamp())
    }

    pub fn fail_at(mut self, error_message: impl Into<String>, now: i64) -> Result<Self> {
        self.validate_transition(TransferStatus::Failed)?;
        self.status = TransferStatus::Failed;
        self.completed_at = Some(now);
        self.error_message = Some(error_message.into());
        Ok(self)
    }

    /// Cancel the job
    ///
    /// # Errors
    ///
    /// Returns an error if the job is already in a terminal state
    pub fn cancel(self) -> Result<Self> {
        self.cancel_at(current_timestamp())
    }

    pub fn cancel_at(mut self, now: i64) -> Result<Self> {
        self.validate_transition(TransferStatus::Cancelled)?;
        self.status = TransferStatus::Cancelled;
        self.completed_at = Some(now);
        Ok(self)
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, ItemOutcome::Failed(_)))
            .count()
    }

    pub fn rejected_fields(&self) -> usize {
        self.results.iter().map(|r| r.rejections.len()).sum()
    }

    /// Indices of items that failed
    pub fn failed_indices(&self) -> Vec<usize> {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, ItemOutcome::Failed(_)))
            .map(|r| r.index)
            .collect()
    }

    pub fn result(&self, index: usize) -> Option<&ItemResult> {
        self.results.iter().find(|r| r.index == index)
    }

    /// Failure message, when the job failed
    pub fn failure_reason(&self) -> Option<&str> {
        match self.status {
            TransferStatus::Failed => self.error_message.as_deref(),
            _ => None,
        }
    }

    /// Outcome reported to the host; `None` while the job is active.
    pub fn outcome(&self) -> Option<JobOutcome> {
        match self.status {
            TransferStatus::Pending | TransferStatus::Running => None,
            TransferStatus::Done => Some(JobOutcome::Done {
                succeeded: self.succeeded() as u64,
                failed: self.failed() as u64,
                rejected_fields: self.rejected_fields() as u64,
            }),
            TransferStatus::Failed => Some(JobOutcome::Failed {
                message: self.error_message.clone().unwrap_or_default(),
            }),
            TransferStatus::Cancelled => Some(JobOutcome::Cancelled {
                completed: self.succeeded() as u64,
            }),
        }
    }

    pub fn duration_secs(&self) -> Option<u64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).max(0) as u64),
            _ => None,
        }
    }

    fn validate_transition(&self, to: TransferStatus) -> Result<()> {
        let valid = match (self.status, to) {
            (TransferStatus::Pending, TransferStatus::Running) => true,
            (TransferStatus::Pending, TransferStatus::Cancelled) => true,
            (TransferStatus::Pending, TransferStatus::Failed) => true,

            (TransferStatus::Running, TransferStatus::Done) => true,
            (TransferStatus::Running, TransferStatus::Failed) => true,
            (TransferStatus::Running, TransferStatus::Cancelled) => true,

            _ => false,
        };

        if !valid {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!(
                    "Cannot transition from {} to {}",
                    self.status.as_str(),
                    to.as_str()
                ),
            });
        }

        Ok(())
    }
}

fn current_timestamp() -> i64 {
    core_async::time::now_secs() as i64
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn job(items: usize) -> TransferJob {
        TransferJob::new(TransferKind::CopyOut, SessionId::new(), items)
    }

    #[test]
    fn test_transfer_job_id_from_string() {
        let uuid_str = "550e8400-e29b-41d4-a716-446655440000";
        let id = TransferJobId::from_string(uuid_str).unwrap();
        assert_eq!(id.as_str(), uuid_str);
        assert!(TransferJobId::from_string("nope").is_err());
    }

    #[test]
    fn test_status_is_terminal() {
        assert!(!TransferStatus::Pending.is_terminal());
        assert!(!TransferStatus::Running.is_terminal());
        assert!(TransferStatus::Done.is_terminal());
        assert!(TransferStatus::Failed.is_terminal());
        assert!(TransferStatus::Cancelled.is_terminal());
        assert!(TransferStatus::Running.is_active());
    }

    #[test]
    fn test_status_and_kind_parsing() {
        assert_eq!(
            TransferStatus::from_str("RUNNING").unwrap(),
            TransferStatus::Running
        );
        assert!(TransferStatus::from_str("completed").is_err());
        assert_eq!(
            "metadata_update".parse::<TransferKind>().unwrap(),
            TransferKind::MetadataUpdate
        );
        assert!("move".parse::<TransferKind>().is_err());
        assert_eq!(
            serde_json::to_string(&TransferKind::CopyIn).unwrap(),
            "\"copy_in\""
        );
    }

    #[test]
    fn test_lifecycle_done() {
        let job = job(2).start().unwrap();
        assert_eq!(job.status, TransferStatus::Running);
        assert!(job.started_at.is_some());

        let mut job = job;
        job.record(0, ItemOutcome::Succeeded).unwrap();
        job.record_result(
            ItemResult::new(1, ItemOutcome::Succeeded)
                .with_rejections(vec![FieldRejection::new("genre", "refused")]),
        )
        .unwrap();
        let job = job.complete().unwrap();

        assert_eq!(
            job.outcome(),
            Some(JobOutcome::Done {
                succeeded: 2,
                failed: 0,
                rejected_fields: 1
            })
        );
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_explicit_timestamps() {
        let job = TransferJob::new_at(TransferKind::Delete, SessionId::new(), 1, 100);
        let job = job.start_at(160).unwrap().complete_at(190).unwrap();
        assert_eq!(job.created_at, 100);
        assert_eq!(job.started_at, Some(160));
        assert_eq!(job.completed_at, Some(190));
        assert_eq!(job.duration_secs(), Some(30));

        let cancelled = TransferJob::new_at(TransferKind::Delete, SessionId::new(), 1, 5)
            .cancel_at(7)
            .unwrap();
        assert_eq!(cancelled.completed_at, Some(7));
    }

    #[test]
    fn test_fail_keeps_reason() {
        let job = job(1).start().unwrap().fail("device storage full").unwrap();
        assert_eq!(job.status, TransferStatus::Failed);
        assert_eq!(job.failure_reason(), Some("device storage full"));
        assert_eq!(
            job.outcome(),
            Some(JobOutcome::Failed {
                message: "device storage full".to_string()
            })
        );
    }

    #[test]
    fn test_cancel_pending_job() {
        let job = job(3).cancel().unwrap();
        assert_eq!(job.status, TransferStatus::Cancelled);
        assert_eq!(job.outcome(), Some(JobOutcome::Cancelled { completed: 0 }));
    }

    #[test]
    fn test_invalid_transitions() {
        let done = job(0).start().unwrap().complete().unwrap();
        assert!(matches!(
            done.clone().start(),
            Err(SyncError::InvalidStateTransition { .. })
        ));
        assert!(done.clone().cancel().is_err());
        assert!(done.fail("late").is_err());

        // Cannot complete without running
        assert!(job(1).complete().is_err());
    }

    #[test]
    fn test_record_requires_running() {
        let mut pending = job(1);
        assert!(pending.record(0, ItemOutcome::Succeeded).is_err());
        assert!(pending.outcome().is_none());
    }

    #[test]
    fn test_failed_indices() {
        let mut job = job(5).start().unwrap();
        for i in 0..5 {
            let outcome = if i == 2 {
                ItemOutcome::Failed("read error".to_string())
            } else {
                ItemOutcome::Succeeded
            };
            job.record(i, outcome).unwrap();
        }
        assert_eq!(job.failed_indices(), vec![2]);
        assert_eq!(job.succeeded(), 4);
        assert!(job.result(3).unwrap().is_success());
    }
}
