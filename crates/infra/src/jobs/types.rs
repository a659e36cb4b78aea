//! Core job types: what a job does, which lane it runs on, and the progress
//! record it publishes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use memberflow_core::{CollectionId, DomainError, JobId, MemberId};

/// Which source members a bulk job considers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "member_ids", rename_all = "snake_case")]
pub enum MemberSelection {
    /// Every member of the source collection.
    All,
    /// Only these members (those not in the source are ignored).
    Selected(Vec<MemberId>),
}

impl MemberSelection {
    /// Build from the submission-layer `mode` string and optional ID list.
    pub fn from_mode(mode: &str, member_ids: Option<Vec<MemberId>>) -> Result<Self, DomainError> {
        match mode {
            "all" => Ok(Self::All),
            "selected" => match member_ids {
                Some(ids) if !ids.is_empty() => Ok(Self::Selected(ids)),
                _ => Err(DomainError::validation(
                    "member_ids required when mode is 'selected'",
                )),
            },
            other => Err(DomainError::validation(format!(
                "mode must be 'all' or 'selected', got '{other}'"
            ))),
        }
    }
}

/// Job kind for routing to the appropriate runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum JobKind {
    /// Add source members missing from the target.
    BulkAdd {
        source: CollectionId,
        target: CollectionId,
        selection: MemberSelection,
    },
    /// Remove from `target` the members a previous bulk job wrote.
    Undo {
        target: CollectionId,
        job_to_undo: JobId,
    },
}

impl JobKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            JobKind::BulkAdd { .. } => "bulk_add",
            JobKind::Undo { .. } => "undo_bulk_add",
        }
    }
}

/// Priority class of background work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    /// Low-latency work: small bulk jobs, undo.
    Interactive,
    /// Large bulk jobs that yield to interactive work.
    Bulk,
}

impl Lane {
    /// Lane for a bulk job whose delta is estimated at `estimated` members.
    pub fn for_estimate(estimated: usize, threshold: usize) -> Self {
        if estimated > threshold {
            Lane::Bulk
        } else {
            Lane::Interactive
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::Interactive => "interactive",
            Lane::Bulk => "bulk",
        }
    }
}

/// A queued unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub lane: Lane,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(kind: JobKind, lane: Lane) -> Self {
        Self {
            id: JobId::new(),
            kind,
            lane,
            created_at: Utc::now(),
        }
    }
}

/// Lifecycle state published in a job's progress record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Queued (or unknown to the store).
    Pending,
    Started,
    InProgress,
    /// Yielding to an interactive job.
    Paused,
    Completed,
    Cancelled,
    Failed,
    /// The stored record could not be decoded.
    Unknown,
}

impl JobState {
    /// Wire name, as serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Started => "STARTED",
            JobState::InProgress => "IN_PROGRESS",
            JobState::Paused => "PAUSED",
            JobState::Completed => "COMPLETED",
            JobState::Cancelled => "CANCELLED",
            JobState::Failed => "FAILED",
            JobState::Unknown => "UNKNOWN",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Cancelled | JobState::Failed
        )
    }
}

/// Progress record of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub job_id: JobId,
    pub state: JobState,
    pub current: u64,
    pub total: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Rows written (bulk jobs, terminal records).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inserted: Option<u64>,
    /// Rows removed (undo jobs, terminal records).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<u64>,
    pub updated_at: DateTime<Utc>,
}

/// `current / total` as a percentage; an empty job is 100% done.
pub fn percent(current: u64, total: u64) -> f64 {
    if total == 0 {
        100.0
    } else {
        (current as f64 / total as f64) * 100.0
    }
}

impl JobProgress {
    fn base(job_id: JobId, state: JobState, current: u64, total: u64) -> Self {
        Self {
            job_id,
            state,
            current,
            total,
            percent: None,
            eta_seconds: None,
            message: None,
            inserted: None,
            deleted: None,
            updated_at: Utc::now(),
        }
    }

    pub fn pending(job_id: JobId) -> Self {
        Self::base(job_id, JobState::Pending, 0, 0)
    }

    pub fn unknown(job_id: JobId, message: impl Into<String>) -> Self {
        Self::base(job_id, JobState::Unknown, 0, 0).with_message(message)
    }

    pub fn started(job_id: JobId, total: u64) -> Self {
        Self::base(job_id, JobState::Started, 0, total)
    }

    pub fn in_progress(job_id: JobId, current: u64, total: u64, per_item_secs: f64) -> Self {
        let remaining = total.saturating_sub(current);
        Self {
            percent: Some(percent(current, total)),
            eta_seconds: Some(remaining as f64 * per_item_secs),
            ..Self::base(job_id, JobState::InProgress, current, total)
        }
    }

    pub fn paused(job_id: JobId, current: u64, total: u64) -> Self {
        Self {
            percent: Some(percent(current, total)),
            ..Self::base(job_id, JobState::Paused, current, total)
        }
        .with_message("paused for interactive job")
    }

    pub fn completed(job_id: JobId, current: u64, total: u64) -> Self {
        Self {
            percent: Some(100.0),
            eta_seconds: Some(0.0),
            ..Self::base(job_id, JobState::Completed, current, total)
        }
    }

    pub fn cancelled(job_id: JobId, current: u64, total: u64) -> Self {
        Self::base(job_id, JobState::Cancelled, current, total)
    }

    pub fn failed(job_id: JobId, current: u64, total: u64, message: impl Into<String>) -> Self {
        Self::base(job_id, JobState::Failed, current, total).with_message(message)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_inserted(mut self, inserted: u64) -> Self {
        self.inserted = Some(inserted);
        self
    }

    pub fn with_deleted(mut self, deleted: u64) -> Self {
        self.deleted = Some(deleted);
        self
    }
}

/// Result of a bulk job that ran to a terminal state without faulting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkAddReport {
    pub state: JobState,
    /// Members processed (committed batches).
    pub current: u64,
    /// Rows newly written.
    pub inserted: u64,
    pub total: u64,
}

/// Result of an undo job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UndoReport {
    pub deleted: u64,
}

/// What a finished job produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    BulkAdd(BulkAddReport),
    Undo(UndoReport),
}

impl JobOutcome {
    pub fn state(&self) -> JobState {
        match self {
            JobOutcome::BulkAdd(report) => report.state,
            JobOutcome::Undo(_) => JobState::Completed,
        }
    }
}
