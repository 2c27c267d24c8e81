//! Upload task state.

use std::fmt;

use protocol::FileRecord;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{ApiError, UploadSource};

/// Client-generated task identifier. Only used for correlation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl TransferStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Failed | TransferStatus::Cancelled
        )
    }
}

/// Why a task failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// No HTTP response was received.
    Network(String),
    /// The server answered with an error status.
    Rejected { status: u16, message: String },
    /// The session was missing or rejected.
    Unauthorized,
    /// The local file could not be read, or the response was unusable.
    Io(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Network(_) => f.write_str("Network error"),
            FailureReason::Rejected { status, message } => write!(f, "{} ({})", message, status),
            FailureReason::Unauthorized => f.write_str("Not authenticated"),
            FailureReason::Io(msg) => write!(f, "{}", msg),
        }
    }
}

impl From<ApiError> for FailureReason {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized => FailureReason::Unauthorized,
            ApiError::Network(msg) => FailureReason::Network(msg),
            ApiError::Server { status, message } => FailureReason::Rejected { status, message },
            ApiError::Schema(msg) => FailureReason::Io(format!("invalid server response: {}", msg)),
            ApiError::Io(msg) => FailureReason::Io(msg),
            ApiError::InvalidUrl(msg) => FailureReason::Network(msg),
            ApiError::Cancelled => FailureReason::Io("cancelled".to_string()),
        }
    }
}

/// One upload, from enqueue to terminal state.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferTask {
    pub id: TaskId,
    pub source: UploadSource,
    /// Percentage in `0..=100`. Never decreases.
    pub progress: u8,
    pub status: TransferStatus,
    pub failure: Option<FailureReason>,
    /// The record the server created, once completed.
    pub result: Option<FileRecord>,
    /// Session epoch the upload was authorized under, once it left the queue.
    pub session_epoch: Option<u64>,
}

impl TransferTask {
    pub(crate) fn new(source: UploadSource) -> Self {
        Self {
            id: TaskId::generate(),
            source,
            progress: 0,
            status: TransferStatus::Pending,
            failure: None,
            result: None,
            session_epoch: None,
        }
    }

    /// Apply a progress report. Returns whether anything changed.
    ///
    /// Only active tasks move, and only forward.
    pub(crate) fn advance(&mut self, percent: u8) -> bool {
        let percent = percent.min(100);
        if self.status != TransferStatus::Active || percent <= self.progress {
            return false;
        }
        self.progress = percent;
        true
    }

    pub(crate) fn start(&mut self) -> bool {
        if self.status != TransferStatus::Pending {
            return false;
        }
        self.status = TransferStatus::Active;
        true
    }

    pub(crate) fn complete(&mut self, record: FileRecord) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = TransferStatus::Completed;
        self.progress = 100;
        self.result = Some(record);
        true
    }

    pub(crate) fn fail(&mut self, reason: FailureReason) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = TransferStatus::Failed;
        self.failure = Some(reason);
        true
    }

    pub(crate) fn cancel(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = TransferStatus::Cancelled;
        true
    }
}

/// Integer percentage of `sent / total`.
///
/// Held at 99 until the server confirms, so 100 always means completed.
pub(crate) fn percent_of(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return 99;
    }
    let pct = (sent.min(total) as u128 * 100 / total as u128) as u8;
    pct.min(99)
}
