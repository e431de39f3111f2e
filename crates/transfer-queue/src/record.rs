use chrono::{DateTime, Utc};
use local_stash::StashedFile;
use serde::{Deserialize, Serialize};
use shortguid::ShortGuid;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;
use transport_traits::{FailureKind, TransportFailure};

/// The error recorded for attempts that were cut short by a restart.
pub const INTERRUPTED_BY_RESTART: &str = "attempt interrupted by restart";

/// The delivery state of a [`TransferRecord`].
///
/// ```text
/// pending ──► in_transfer ──► delivered
///                 │  ▲
///                 ▼  │
///               failed
///                 │
///                 ▼ (attempt limit or non-retryable failure)
///             abandoned
/// ```
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    InTransfer,
    Delivered,
    Failed,
    Abandoned,
}

impl TransferStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Delivered | TransferStatus::Abandoned)
    }

    /// Whether a transfer attempt may be started from this state.
    pub fn can_start_attempt(&self) -> bool {
        matches!(self, TransferStatus::Pending | TransferStatus::Failed)
    }
}

impl Display for TransferStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferStatus::Pending => write!(f, "pending"),
            TransferStatus::InTransfer => write!(f, "in_transfer"),
            TransferStatus::Delivered => write!(f, "delivered"),
            TransferStatus::Failed => write!(f, "failed"),
            TransferStatus::Abandoned => write!(f, "abandoned"),
        }
    }
}

impl FromStr for TransferStatus {
    type Err = UnknownStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransferStatus::Pending),
            "in_transfer" => Ok(TransferStatus::InTransfer),
            "delivered" => Ok(TransferStatus::Delivered),
            "failed" => Ok(TransferStatus::Failed),
            "abandoned" => Ok(TransferStatus::Abandoned),
            other => Err(UnknownStatusError(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown transfer status {0}")]
pub struct UnknownStatusError(String);

/// The input for registering a stashed file with the queue.
#[derive(Debug, Clone)]
pub struct NewTransfer {
    pub event_id: String,
    pub uploader_name: String,
    /// The client-supplied file name; display only.
    pub original_name: String,
    /// The stashed file. Its file name becomes the remote file name.
    pub local_path: PathBuf,
    pub size_bytes: u64,
}

impl NewTransfer {
    /// Describes the transfer of a file that was just written to the stash.
    pub fn from_stashed<E, U, O>(
        stashed: StashedFile,
        event_id: E,
        uploader_name: U,
        original_name: O,
    ) -> Self
    where
        E: Into<String>,
        U: Into<String>,
        O: Into<String>,
    {
        Self {
            event_id: event_id.into(),
            uploader_name: uploader_name.into(),
            original_name: original_name.into(),
            local_path: stashed.local_path,
            size_bytes: stashed.size_bytes,
        }
    }
}

/// One uploaded file's journey from the local stash to the remote target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: ShortGuid,
    pub event_id: String,
    pub uploader_name: String,
    pub original_name: String,
    pub local_path: PathBuf,
    pub remote_path: String,
    pub size_bytes: u64,
    pub status: TransferStatus,
    pub attempt_count: u32,
    /// The number of attempts after which a retryable failure abandons the record.
    pub attempt_limit: u32,
    pub last_error: Option<String>,
    pub failure_kind: Option<FailureKind>,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// When the next automatic retry is due, if one is scheduled.
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Set once the stashed file was deleted after delivery.
    #[serde(default)]
    pub local_file_removed: bool,
}

impl TransferRecord {
    pub(crate) fn new(
        id: ShortGuid,
        input: NewTransfer,
        remote_path: String,
        attempt_limit: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            event_id: input.event_id,
            uploader_name: input.uploader_name,
            original_name: input.original_name,
            local_path: input.local_path,
            remote_path,
            size_bytes: input.size_bytes,
            status: TransferStatus::Pending,
            attempt_count: 0,
            attempt_limit,
            last_error: None,
            failure_kind: None,
            created_at,
            last_attempt_at: None,
            next_attempt_at: None,
            local_file_removed: false,
        }
    }

    /// `pending | failed -> in_transfer`; counts the attempt before it is made.
    pub(crate) fn begin_attempt(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.ensure(self.status.can_start_attempt(), TransferStatus::InTransfer)?;
        self.status = TransferStatus::InTransfer;
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.last_attempt_at = Some(now);
        self.next_attempt_at = None;
        Ok(())
    }

    /// `in_transfer -> delivered`
    pub(crate) fn mark_delivered(&mut self) -> Result<(), TransitionError> {
        self.ensure(
            self.status == TransferStatus::InTransfer,
            TransferStatus::Delivered,
        )?;
        self.status = TransferStatus::Delivered;
        self.last_error = None;
        self.failure_kind = None;
        Ok(())
    }

    /// `in_transfer -> failed | abandoned`, depending on the failure and the
    /// remaining attempt budget.
    ///
    /// ## Returns
    /// The resulting state.
    pub(crate) fn mark_failed(
        &mut self,
        failure: &TransportFailure,
    ) -> Result<TransferStatus, TransitionError> {
        let next = if failure.is_retryable() && self.attempt_count < self.attempt_limit {
            TransferStatus::Failed
        } else {
            TransferStatus::Abandoned
        };
        self.ensure(self.status == TransferStatus::InTransfer, next)?;
        self.status = next;
        self.last_error = Some(failure.to_string());
        self.failure_kind = Some(failure.kind);
        Ok(next)
    }

    /// `in_transfer -> abandoned` for problems outside the transport,
    /// e.g. a stashed file that disappeared.
    pub(crate) fn abandon<S: Into<String>>(&mut self, reason: S) -> Result<(), TransitionError> {
        self.ensure(
            self.status == TransferStatus::InTransfer,
            TransferStatus::Abandoned,
        )?;
        self.status = TransferStatus::Abandoned;
        self.last_error = Some(reason.into());
        self.failure_kind = None;
        Ok(())
    }

    /// `in_transfer -> failed | abandoned` for an attempt whose outcome was
    /// lost because the process stopped.
    pub(crate) fn mark_interrupted(&mut self) -> Result<TransferStatus, TransitionError> {
        let next = if self.attempt_count < self.attempt_limit {
            TransferStatus::Failed
        } else {
            TransferStatus::Abandoned
        };
        self.ensure(self.status == TransferStatus::InTransfer, next)?;
        self.status = next;
        self.last_error = Some(String::from(INTERRUPTED_BY_RESTART));
        self.failure_kind = None;
        Ok(next)
    }

    /// Grants a failed record a fresh budget of attempts.
    pub(crate) fn reset_attempt_limit(&mut self, max_attempts: u32) {
        self.attempt_limit = self.attempt_count.saturating_add(max_attempts);
        self.next_attempt_at = None;
    }

    fn ensure(&self, allowed: bool, to: TransferStatus) -> Result<(), TransitionError> {
        if allowed {
            Ok(())
        } else {
            Err(TransitionError {
                id: self.id,
                from: self.status,
                to,
            })
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Record {id} cannot transition from {from} to {to}")]
pub struct TransitionError {
    pub id: ShortGuid,
    pub from: TransferStatus,
    pub to: TransferStatus,
}
