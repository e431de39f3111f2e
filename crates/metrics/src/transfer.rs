//! Contains upload and transfer metrics, notably [`TransferMetrics`].

use lazy_static::lazy_static;
use prometheus_client::encoding::LabelValueEncoder;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::{Registry, Unit};
use std::fmt::{Display, Formatter, Write};

lazy_static! {
    static ref UPLOADS: Family<UploadLabels, Counter> = Family::default();
    static ref ENQUEUED: Counter = Counter::default();
    static ref ATTEMPTS: Family<AttemptLabels, Counter> = Family::default();
    static ref DELIVERED_BYTES: Counter = Counter::default();
    static ref MISSING_FILES: Counter = Counter::default();
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct UploadLabels {
    result: UploadResult,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct AttemptLabels {
    outcome: AttemptOutcome,
}

/// Whether an uploaded file was accepted by the relay.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum UploadResult {
    Accepted,
    Rejected,
}

/// The outcome of a single transfer attempt.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum AttemptOutcome {
    Delivered,
    Failed,
    Abandoned,
}

impl EncodeLabelValue for UploadResult {
    fn encode(&self, encoder: &mut LabelValueEncoder) -> Result<(), std::fmt::Error> {
        encoder.write_str(self.to_string().as_str())
    }
}

impl Display for UploadResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadResult::Accepted => write!(f, "accepted"),
            UploadResult::Rejected => write!(f, "rejected"),
        }
    }
}

impl EncodeLabelValue for AttemptOutcome {
    fn encode(&self, encoder: &mut LabelValueEncoder) -> Result<(), std::fmt::Error> {
        encoder.write_str(self.to_string().as_str())
    }
}

impl Display for AttemptOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptOutcome::Delivered => write!(f, "delivered"),
            AttemptOutcome::Failed => write!(f, "failed"),
            AttemptOutcome::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// Register the upload and transfer metric families with the registry.
pub(crate) fn register_transfer_metrics(registry: &mut Registry) {
    registry.register(
        "uploads",
        "Number of uploaded files, by validation result",
        UPLOADS.clone(),
    );

    registry.register(
        "transfer_enqueued",
        "Number of files registered for transfer",
        ENQUEUED.clone(),
    );

    registry.register(
        "transfer_attempts",
        "Number of finished transfer attempts, by outcome",
        ATTEMPTS.clone(),
    );

    registry.register_with_unit(
        "transfer_delivered",
        "Number of bytes delivered to the remote target",
        Unit::Bytes,
        DELIVERED_BYTES.clone(),
    );

    registry.register(
        "transfer_local_files_missing",
        "Number of transfers abandoned because the stashed file was gone",
        MISSING_FILES.clone(),
    );
}

/// Upload and transfer metrics.
pub struct TransferMetrics;

impl TransferMetrics {
    /// Tracks one uploaded file.
    pub fn track_upload(result: UploadResult) {
        UPLOADS.get_or_create(&UploadLabels { result }).inc();
    }

    /// Tracks one file registered with the queue.
    pub fn track_enqueued() {
        ENQUEUED.inc();
    }

    /// Tracks the outcome of one transfer attempt.
    pub fn track_attempt(outcome: AttemptOutcome) {
        ATTEMPTS.get_or_create(&AttemptLabels { outcome }).inc();
    }

    /// Tracks payload bytes that reached the remote target.
    pub fn track_bytes_delivered(bytes: u64) {
        DELIVERED_BYTES.inc_by(bytes);
    }

    /// Tracks a transfer given up before contacting the remote target
    /// because its stashed file disappeared.
    pub fn track_local_file_missing() {
        MISSING_FILES.inc();
    }

    /// The number of finished transfer attempts with the given outcome.
    pub fn attempts(outcome: AttemptOutcome) -> u64 {
        ATTEMPTS.get_or_create(&AttemptLabels { outcome }).get()
    }

    /// The number of transfers abandoned because their stashed file was gone.
    pub fn local_files_missing() -> u64 {
        MISSING_FILES.get()
    }
}
