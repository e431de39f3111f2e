// only enables the `doc_cfg` feature when
// the `docsrs` configuration attribute is defined
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Tracks the delivery of stashed uploads to a remote target.
//!
//! Every uploaded file becomes a [`TransferRecord`] that the [`TransferQueue`]
//! drives from `pending` to either `delivered` or `abandoned`, retrying
//! transient failures with exponential backoff.

mod journal;
mod policy;
mod queue;
mod record;

#[cfg(test)]
mod tests;

pub use journal::JournalError;
pub use policy::{QueueOptions, RetryPolicy, DEFAULT_JOURNAL_FILE};
pub use queue::{QueueError, QueueStats, RetrySummary, TransferQueue, LOCAL_FILE_MISSING};
pub use record::{
    NewTransfer, TransferRecord, TransferStatus, TransitionError, UnknownStatusError,
    INTERRUPTED_BY_RESTART,
};
