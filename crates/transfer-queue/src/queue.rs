use crate::journal::{Journal, JournalError};
use crate::policy::QueueOptions;
use crate::record::{NewTransfer, TransferRecord, TransferStatus, TransitionError};
use chrono::Utc;
use local_stash::LocalStash;
use metrics::transfer::{AttemptOutcome, TransferMetrics};
use rendezvous::RendezvousGuard;
use serde::Serialize;
use shortguid::ShortGuid;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock, Semaphore};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use transport_traits::{DynTransport, TransportFailure};

/// The error recorded when a stashed file disappeared before its transfer.
pub const LOCAL_FILE_MISSING: &str = "local file no longer exists";

/// Tracks uploaded files until they are delivered to the remote target.
///
/// Attempts run in the background, bounded by `max_concurrent_attempts`.
/// Callers never wait for a transfer; they only ever see record snapshots.
pub struct TransferQueue {
    shared: Arc<Shared>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    inner: RwLock<Inner>,
    transport: DynTransport,
    stash: LocalStash,
    options: QueueOptions,
    sender: mpsc::UnboundedSender<QueueCommand>,
    shutdown: CancellationToken,
    attempts: TaskTracker,
}

struct Inner {
    records: HashMap<ShortGuid, Entry>,
    next_sequence: u64,
    journal: Option<Journal>,
}

struct Entry {
    record: TransferRecord,
    /// Breaks ties between records created at the same instant.
    sequence: u64,
    /// Set while an attempt request sits in the dispatcher channel.
    queued: bool,
    /// Cancels the scheduled automatic retry, if any.
    retry: Option<CancellationToken>,
}

#[derive(Debug)]
enum QueueCommand {
    /// Starts a transfer attempt for the record.
    Attempt(ShortGuid),
}

/// The result of [`TransferQueue::retry_failed`].
#[derive(Debug, Clone, Serialize)]
pub struct RetrySummary {
    /// The number of records that were re-dispatched.
    pub retried: usize,
    /// Snapshots of the re-dispatched records.
    pub records: Vec<TransferRecord>,
}

/// Record counts by status.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub in_transfer: usize,
    pub delivered: usize,
    pub failed: usize,
    pub abandoned: usize,
}

impl QueueStats {
    fn count(&mut self, status: TransferStatus) {
        self.total += 1;
        match status {
            TransferStatus::Pending => self.pending += 1,
            TransferStatus::InTransfer => self.in_transfer += 1,
            TransferStatus::Delivered => self.delivered += 1,
            TransferStatus::Failed => self.failed += 1,
            TransferStatus::Abandoned => self.abandoned += 1,
        }
    }
}

impl TransferQueue {
    /// Starts the queue, recovering journaled records if a journal is configured.
    ///
    /// ## Arguments
    /// * `options` - The queue options.
    /// * `transport` - The transport delivering the files.
    /// * `stash` - The stash holding the files until they are delivered.
    /// * `cleanup_rendezvous` - Completed once the queue has shut down.
    pub async fn start(
        options: QueueOptions,
        transport: DynTransport,
        stash: LocalStash,
        cleanup_rendezvous: RendezvousGuard,
    ) -> Result<Self, QueueError> {
        let (journal, recovered) = match &options.journal_file {
            Some(path) => {
                let (journal, records) = Journal::open(path).await?;
                (Some(journal), records)
            }
            None => (None, Vec::new()),
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            inner: RwLock::new(Inner {
                records: HashMap::default(),
                next_sequence: 0,
                journal,
            }),
            transport,
            stash,
            options,
            sender,
            shutdown: CancellationToken::new(),
            attempts: TaskTracker::new(),
        });

        shared.recover(recovered).await;

        let loop_handle = tokio::spawn(Shared::dispatch_loop(
            shared.clone(),
            receiver,
            cleanup_rendezvous,
        ));

        info!(
            "Transfer queue started using transport {tag} ({limit} concurrent attempts)",
            tag = shared.transport.tag(),
            limit = shared.options.max_concurrent_attempts
        );

        Ok(Self {
            shared,
            loop_handle: Mutex::new(Some(loop_handle)),
        })
    }

    /// Registers a stashed file and dispatches its first attempt.
    ///
    /// Returns as soon as the record is registered; the transfer itself
    /// happens in the background.
    pub async fn enqueue(&self, input: NewTransfer) -> Result<TransferRecord, QueueError> {
        if self.shared.shutdown.is_cancelled() {
            return Err(QueueError::ShuttingDown);
        }

        let file_name = input
            .local_path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .ok_or_else(|| QueueError::InvalidLocalPath(input.local_path.clone()))?;
        let remote_path = self
            .shared
            .transport
            .destination(&input.event_id, &file_name);

        let id = ShortGuid::new_random();
        let record = TransferRecord::new(
            id,
            input,
            remote_path,
            self.shared.options.retry.max_attempts,
            Utc::now(),
        );

        let mut inner = self.shared.inner.write().await;
        let Inner {
            records,
            next_sequence,
            journal,
        } = &mut *inner;

        persist(journal, &record).await;

        let entry = records.entry(id).or_insert(Entry {
            record: record.clone(),
            sequence: *next_sequence,
            queued: false,
            retry: None,
        });
        *next_sequence += 1;
        self.shared.dispatch(entry);

        TransferMetrics::track_enqueued();
        info!(
            record_id = %id,
            "Queued {local:?} for transfer to {remote}",
            local = record.local_path,
            remote = record.remote_path
        );
        Ok(record)
    }

    /// Returns snapshots of all records, optionally filtered by status,
    /// oldest first.
    pub async fn list_queue(&self, status: Option<TransferStatus>) -> Vec<TransferRecord> {
        let inner = self.shared.inner.read().await;
        let mut entries: Vec<&Entry> = inner
            .records
            .values()
            .filter(|entry| status.map_or(true, |status| entry.record.status == status))
            .collect();
        entries.sort_by_key(|entry| (entry.record.created_at, entry.sequence));
        entries
            .into_iter()
            .map(|entry| entry.record.clone())
            .collect()
    }

    /// Returns a snapshot of a single record.
    pub async fn get(&self, id: ShortGuid) -> Result<TransferRecord, QueueError> {
        let inner = self.shared.inner.read().await;
        inner
            .records
            .get(&id)
            .map(|entry| entry.record.clone())
            .ok_or(QueueError::NotFound(id))
    }

    /// Counts the records by status.
    pub async fn stats(&self) -> QueueStats {
        let inner = self.shared.inner.read().await;
        let mut stats = QueueStats::default();
        for entry in inner.records.values() {
            stats.count(entry.record.status);
        }
        stats
    }

    /// Re-dispatches every failed record immediately.
    ///
    /// Scheduled automatic retries of these records are cancelled and each
    /// record receives a fresh budget of attempts. Abandoned records are
    /// left alone. Nothing is changed once the queue is shutting down.
    pub async fn retry_failed(&self) -> Result<RetrySummary, QueueError> {
        if self.shared.shutdown.is_cancelled() {
            return Err(QueueError::ShuttingDown);
        }

        let max_attempts = self.shared.options.retry.max_attempts;

        let mut inner = self.shared.inner.write().await;
        let Inner {
            records, journal, ..
        } = &mut *inner;

        let mut failed: Vec<&mut Entry> = records
            .values_mut()
            .filter(|entry| entry.record.status == TransferStatus::Failed)
            .collect();
        failed.sort_by_key(|entry| (entry.record.created_at, entry.sequence));

        let mut retried = Vec::with_capacity(failed.len());
        for entry in failed {
            if let Some(retry) = entry.retry.take() {
                retry.cancel();
            }
            entry.record.reset_attempt_limit(max_attempts);
            persist(journal, &entry.record).await;
            if self.shared.dispatch(entry) || entry.queued {
                retried.push(entry.record.clone());
            }
        }

        if !retried.is_empty() {
            info!("Manually retrying {count} failed transfers", count = retried.len());
        }

        Ok(RetrySummary {
            retried: retried.len(),
            records: retried,
        })
    }

    /// Checks whether the remote target is reachable.
    pub async fn test_transport_connection(&self) -> Result<String, TransportFailure> {
        let limit = self.shared.options.attempt_timeout;
        match timeout(limit, self.shared.transport.probe()).await {
            Ok(result) => result,
            Err(_) => Err(TransportFailure::timeout(format!(
                "Connection test did not finish within {limit:?}"
            ))),
        }
    }

    /// The tag of the transport delivering the files.
    pub fn transport_tag(&self) -> &str {
        self.shared.transport.tag()
    }

    /// Stops dispatching, cancels scheduled retries and waits for the
    /// attempts in flight to finish.
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();
        let handle = self.loop_handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("The transfer queue dispatcher failed: {e}");
            }
        }
    }
}

impl Shared {
    /// Sends an attempt request for the entry unless one is already queued
    /// or the record cannot be attempted.
    fn dispatch(&self, entry: &mut Entry) -> bool {
        if entry.queued || !entry.record.status.can_start_attempt() {
            return false;
        }

        match self.sender.send(QueueCommand::Attempt(entry.record.id)) {
            Ok(()) => {
                entry.queued = true;
                true
            }
            Err(_) => {
                warn!(record_id = %entry.record.id, "The transfer queue dispatcher is gone");
                false
            }
        }
    }

    async fn request_attempt(&self, id: ShortGuid) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.records.get_mut(&id) {
            entry.retry = None;
            self.dispatch(entry);
        }
    }

    /// Arms the automatic retry timer of a failed record.
    fn schedule_retry(self: &Arc<Self>, entry: &mut Entry, delay: Duration) {
        let id = entry.record.id;
        let token = self.shutdown.child_token();
        if let Some(previous) = entry.retry.replace(token.clone()) {
            previous.cancel();
        }
        entry.record.next_attempt_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| Utc::now().checked_add_signed(delay));

        debug!(record_id = %id, "Retrying transfer in {delay:?}");

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(record_id = %id, "Scheduled retry was cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    shared.request_attempt(id).await;
                }
            }
        });
    }

    /// Re-establishes the records read from the journal.
    async fn recover(self: &Arc<Self>, mut recovered: Vec<TransferRecord>) {
        if recovered.is_empty() {
            return;
        }

        recovered.sort_by_key(|record| record.created_at);

        let mut inner = self.inner.write().await;
        let Inner {
            records,
            next_sequence,
            journal,
        } = &mut *inner;

        let mut resumed = 0usize;
        for mut record in recovered {
            if record.status == TransferStatus::InTransfer {
                match record.mark_interrupted() {
                    Ok(next) => {
                        warn!(record_id = %record.id, "Transfer was interrupted by a restart, now {next}")
                    }
                    Err(e) => error!(record_id = %record.id, "{e}"),
                }
                persist(journal, &record).await;
            }

            let entry = records.entry(record.id).or_insert(Entry {
                record,
                sequence: *next_sequence,
                queued: false,
                retry: None,
            });
            *next_sequence += 1;

            match entry.record.status {
                TransferStatus::Pending => {
                    self.dispatch(entry);
                    resumed += 1;
                }
                TransferStatus::Failed if self.options.retry.auto_retry => {
                    let delay = entry
                        .record
                        .next_attempt_at
                        .and_then(|due| (due - Utc::now()).to_std().ok())
                        .unwrap_or_default();
                    self.schedule_retry(entry, delay);
                    resumed += 1;
                }
                _ => {}
            }
        }

        info!(
            "Recovered {count} transfer records, resuming {resumed}",
            count = records.len()
        );
    }

    async fn dispatch_loop(
        shared: Arc<Self>,
        mut receiver: mpsc::UnboundedReceiver<QueueCommand>,
        cleanup_rendezvous: RendezvousGuard,
    ) {
        let permits = Arc::new(Semaphore::new(shared.options.max_concurrent_attempts.max(1)));

        loop {
            let command = tokio::select! {
                _ = shared.shutdown.cancelled() => break,
                command = receiver.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };

            match command {
                QueueCommand::Attempt(id) => {
                    let permit = tokio::select! {
                        _ = shared.shutdown.cancelled() => break,
                        permit = permits.clone().acquire_owned() => match permit {
                            Ok(permit) => permit,
                            Err(_) => break,
                        },
                    };

                    let attempt = Arc::clone(&shared);
                    shared.attempts.spawn(async move {
                        attempt.attempt(id).await;
                        drop(permit);
                    });
                }
            }
        }

        shared.attempts.close();
        let in_flight = shared.attempts.len();
        if in_flight > 0 {
            info!("Waiting for {in_flight} transfer attempts to finish");
        }
        shared.attempts.wait().await;

        info!("The transfer queue dispatcher stopped");
        cleanup_rendezvous.completed();
    }

    /// Runs a single transfer attempt and records its outcome.
    async fn attempt(self: &Arc<Self>, id: ShortGuid) {
        let record = {
            let mut inner = self.inner.write().await;
            let Inner {
                records, journal, ..
            } = &mut *inner;
            let Some(entry) = records.get_mut(&id) else {
                warn!(record_id = %id, "Attempt requested for an unknown record");
                return;
            };

            entry.queued = false;
            if let Some(retry) = entry.retry.take() {
                retry.cancel();
            }

            if let Err(e) = entry.record.begin_attempt(Utc::now()) {
                debug!(record_id = %id, "Skipping attempt: {e}");
                return;
            }

            persist(journal, &entry.record).await;
            entry.record.clone()
        };

        if !self.stash.exists(&record.local_path).await {
            warn!(
                record_id = %id,
                "Stashed file {path:?} no longer exists, abandoning the transfer",
                path = record.local_path
            );
            let status = self
                .complete(id, |record| {
                    record.abandon(LOCAL_FILE_MISSING)?;
                    Ok(TransferStatus::Abandoned)
                })
                .await;
            if status.is_some() {
                TransferMetrics::track_local_file_missing();
            }
            return;
        }

        info!(
            record_id = %id,
            "Transferring {path:?} to {remote} (attempt {attempt} of {limit})",
            path = record.local_path,
            remote = record.remote_path,
            attempt = record.attempt_count,
            limit = record.attempt_limit
        );

        let limit = self.options.attempt_timeout;
        let deadline = std::time::Instant::now() + limit;
        let transport = self.transport.clone();
        let (local_path, remote_path) = (record.local_path.clone(), record.remote_path.clone());
        let mut transfer = tokio::spawn(async move {
            transport.send(&local_path, &remote_path, deadline).await
        });

        // The permit is held and the record stays in transfer until the
        // transport call has returned, even past the timeout.
        let outcome = match timeout(limit, &mut transfer).await {
            Ok(joined) => join_outcome(joined),
            Err(_) => {
                warn!(
                    record_id = %id,
                    "Transfer did not finish within {limit:?}, waiting for the transport to stop"
                );
                match join_outcome(transfer.await) {
                    Ok(bytes) => {
                        warn!(record_id = %id, "Transfer completed after its deadline");
                        Ok(bytes)
                    }
                    Err(_) => Err(TransportFailure::timeout(format!(
                        "Transfer did not finish within {limit:?}"
                    ))),
                }
            }
        };

        match outcome {
            Ok(bytes) => self.delivered(&record, bytes).await,
            Err(failure) => self.failed(&record, failure).await,
        }
    }

    async fn delivered(&self, record: &TransferRecord, bytes: u64) {
        let id = record.id;
        let status = self
            .complete(id, |record| {
                record.mark_delivered()?;
                Ok(TransferStatus::Delivered)
            })
            .await;
        if status != Some(TransferStatus::Delivered) {
            return;
        }

        TransferMetrics::track_attempt(AttemptOutcome::Delivered);
        TransferMetrics::track_bytes_delivered(bytes);
        info!(record_id = %id, "Delivered {bytes} bytes to {remote}", remote = record.remote_path);

        if !self.options.delete_after_transfer {
            return;
        }

        match self.stash.delete(&record.local_path).await {
            Ok(()) => {
                debug!(record_id = %id, "Removed stashed file {path:?}", path = record.local_path);
                let mut inner = self.inner.write().await;
                let Inner {
                    records, journal, ..
                } = &mut *inner;
                if let Some(entry) = records.get_mut(&id) {
                    entry.record.local_file_removed = true;
                    persist(journal, &entry.record).await;
                }
            }
            Err(e) => warn!(record_id = %id, "Failed to remove the delivered file: {e}"),
        }
    }

    async fn failed(self: &Arc<Self>, record: &TransferRecord, failure: TransportFailure) {
        let id = record.id;
        let status = self
            .complete(id, |record| record.mark_failed(&failure))
            .await;

        match status {
            Some(TransferStatus::Failed) => {
                TransferMetrics::track_attempt(AttemptOutcome::Failed);
                warn!(
                    record_id = %id,
                    "Transfer attempt {attempt} failed: {failure}",
                    attempt = record.attempt_count
                );
                if self.options.retry.auto_retry {
                    let delay = self.options.retry.delay_for_attempt(record.attempt_count);
                    let mut inner = self.inner.write().await;
                    let Inner {
                        records, journal, ..
                    } = &mut *inner;
                    if let Some(entry) = records.get_mut(&id) {
                        if entry.record.status == TransferStatus::Failed
                            && !entry.queued
                            && entry.retry.is_none()
                        {
                            self.schedule_retry(entry, delay);
                            persist(journal, &entry.record).await;
                        }
                    }
                }
            }
            Some(TransferStatus::Abandoned) => {
                TransferMetrics::track_attempt(AttemptOutcome::Abandoned);
                error!(
                    record_id = %id,
                    "Abandoning transfer after {attempt} attempts: {failure}",
                    attempt = record.attempt_count
                );
            }
            _ => {}
        }
    }

    /// Applies the outcome of an attempt under the write lock and journals it.
    async fn complete<F>(&self, id: ShortGuid, transition: F) -> Option<TransferStatus>
    where
        F: FnOnce(&mut TransferRecord) -> Result<TransferStatus, TransitionError>,
    {
        let mut inner = self.inner.write().await;
        let Inner {
            records, journal, ..
        } = &mut *inner;
        let entry = records.get_mut(&id)?;

        match transition(&mut entry.record) {
            Ok(status) => {
                persist(journal, &entry.record).await;
                compact_if_due(journal, records).await;
                Some(status)
            }
            Err(e) => {
                error!(record_id = %id, "Discarding attempt outcome: {e}");
                None
            }
        }
    }
}

/// Flattens the result of a spawned transport call.
fn join_outcome(
    joined: Result<Result<u64, TransportFailure>, JoinError>,
) -> Result<u64, TransportFailure> {
    joined.unwrap_or_else(|e| {
        Err(TransportFailure::unknown(format!(
            "Transfer task failed: {e}"
        )))
    })
}

/// Rewrites the journal once it has grown well past one line per record.
async fn compact_if_due(journal: &mut Option<Journal>, records: &HashMap<ShortGuid, Entry>) {
    let Some(journal) = journal else {
        return;
    };
    if !journal.needs_compaction(records.len()) {
        return;
    }

    let mut entries: Vec<&Entry> = records.values().collect();
    entries.sort_by_key(|entry| (entry.record.created_at, entry.sequence));
    let snapshots: Vec<&TransferRecord> = entries.iter().map(|entry| &entry.record).collect();
    if let Err(e) = journal.rewrite(&snapshots).await {
        error!("Failed to compact the transfer journal: {e}");
    }
}

/// Appends a snapshot to the journal, if there is one.
async fn persist(journal: &mut Option<Journal>, record: &TransferRecord) {
    if let Some(journal) = journal {
        if let Err(e) = journal.append(record).await {
            error!(record_id = %record.id, "Failed to journal the transfer record: {e}");
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("No transfer record with ID {0}")]
    NotFound(ShortGuid),
    #[error("The transfer queue is shutting down")]
    ShuttingDown,
    #[error("The path {0:?} does not name a file")]
    InvalidLocalPath(PathBuf),
    #[error(transparent)]
    Journal(#[from] JournalError),
}
