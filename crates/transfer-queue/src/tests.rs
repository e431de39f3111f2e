use crate::*;
use async_trait::async_trait;
use chrono::Utc;
use local_stash::LocalStash;
use metrics::transfer::TransferMetrics;
use rendezvous::Rendezvous;
use shortguid::ShortGuid;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::{sleep, sleep_until, Instant};
use transport_traits::{
    DynTransport, FailureKind, Transport, TransportFailure, TransportTag,
};

/// A transport that answers from a script. Once the script is exhausted,
/// every call succeeds.
#[derive(Clone, Default)]
struct ScriptedTransport {
    state: Arc<ScriptState>,
}

#[derive(Default)]
struct ScriptState {
    outcomes: Mutex<VecDeque<Option<TransportFailure>>>,
    delay: Mutex<Duration>,
    sent: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedTransport {
    fn script<I>(outcomes: I) -> Self
    where
        I: IntoIterator<Item = Option<TransportFailure>>,
    {
        let transport = Self::default();
        transport.push(outcomes);
        transport
    }

    fn push<I>(&self, outcomes: I)
    where
        I: IntoIterator<Item = Option<TransportFailure>>,
    {
        self.state.outcomes.lock().unwrap().extend(outcomes);
    }

    fn with_delay(self, delay: Duration) -> Self {
        *self.state.delay.lock().unwrap() = delay;
        self
    }

    fn sent(&self) -> Vec<String> {
        self.state.sent.lock().unwrap().clone()
    }

    fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }
}

impl TransportTag for ScriptedTransport {
    fn tag(&self) -> &str {
        "scripted"
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn destination(&self, event_id: &str, file_name: &str) -> String {
        format!("/remote/{event_id}/{file_name}")
    }

    async fn send(
        &self,
        local_path: &Path,
        remote_path: &str,
        deadline: std::time::Instant,
    ) -> Result<u64, TransportFailure> {
        let now = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.state.sent.lock().unwrap().push(remote_path.to_string());

        let delay = *self.state.delay.lock().unwrap();
        let mut expired = false;
        if !delay.is_zero() {
            let finished = Instant::now() + delay;
            let deadline = Instant::from_std(deadline);
            sleep_until(finished.min(deadline)).await;
            expired = deadline < finished;
        }

        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
        if expired {
            return Err(TransportFailure::timeout("scripted transfer passed its deadline"));
        }

        let outcome = self.state.outcomes.lock().unwrap().pop_front().flatten();
        match outcome {
            Some(failure) => Err(failure),
            None => Ok(std::fs::metadata(local_path).map(|m| m.len()).unwrap_or(0)),
        }
    }

    async fn probe(&self) -> Result<String, TransportFailure> {
        Ok(String::from("scripted transport ready"))
    }
}

/// A transport that occupies a blocking thread for a fixed time, like the
/// FTP client does, regardless of whether the caller still waits for it.
#[derive(Clone)]
struct BlockingTransport {
    duration: Duration,
    /// Whether a session reports a timeout once it ends past its deadline.
    honor_deadline: bool,
    sessions: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl BlockingTransport {
    fn new(duration: Duration, honor_deadline: bool) -> Self {
        Self {
            duration,
            honor_deadline,
            sessions: Arc::default(),
            in_flight: Arc::default(),
            max_in_flight: Arc::default(),
        }
    }
}

impl TransportTag for BlockingTransport {
    fn tag(&self) -> &str {
        "blocking"
    }
}

#[async_trait]
impl Transport for BlockingTransport {
    fn destination(&self, event_id: &str, file_name: &str) -> String {
        format!("/remote/{event_id}/{file_name}")
    }

    async fn send(
        &self,
        _local_path: &Path,
        _remote_path: &str,
        deadline: std::time::Instant,
    ) -> Result<u64, TransportFailure> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || {
            this.sessions.fetch_add(1, Ordering::SeqCst);
            let now = this.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            this.max_in_flight.fetch_max(now, Ordering::SeqCst);

            std::thread::sleep(this.duration);

            this.in_flight.fetch_sub(1, Ordering::SeqCst);
            if this.honor_deadline && std::time::Instant::now() >= deadline {
                Err(TransportFailure::timeout("session passed its deadline"))
            } else {
                Ok(7)
            }
        })
        .await
        .map_err(|e| TransportFailure::unknown(e.to_string()))?
    }

    async fn probe(&self) -> Result<String, TransportFailure> {
        Ok(String::from("blocking transport ready"))
    }
}

struct Fixture<T = ScriptedTransport> {
    queue: TransferQueue,
    stash: LocalStash,
    transport: T,
    rendezvous: Rendezvous,
    _dir: TempDir,
}

fn options() -> QueueOptions {
    QueueOptions {
        retry: RetryPolicy {
            max_attempts: 3,
            auto_retry: false,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
        },
        max_concurrent_attempts: 1,
        attempt_timeout: Duration::from_secs(5),
        delete_after_transfer: true,
        journal_file: None,
    }
}

async fn fixture<T>(options: QueueOptions, transport: T) -> Fixture<T>
where
    T: Transport + Clone + 'static,
{
    let dir = tempfile::tempdir().unwrap();
    fixture_in(dir, options, transport).await
}

async fn fixture_in<T>(dir: TempDir, options: QueueOptions, transport: T) -> Fixture<T>
where
    T: Transport + Clone + 'static,
{
    let stash = LocalStash::open(dir.path().join("uploads"), vec![".jpg".into()])
        .await
        .unwrap();
    let rendezvous = Rendezvous::new();
    let queue = TransferQueue::start(
        options,
        DynTransport::new(transport.clone()),
        stash.clone(),
        rendezvous.fork_guard(),
    )
    .await
    .unwrap();

    Fixture {
        queue,
        stash,
        transport,
        rendezvous,
        _dir: dir,
    }
}

impl<T> Fixture<T> {
    async fn upload(&self, uploader: &str) -> TransferRecord {
        let stashed = self
            .stash
            .store("wedding", b"\xFF\xD8\xFF\xE0 jpeg", "IMG_0001.JPG", uploader)
            .await
            .unwrap();
        self.queue
            .enqueue(NewTransfer::from_stashed(
                stashed,
                "wedding",
                uploader,
                "IMG_0001.JPG",
            ))
            .await
            .unwrap()
    }

    async fn wait_until<F>(&self, id: ShortGuid, predicate: F) -> TransferRecord
    where
        F: Fn(&TransferRecord) -> bool,
    {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let record = self.queue.get(id).await.unwrap();
            if predicate(&record) {
                return record;
            }
            assert!(
                Instant::now() < deadline,
                "record {id} is stuck in {}",
                record.status
            );
            sleep(Duration::from_millis(5)).await;
        }
    }

    async fn wait_for(&self, id: ShortGuid, status: TransferStatus) -> TransferRecord {
        self.wait_until(id, |record| record.status == status).await
    }

    /// Shuts the queue down and hands back the scratch directory.
    async fn finish(self) -> TempDir {
        self.queue.shutdown().await;
        self.rendezvous.rendezvous_async().await.ok();
        self._dir
    }
}

#[tokio::test]
async fn enqueued_record_starts_pending() {
    let fixture = fixture(options(), ScriptedTransport::default()).await;

    let record = fixture.upload("Ana").await;
    assert_eq!(record.status, TransferStatus::Pending);
    assert_eq!(record.attempt_count, 0);
    assert!(record.last_error.is_none());
    assert!(record.remote_path.starts_with("/remote/wedding/ana_"));

    fixture.finish().await;
}

#[tokio::test]
async fn second_of_three_fails_then_manual_retry_delivers() {
    let transport =
        ScriptedTransport::script([None, Some(TransportFailure::connection("refused")), None]);
    let fixture = fixture(options(), transport).await;

    let first = fixture.upload("Ana").await;
    let second = fixture.upload("Bo").await;
    let third = fixture.upload("Cy").await;

    let first = fixture.wait_for(first.id, TransferStatus::Delivered).await;
    let second = fixture.wait_for(second.id, TransferStatus::Failed).await;
    let third = fixture.wait_for(third.id, TransferStatus::Delivered).await;

    assert_eq!(first.attempt_count, 1);
    assert_eq!(third.attempt_count, 1);
    assert_eq!(second.attempt_count, 1);
    assert_eq!(second.failure_kind, Some(FailureKind::ConnectionError));
    assert!(second.last_error.as_deref().unwrap().contains("refused"));
    assert!(fixture.stash.exists(&second.local_path).await);

    let summary = fixture.queue.retry_failed().await.unwrap();
    assert_eq!(summary.retried, 1);
    assert_eq!(summary.records[0].id, second.id);

    let second = fixture.wait_for(second.id, TransferStatus::Delivered).await;
    assert_eq!(second.attempt_count, 2);
    assert!(second.last_error.is_none());

    fixture.finish().await;
}

#[tokio::test]
async fn auth_error_abandons_and_is_never_retried() {
    let transport = ScriptedTransport::script([Some(TransportFailure::auth("530 Login incorrect"))]);
    let fixture = fixture(options(), transport).await;

    let record = fixture.upload("Ana").await;
    let record = fixture.wait_for(record.id, TransferStatus::Abandoned).await;
    assert_eq!(record.attempt_count, 1);
    assert_eq!(record.failure_kind, Some(FailureKind::AuthError));

    for _ in 0..3 {
        let summary = fixture.queue.retry_failed().await.unwrap();
        assert_eq!(summary.retried, 0);
        assert!(summary.records.is_empty());
    }

    sleep(Duration::from_millis(30)).await;
    assert_eq!(fixture.transport.sent().len(), 1);
    assert_eq!(
        fixture.queue.get(record.id).await.unwrap().status,
        TransferStatus::Abandoned
    );

    fixture.finish().await;
}

#[tokio::test]
async fn repeated_timeouts_exhaust_the_attempts() {
    let transport = ScriptedTransport::script([
        Some(TransportFailure::timeout("slow")),
        Some(TransportFailure::timeout("slow")),
        Some(TransportFailure::timeout("slow")),
    ]);
    let mut options = options();
    options.retry.auto_retry = true;
    let fixture = fixture(options, transport).await;

    let record = fixture.upload("Ana").await;
    let record = fixture.wait_for(record.id, TransferStatus::Abandoned).await;

    assert_eq!(record.attempt_count, 3);
    assert_eq!(record.failure_kind, Some(FailureKind::Timeout));
    assert!(record.next_attempt_at.is_none());
    assert_eq!(fixture.transport.sent().len(), 3);
    assert!(fixture.stash.exists(&record.local_path).await);

    fixture.finish().await;
}

#[tokio::test]
async fn automatic_retry_delivers_after_backoff() {
    let transport = ScriptedTransport::script([Some(TransportFailure::unknown("421 busy"))]);
    let mut options = options();
    options.retry.auto_retry = true;
    let fixture = fixture(options, transport).await;

    let record = fixture.upload("Ana").await;
    let record = fixture.wait_for(record.id, TransferStatus::Delivered).await;
    assert_eq!(record.attempt_count, 2);
    assert!(record.next_attempt_at.is_none());

    fixture.finish().await;
}

#[tokio::test]
async fn slow_transfer_times_out() {
    let transport = ScriptedTransport::default().with_delay(Duration::from_millis(200));
    let mut options = options();
    options.attempt_timeout = Duration::from_millis(20);
    let fixture = fixture(options, transport).await;

    let record = fixture.upload("Ana").await;
    let record = fixture.wait_for(record.id, TransferStatus::Failed).await;
    assert_eq!(record.failure_kind, Some(FailureKind::Timeout));
    assert_eq!(record.attempt_count, 1);

    fixture.finish().await;
}

#[tokio::test]
async fn timed_out_session_blocks_the_next_attempt_until_it_ends() {
    let transport = BlockingTransport::new(Duration::from_millis(300), true);
    let mut options = options();
    options.attempt_timeout = Duration::from_millis(30);
    let fixture = fixture(options, transport).await;

    let record = fixture.upload("Ana").await;
    fixture
        .wait_until(record.id, |record| record.status == TransferStatus::InTransfer)
        .await;

    // Long after the timeout the session is still running, so the record
    // cannot be retried yet.
    sleep(Duration::from_millis(100)).await;
    let current = fixture.queue.get(record.id).await.unwrap();
    assert_eq!(current.status, TransferStatus::InTransfer);
    assert_eq!(fixture.queue.retry_failed().await.unwrap().retried, 0);

    let failed = fixture.wait_for(record.id, TransferStatus::Failed).await;
    assert_eq!(failed.failure_kind, Some(FailureKind::Timeout));
    assert_eq!(fixture.transport.in_flight.load(Ordering::SeqCst), 0);

    assert_eq!(fixture.queue.retry_failed().await.unwrap().retried, 1);
    let record = fixture
        .wait_until(record.id, |record| {
            record.attempt_count == 2 && record.status == TransferStatus::Failed
        })
        .await;
    assert_eq!(record.failure_kind, Some(FailureKind::Timeout));

    assert_eq!(fixture.transport.sessions.load(Ordering::SeqCst), 2);
    assert_eq!(fixture.transport.max_in_flight.load(Ordering::SeqCst), 1);

    fixture.finish().await;
}

#[tokio::test]
async fn session_finishing_after_the_timeout_counts_as_delivered() {
    let transport = BlockingTransport::new(Duration::from_millis(100), false);
    let mut options = options();
    options.attempt_timeout = Duration::from_millis(20);
    let fixture = fixture(options, transport).await;

    let record = fixture.upload("Ana").await;
    let record = fixture.wait_for(record.id, TransferStatus::Delivered).await;
    assert_eq!(record.attempt_count, 1);
    assert!(record.failure_kind.is_none());
    assert_eq!(fixture.transport.sessions.load(Ordering::SeqCst), 1);

    fixture.finish().await;
}

#[tokio::test]
async fn retry_after_shutdown_is_rejected() {
    let transport = ScriptedTransport::script([Some(TransportFailure::connection("refused"))]);
    let fixture = fixture(options(), transport).await;

    let record = fixture.upload("Ana").await;
    let record = fixture.wait_for(record.id, TransferStatus::Failed).await;
    assert_eq!(record.attempt_limit, 3);

    fixture.queue.shutdown().await;
    assert!(matches!(
        fixture.queue.retry_failed().await,
        Err(QueueError::ShuttingDown)
    ));

    let record = fixture.queue.get(record.id).await.unwrap();
    assert_eq!(record.status, TransferStatus::Failed);
    assert_eq!(record.attempt_limit, 3);
    assert_eq!(fixture.transport.sent().len(), 1);

    fixture.rendezvous.rendezvous_async().await.ok();
}

#[tokio::test]
async fn manual_retry_resets_the_attempt_budget() {
    let transport = ScriptedTransport::script([Some(TransportFailure::connection("refused"))]);
    let mut options = options();
    options.retry.max_attempts = 1;
    let fixture = fixture(options, transport).await;

    let record = fixture.upload("Ana").await;
    let record = fixture.wait_for(record.id, TransferStatus::Abandoned).await;
    assert_eq!(record.attempt_count, 1);
    assert_eq!(fixture.queue.retry_failed().await.unwrap().retried, 0);

    // A fresh record failing below its limit can be retried, which grants
    // it another full budget.
    let mut options2 = self::options();
    options2.retry.max_attempts = 2;
    let transport = ScriptedTransport::script([
        Some(TransportFailure::connection("refused")),
        Some(TransportFailure::connection("refused")),
    ]);
    let other = fixture_in(tempfile::tempdir().unwrap(), options2, transport).await;
    let record = other.upload("Bo").await;
    let record = other.wait_for(record.id, TransferStatus::Failed).await;
    assert_eq!(record.attempt_limit, 2);

    let summary = other.queue.retry_failed().await.unwrap();
    assert_eq!(summary.retried, 1);
    assert_eq!(summary.records[0].attempt_limit, 3);

    let record = other
        .wait_until(record.id, |record| {
            record.attempt_count == 2 && record.status == TransferStatus::Failed
        })
        .await;
    assert_eq!(record.attempt_limit, 3);

    fixture.finish().await;
    other.finish().await;
}

#[tokio::test]
async fn list_queue_filters_and_orders_by_creation() {
    let transport = ScriptedTransport::script([
        Some(TransportFailure::connection("refused")),
        None,
        Some(TransportFailure::timeout("slow")),
    ]);
    let fixture = fixture(options(), transport).await;

    let first = fixture.upload("Ana").await;
    let second = fixture.upload("Bo").await;
    let third = fixture.upload("Cy").await;

    fixture.wait_for(first.id, TransferStatus::Failed).await;
    fixture.wait_for(second.id, TransferStatus::Delivered).await;
    fixture.wait_for(third.id, TransferStatus::Failed).await;

    let all: Vec<ShortGuid> = fixture
        .queue
        .list_queue(None)
        .await
        .iter()
        .map(|record| record.id)
        .collect();
    assert_eq!(all, vec![first.id, second.id, third.id]);

    let failed = fixture.queue.list_queue(Some(TransferStatus::Failed)).await;
    assert_eq!(failed.len(), 2);
    assert!(failed
        .iter()
        .all(|record| record.status == TransferStatus::Failed));
    assert_eq!(failed[0].id, first.id);
    assert_eq!(failed[1].id, third.id);
    assert!(failed[0].created_at <= failed[1].created_at);

    let stats = fixture.queue.stats().await;
    assert_eq!(stats.total, 3);
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.delivered, 1);

    fixture.finish().await;
}

#[tokio::test]
async fn retry_failed_with_nothing_failed_is_empty() {
    let fixture = fixture(options(), ScriptedTransport::default()).await;

    let summary = fixture.queue.retry_failed().await.unwrap();
    assert_eq!(summary.retried, 0);
    assert!(summary.records.is_empty());

    fixture.finish().await;
}

#[tokio::test]
async fn delivered_file_is_deleted_and_never_retried() {
    let fixture = fixture(options(), ScriptedTransport::default()).await;

    let record = fixture.upload("Ana").await;
    let record = fixture
        .wait_until(record.id, |record| record.local_file_removed)
        .await;
    assert_eq!(record.status, TransferStatus::Delivered);
    assert!(!fixture.stash.exists(&record.local_path).await);

    assert_eq!(fixture.queue.retry_failed().await.unwrap().retried, 0);
    sleep(Duration::from_millis(20)).await;
    let record = fixture.queue.get(record.id).await.unwrap();
    assert_eq!(record.status, TransferStatus::Delivered);
    assert_eq!(record.attempt_count, 1);
    assert_eq!(fixture.transport.sent().len(), 1);

    fixture.finish().await;
}

#[tokio::test]
async fn delivered_file_is_kept_when_configured() {
    let mut options = options();
    options.delete_after_transfer = false;
    let fixture = fixture(options, ScriptedTransport::default()).await;

    let record = fixture.upload("Ana").await;
    let record = fixture.wait_for(record.id, TransferStatus::Delivered).await;
    assert!(!record.local_file_removed);
    assert!(fixture.stash.exists(&record.local_path).await);

    fixture.finish().await;
}

#[tokio::test]
async fn vanished_local_file_abandons_without_transfer() {
    let transport = ScriptedTransport::default().with_delay(Duration::from_millis(50));
    let fixture = fixture(options(), transport).await;
    let missing = TransferMetrics::local_files_missing();

    // The first upload occupies the single attempt slot while the second
    // file is removed behind the queue's back.
    let blocker = fixture.upload("Ana").await;
    let stashed = fixture
        .stash
        .store("wedding", b"bytes", "b.jpg", "Bo")
        .await
        .unwrap();
    let path = stashed.local_path.clone();
    let record = fixture
        .queue
        .enqueue(NewTransfer::from_stashed(stashed, "wedding", "Bo", "b.jpg"))
        .await
        .unwrap();
    fixture.stash.delete(&path).await.unwrap();

    let record = fixture.wait_for(record.id, TransferStatus::Abandoned).await;
    assert_eq!(record.last_error.as_deref(), Some(LOCAL_FILE_MISSING));
    assert!(TransferMetrics::local_files_missing() > missing);
    fixture.wait_for(blocker.id, TransferStatus::Delivered).await;
    assert_eq!(fixture.transport.sent(), vec![blocker.remote_path]);

    fixture.finish().await;
}

#[tokio::test]
async fn attempts_are_serialized_in_enqueue_order() {
    let transport = ScriptedTransport::default().with_delay(Duration::from_millis(5));
    let fixture = fixture(options(), transport).await;

    let mut records = Vec::new();
    for name in ["Ana", "Bo", "Cy", "Di"] {
        records.push(fixture.upload(name).await);
    }
    for record in &records {
        fixture.wait_for(record.id, TransferStatus::Delivered).await;
    }

    let expected: Vec<String> = records.iter().map(|r| r.remote_path.clone()).collect();
    assert_eq!(fixture.transport.sent(), expected);
    assert_eq!(fixture.transport.max_in_flight(), 1);

    fixture.finish().await;
}

#[tokio::test]
async fn concurrent_attempts_are_bounded() {
    let transport = ScriptedTransport::default().with_delay(Duration::from_millis(20));
    let mut options = options();
    options.max_concurrent_attempts = 2;
    let fixture = fixture(options, transport).await;

    let mut records = Vec::new();
    for name in ["Ana", "Bo", "Cy", "Di", "Ed"] {
        records.push(fixture.upload(name).await);
    }
    for record in &records {
        fixture.wait_for(record.id, TransferStatus::Delivered).await;
    }

    assert!(fixture.transport.max_in_flight() <= 2);
    assert_eq!(fixture.transport.sent().len(), 5);

    fixture.finish().await;
}

#[tokio::test]
async fn unknown_record_is_not_found() {
    let fixture = fixture(options(), ScriptedTransport::default()).await;

    assert!(matches!(
        fixture.queue.get(ShortGuid::new_random()).await,
        Err(QueueError::NotFound(_))
    ));

    fixture.finish().await;
}

#[tokio::test]
async fn enqueue_after_shutdown_is_rejected() {
    let fixture = fixture(options(), ScriptedTransport::default()).await;
    let stashed = fixture
        .stash
        .store("wedding", b"bytes", "a.jpg", "Ana")
        .await
        .unwrap();

    fixture.queue.shutdown().await;
    assert!(matches!(
        fixture
            .queue
            .enqueue(NewTransfer::from_stashed(stashed, "wedding", "Ana", "a.jpg"))
            .await,
        Err(QueueError::ShuttingDown)
    ));

    fixture.rendezvous.rendezvous_async().await.ok();
}

#[tokio::test]
async fn connection_test_reports_probe_result() {
    let fixture = fixture(options(), ScriptedTransport::default()).await;

    assert_eq!(
        fixture.queue.test_transport_connection().await.unwrap(),
        "scripted transport ready"
    );
    assert_eq!(fixture.queue.transport_tag(), "scripted");

    fixture.finish().await;
}

#[tokio::test]
async fn journal_recovers_records_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let journal_file = dir.path().join("journal.jsonl");
    let uploads = dir.path().join("uploads");
    let stash = LocalStash::open(&uploads, vec![".jpg".into()]).await.unwrap();

    let pending_file = stash.store("gala", b"one", "a.jpg", "Ana").await.unwrap();
    let interrupted_file = stash.store("gala", b"two", "b.jpg", "Bo").await.unwrap();

    let pending = TransferRecord::new(
        ShortGuid::new_random(),
        NewTransfer::from_stashed(pending_file.clone(), "gala", "Ana", "a.jpg"),
        format!("/remote/gala/{}", pending_file.file_name),
        3,
        Utc::now(),
    );
    let mut interrupted = TransferRecord::new(
        ShortGuid::new_random(),
        NewTransfer::from_stashed(interrupted_file.clone(), "gala", "Bo", "b.jpg"),
        format!("/remote/gala/{}", interrupted_file.file_name),
        3,
        Utc::now(),
    );
    interrupted.begin_attempt(Utc::now()).unwrap();

    let mut content = String::new();
    for record in [&pending, &interrupted] {
        content.push_str(&serde_json::to_string(record).unwrap());
        content.push('\n');
    }
    tokio::fs::write(&journal_file, content).await.unwrap();

    let mut options = options();
    options.journal_file = Some(journal_file.clone());
    let fixture = fixture_in(dir, options, ScriptedTransport::default()).await;

    let recovered = fixture.wait_for(pending.id, TransferStatus::Delivered).await;
    assert_eq!(recovered.attempt_count, 1);

    let interrupted = fixture.queue.get(interrupted.id).await.unwrap();
    assert_eq!(interrupted.status, TransferStatus::Failed);
    assert_eq!(interrupted.attempt_count, 1);
    assert_eq!(
        interrupted.last_error.as_deref(),
        Some(INTERRUPTED_BY_RESTART)
    );

    // The journal now reflects the latest state of both records.
    fixture
        .wait_until(pending.id, |record| record.local_file_removed)
        .await;
    let _dir = fixture.finish().await;

    let (_journal, records) = crate::journal::Journal::open(&journal_file).await.unwrap();
    let find = |id: ShortGuid| records.iter().find(|r| r.id == id).cloned().unwrap();
    assert_eq!(find(pending.id).status, TransferStatus::Delivered);
    assert!(find(pending.id).local_file_removed);
    assert_eq!(find(interrupted.id).status, TransferStatus::Failed);
}

#[tokio::test]
async fn enqueue_rejects_paths_without_file_name() {
    let fixture = fixture(options(), ScriptedTransport::default()).await;

    let result = fixture
        .queue
        .enqueue(NewTransfer {
            event_id: "wedding".into(),
            uploader_name: "Ana".into(),
            original_name: "a.jpg".into(),
            local_path: PathBuf::from("/"),
            size_bytes: 0,
        })
        .await;
    assert!(matches!(result, Err(QueueError::InvalidLocalPath(_))));

    fixture.finish().await;
}
