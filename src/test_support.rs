//! Wiring for exercising the HTTP API against an in-memory transport.

use crate::{build_router, AppState};
use app_config::uploads::UploadsConfig;
use async_trait::async_trait;
use axum::Router;
use local_stash::LocalStash;
use rendezvous::Rendezvous;
use shortguid::ShortGuid;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::time::{sleep, Instant};
use transfer_queue::{
    NewTransfer, QueueOptions, RetryPolicy, TransferQueue, TransferRecord, TransferStatus,
};
use transport_traits::{DynTransport, Transport, TransportFailure, TransportTag};

pub const TOKEN: &str = "party-time";
pub const BOUNDARY: &str = "eventfolio-test-boundary";

const BODY_LIMIT: usize = 4 * 1024 * 1024;

/// A transport that delivers instantly unless told to fail.
#[derive(Clone, Default)]
pub struct FakeTransport {
    failures: Arc<Mutex<VecDeque<TransportFailure>>>,
    probe_failure: Arc<Mutex<Option<TransportFailure>>>,
}

impl FakeTransport {
    /// Fails the next transfer attempt.
    pub fn fail_next(&self, failure: TransportFailure) {
        self.failures.lock().unwrap().push_back(failure);
    }

    /// Fails every following connection test.
    pub fn fail_probe(&self, failure: TransportFailure) {
        *self.probe_failure.lock().unwrap() = Some(failure);
    }
}

impl TransportTag for FakeTransport {
    fn tag(&self) -> &str {
        "fake"
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn destination(&self, event_id: &str, file_name: &str) -> String {
        format!("/photos/{event_id}/{file_name}")
    }

    async fn send(
        &self,
        local_path: &Path,
        _remote_path: &str,
        _deadline: std::time::Instant,
    ) -> Result<u64, TransportFailure> {
        if let Some(failure) = self.failures.lock().unwrap().pop_front() {
            return Err(failure);
        }
        Ok(std::fs::metadata(local_path).map(|m| m.len()).unwrap_or(0))
    }

    async fn probe(&self) -> Result<String, TransportFailure> {
        match self.probe_failure.lock().unwrap().clone() {
            Some(failure) => Err(failure),
            None => Ok(String::from("connected to fake")),
        }
    }
}

pub struct TestApp {
    pub queue: Arc<TransferQueue>,
    pub transport: FakeTransport,
    state: AppState,
    rendezvous: Rendezvous,
    _dir: TempDir,
}

impl TestApp {
    pub async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let uploads = UploadsConfig {
            directory: dir.path().join("uploads"),
            max_file_size_mb: 1,
            token: Some(TOKEN.to_string()),
            ..Default::default()
        };

        let stash = LocalStash::open(&uploads.directory, uploads.allowed_extensions.clone())
            .await
            .unwrap();

        let options = QueueOptions {
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
        };

        let transport = FakeTransport::default();
        let rendezvous = Rendezvous::new();
        let queue = TransferQueue::start(
            options,
            DynTransport::new(transport.clone()),
            stash.clone(),
            rendezvous.fork_guard(),
        )
        .await
        .unwrap();
        let queue = Arc::new(queue);

        let (shutdown_tx, _) = broadcast::channel(1);
        let state = AppState {
            shutdown_tx,
            queue: queue.clone(),
            stash,
            uploads: Arc::new(uploads),
            token: Arc::from(TOKEN),
        };

        Self {
            queue,
            transport,
            state,
            rendezvous,
            _dir: dir,
        }
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone(), BODY_LIMIT)
    }

    /// Stashes a small JPEG and registers it with the queue.
    pub async fn enqueue_photo(&self, event_id: &str) -> TransferRecord {
        let stashed = self
            .state
            .stash
            .store(event_id, b"\xFF\xD8\xFF\xE0 jpeg", "IMG_0001.jpg", "")
            .await
            .unwrap();
        self.queue
            .enqueue(NewTransfer::from_stashed(stashed, event_id, "", "IMG_0001.jpg"))
            .await
            .unwrap()
    }

    pub async fn wait_for_delivery(&self, id: ShortGuid) -> TransferRecord {
        self.wait_for(id, TransferStatus::Delivered).await
    }

    pub async fn wait_for_failure(&self, id: ShortGuid) -> TransferRecord {
        self.wait_for(id, TransferStatus::Failed).await
    }

    async fn wait_for(&self, id: ShortGuid, status: TransferStatus) -> TransferRecord {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let record = self.queue.get(id).await.unwrap();
            if record.status == status {
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

    pub async fn finish(self) {
        self.queue.shutdown().await;
        self.rendezvous.rendezvous_async().await.ok();
    }
}

/// Encodes form fields and files as a `multipart/form-data` body using [`BOUNDARY`].
pub fn multipart_body(fields: &[(&str, &str)], files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }

    for (file_name, content) in files {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }

    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}
