//! An append-only journal of record snapshots.
//!
//! Every line holds one JSON-encoded [`TransferRecord`]. On replay the last
//! snapshot of every record wins; the file is then rewritten to contain
//! exactly one line per record. A running queue rewrites it the same way
//! once it has grown well past one line per record.

use crate::record::TransferRecord;
use shortguid::ShortGuid;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

/// The journal is rewritten once it holds this many lines per live record.
const COMPACTION_RATIO: usize = 4;

/// Journals shorter than this are not rewritten while the queue runs.
const MIN_COMPACTION_LINES: usize = 1024;

pub(crate) struct Journal {
    path: PathBuf,
    file: File,
    /// The number of lines written since the last rewrite.
    lines: usize,
    min_compaction_lines: usize,
}

impl Journal {
    /// Replays and compacts the journal at `path`, then opens it for appending.
    ///
    /// ## Returns
    /// The journal and the recovered records, in order of first appearance.
    pub async fn open(path: &Path) -> Result<(Self, Vec<TransferRecord>), JournalError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| JournalError::Io(parent.to_path_buf(), e))?;
        }

        let records = Self::replay(path).await?;
        let snapshots: Vec<&TransferRecord> = records.iter().collect();
        let file = Self::compact(path, &snapshots).await?;

        info!(
            "Opened transfer journal {path:?} with {count} records",
            count = records.len()
        );

        Ok((
            Self {
                path: path.to_path_buf(),
                file,
                lines: records.len(),
                min_compaction_lines: MIN_COMPACTION_LINES,
            },
            records,
        ))
    }

    /// Appends the snapshot of a record.
    pub async fn append(&mut self, record: &TransferRecord) -> Result<(), JournalError> {
        let mut line = serde_json::to_vec(record).map_err(JournalError::Serialize)?;
        line.push(b'\n');
        self.file
            .write_all(&line)
            .await
            .map_err(|e| JournalError::Io(self.path.clone(), e))?;
        self.file
            .flush()
            .await
            .map_err(|e| JournalError::Io(self.path.clone(), e))?;
        self.lines += 1;
        Ok(())
    }

    /// Whether the journal has grown enough to be rewritten, given the
    /// number of live records.
    pub fn needs_compaction(&self, live: usize) -> bool {
        self.lines >= self.min_compaction_lines.max(live.saturating_mul(COMPACTION_RATIO))
    }

    /// Replaces the journal with exactly one line per given snapshot.
    pub async fn rewrite(&mut self, records: &[&TransferRecord]) -> Result<(), JournalError> {
        let before = self.lines;
        self.file = Self::compact(&self.path, records).await?;
        self.lines = records.len();
        debug!(
            "Compacted transfer journal {path:?} from {before} to {after} lines",
            path = self.path,
            after = self.lines
        );
        Ok(())
    }

    async fn replay(path: &Path) -> Result<Vec<TransferRecord>, JournalError> {
        let file = match File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No transfer journal at {path:?}, starting empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(JournalError::Io(path.to_path_buf(), e)),
        };

        let mut order: Vec<ShortGuid> = Vec::new();
        let mut latest: HashMap<ShortGuid, TransferRecord> = HashMap::new();

        let mut lines = BufReader::new(file).lines();
        let mut line_number = 0usize;
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| JournalError::Io(path.to_path_buf(), e))?
        {
            line_number += 1;
            if line.trim().is_empty() {
                continue;
            }

            // A crash may leave a torn last line behind.
            let record: TransferRecord = match serde_json::from_str(&line) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Skipping unreadable journal line {line_number} in {path:?}: {e}");
                    continue;
                }
            };

            if latest.insert(record.id, record.clone()).is_none() {
                order.push(record.id);
            }
        }

        Ok(order
            .into_iter()
            .filter_map(|id| latest.remove(&id))
            .collect())
    }

    /// Writes the snapshots to a fresh file that replaces the journal.
    ///
    /// ## Returns
    /// The replacement file, positioned for appending.
    async fn compact(path: &Path, records: &[&TransferRecord]) -> Result<File, JournalError> {
        let mut buffer = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buffer, record).map_err(JournalError::Serialize)?;
            buffer.push(b'\n');
        }

        let temp_path = path.with_extension("compact");
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)
            .await
            .map_err(|e| JournalError::Io(temp_path.clone(), e))?;
        file.write_all(&buffer)
            .await
            .map_err(|e| JournalError::Io(temp_path.clone(), e))?;
        file.sync_all()
            .await
            .map_err(|e| JournalError::Io(temp_path.clone(), e))?;

        fs::rename(&temp_path, path)
            .await
            .map_err(|e| JournalError::Io(path.to_path_buf(), e))?;
        Ok(file)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("Journal I/O failed for {0:?}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("Failed to serialize a journal entry: {0}")]
    Serialize(serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{NewTransfer, TransferStatus};
    use chrono::Utc;

    fn record(name: &str) -> TransferRecord {
        TransferRecord::new(
            ShortGuid::new_random(),
            NewTransfer {
                event_id: "gala".into(),
                uploader_name: "Bo".into(),
                original_name: name.into(),
                local_path: PathBuf::from(format!("/stash/gala/{name}")),
                size_bytes: 7,
            },
            format!("/remote/gala/{name}"),
            3,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn replay_keeps_last_snapshot_in_first_seen_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");

        let mut first = record("a.jpg");
        let second = record("b.jpg");
        {
            let (mut journal, records) = Journal::open(&path).await.unwrap();
            assert!(records.is_empty());
            journal.append(&first).await.unwrap();
            journal.append(&second).await.unwrap();
            first.begin_attempt(Utc::now()).unwrap();
            first.mark_delivered().unwrap();
            journal.append(&first).await.unwrap();
        }

        let (_journal, records) = Journal::open(&path).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, first.id);
        assert_eq!(records[0].status, TransferStatus::Delivered);
        assert_eq!(records[0].attempt_count, 1);
        assert_eq!(records[1].id, second.id);

        let content = fs::read_to_string(&path).await.unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[tokio::test]
    async fn growing_journal_is_rewritten_while_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");

        let (mut journal, _) = Journal::open(&path).await.unwrap();
        journal.min_compaction_lines = 8;

        let mut record = record("a.jpg");
        for _ in 0..7 {
            journal.append(&record).await.unwrap();
        }
        assert!(!journal.needs_compaction(1));
        journal.append(&record).await.unwrap();
        assert!(journal.needs_compaction(1));
        assert!(!journal.needs_compaction(4));

        journal.rewrite(&[&record]).await.unwrap();
        assert!(!journal.needs_compaction(1));

        // Appends after the rewrite land in the replacement file.
        record.begin_attempt(Utc::now()).unwrap();
        journal.append(&record).await.unwrap();
        let content = fs::read_to_string(&path).await.unwrap();
        assert_eq!(content.lines().count(), 2);
        drop(journal);

        let (_journal, records) = Journal::open(&path).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, TransferStatus::InTransfer);
        assert_eq!(records[0].attempt_count, 1);
    }

    #[tokio::test]
    async fn torn_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");

        let intact = record("a.jpg");
        let mut content = serde_json::to_string(&intact).unwrap();
        content.push_str("\n{\"id\":\"trunc");
        fs::write(&path, content).await.unwrap();

        let (_journal, records) = Journal::open(&path).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, intact.id);
    }
}
