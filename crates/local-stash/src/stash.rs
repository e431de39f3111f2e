use crate::file_name::generate_file_name;
use chrono::Local;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// The number of fresh names tried before giving up on a collision.
const MAX_NAME_ATTEMPTS: usize = 8;

/// Persists uploaded files below a local root directory.
///
/// Every event receives its own sub-directory. Files are always created
/// exclusively, so an existing file is never truncated or overwritten.
#[derive(Debug, Clone)]
pub struct LocalStash {
    root: PathBuf,
    allowed_extensions: Vec<String>,
}

/// A file that was written to the stash.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct StashedFile {
    /// The absolute path of the file.
    pub local_path: PathBuf,
    /// The generated file name.
    pub file_name: String,
    /// The number of bytes written.
    pub size_bytes: u64,
}

impl LocalStash {
    /// Opens the stash, creating the root directory if required.
    pub async fn open<P: Into<PathBuf>>(
        root: P,
        allowed_extensions: Vec<String>,
    ) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| StorageError::CreateDirectory(root.clone(), e))?;
        let root = fs::canonicalize(&root)
            .await
            .map_err(|e| StorageError::CreateDirectory(root.clone(), e))?;
        Ok(Self {
            root,
            allowed_extensions,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes the bytes of an uploaded file to the event's directory.
    ///
    /// ## Arguments
    /// * `event_id` - The sanitized event identifier, used as directory name.
    /// * `bytes` - The file content.
    /// * `suggested_name` - The client-supplied file name; only its extension is used.
    /// * `uploader_name` - The name of the guest, normalized into the file name.
    pub async fn store(
        &self,
        event_id: &str,
        bytes: &[u8],
        suggested_name: &str,
        uploader_name: &str,
    ) -> Result<StashedFile, StorageError> {
        let directory = self.root.join(event_id);
        fs::create_dir_all(&directory)
            .await
            .map_err(|e| StorageError::CreateDirectory(directory.clone(), e))?;

        for _ in 0..MAX_NAME_ATTEMPTS {
            let token = Uuid::new_v4().simple().to_string();
            let file_name = generate_file_name(
                suggested_name,
                uploader_name,
                &self.allowed_extensions,
                Local::now(),
                &token,
            );
            let local_path = directory.join(&file_name);

            let mut file = match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&local_path)
                .await
            {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!("Stash file name {file_name} is taken, generating another one");
                    continue;
                }
                Err(e) => return Err(StorageError::Write(local_path, e)),
            };

            let written = async {
                file.write_all(bytes).await?;
                file.sync_data().await
            }
            .await;

            if let Err(e) = written {
                drop(file);
                // Don't leave a truncated file behind.
                if let Err(cleanup) = fs::remove_file(&local_path).await {
                    warn!(
                        "Failed to remove partially written file {path:?}: {error}",
                        path = local_path,
                        error = cleanup
                    );
                }
                return Err(StorageError::Write(local_path, e));
            }

            return Ok(StashedFile {
                local_path,
                file_name,
                size_bytes: bytes.len() as u64,
            });
        }

        Err(StorageError::NameExhausted(directory))
    }

    /// Removes a stashed file.
    pub async fn delete(&self, local_path: &Path) -> Result<(), StorageError> {
        fs::remove_file(local_path)
            .await
            .map_err(|e| StorageError::Delete(local_path.to_path_buf(), e))
    }

    /// Determines whether a stashed file still exists.
    pub async fn exists(&self, local_path: &Path) -> bool {
        fs::try_exists(local_path).await.unwrap_or(false)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to create directory {0:?}: {1}")]
    CreateDirectory(PathBuf, std::io::Error),
    #[error("Failed to write file {0:?}: {1}")]
    Write(PathBuf, std::io::Error),
    #[error("Failed to delete file {0:?}: {1}")]
    Delete(PathBuf, std::io::Error),
    #[error("Could not find an unused file name in {0:?}")]
    NameExhausted(PathBuf),
}
