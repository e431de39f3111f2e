use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configures how uploads are accepted and where they are stashed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadsConfig {
    /// The local directory receiving one folder per event.
    pub directory: PathBuf,
    /// The maximum size of a single file, in MiB.
    pub max_file_size_mb: u64,
    /// The maximum number of files in one upload request.
    pub max_files_per_request: usize,
    /// The accepted file extensions, lower case and including the dot.
    pub allowed_extensions: Vec<String>,
    /// The token guests and admins have to present.
    pub token: Option<String>,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./uploads"),
            max_file_size_mb: 10,
            max_files_per_request: 20,
            allowed_extensions: [".jpg", ".jpeg", ".png", ".heic", ".heif"]
                .into_iter()
                .map(String::from)
                .collect(),
            token: None,
        }
    }
}

impl UploadsConfig {
    pub fn max_file_size_bytes(&self) -> usize {
        (self.max_file_size_mb as usize).saturating_mul(1024 * 1024)
    }

    /// Determines whether the (lower case, dotted) extension is accepted.
    pub fn is_allowed_extension(&self, extension: &str) -> bool {
        self.allowed_extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(extension))
    }
}
