use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// The closed set of transport failure classes.
///
/// Transport implementations map their library-specific errors onto these
/// so that the queue never has to inspect foreign error types.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The remote server could not be reached or dropped the connection.
    ConnectionError,
    /// The credentials were rejected.
    AuthError,
    /// The remote path is invalid or not writable.
    RemotePathError,
    /// The attempt did not complete in time.
    Timeout,
    /// Anything that could not be classified.
    Unknown,
}

impl FailureKind {
    /// Indicates whether retrying the same file may succeed.
    ///
    /// Authentication and remote path problems are configuration issues
    /// that will not resolve by sending the file again.
    pub fn is_retryable(&self) -> bool {
        match self {
            FailureKind::ConnectionError | FailureKind::Timeout | FailureKind::Unknown => true,
            FailureKind::AuthError | FailureKind::RemotePathError => false,
        }
    }
}

impl Display for FailureKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::ConnectionError => write!(f, "connection_error"),
            FailureKind::AuthError => write!(f, "auth_error"),
            FailureKind::RemotePathError => write!(f, "remote_path_error"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// A classified transport failure along with its diagnostic detail.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct TransportFailure {
    pub kind: FailureKind,
    pub detail: String,
}

impl TransportFailure {
    pub fn new<S: Into<String>>(kind: FailureKind, detail: S) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn connection<S: Into<String>>(detail: S) -> Self {
        Self::new(FailureKind::ConnectionError, detail)
    }

    pub fn auth<S: Into<String>>(detail: S) -> Self {
        Self::new(FailureKind::AuthError, detail)
    }

    pub fn remote_path<S: Into<String>>(detail: S) -> Self {
        Self::new(FailureKind::RemotePathError, detail)
    }

    pub fn timeout<S: Into<String>>(detail: S) -> Self {
        Self::new(FailureKind::Timeout, detail)
    }

    pub fn unknown<S: Into<String>>(detail: S) -> Self {
        Self::new(FailureKind::Unknown, detail)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}
