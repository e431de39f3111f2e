use crate::TransportFailure;
use async_trait::async_trait;
use std::path::Path;
use std::time::Instant;

/// Provides a human-readable tag for a transport, used in log output.
pub trait TransportTag {
    /// Gets the tag of the transport.
    fn tag(&self) -> &str;
}

/// Main trait for pushing stashed files to a remote target.
#[async_trait]
pub trait Transport: Send + Sync + TransportTag {
    /// Derives the remote destination of a file.
    ///
    /// The result must only depend on the arguments and the transport's
    /// configuration so that retries always target the same location.
    fn destination(&self, event_id: &str, file_name: &str) -> String;

    /// Pushes one local file to the remote path.
    ///
    /// Implementations must give up with a [`FailureKind::Timeout`](crate::FailureKind::Timeout)
    /// failure once `deadline` has passed. The caller does not start another
    /// transfer of the same file before this call has returned.
    ///
    /// ## Returns
    /// The number of bytes transferred.
    async fn send(
        &self,
        local_path: &Path,
        remote_path: &str,
        deadline: Instant,
    ) -> Result<u64, TransportFailure>;

    /// Performs a lightweight connectivity check without transferring a file.
    ///
    /// ## Returns
    /// A diagnostic message describing the established connection.
    async fn probe(&self) -> Result<String, TransportFailure>;
}
