//! Maps FTP client errors onto [`FailureKind`].

use std::io::ErrorKind;
use suppaftp::FtpError;
use transport_traits::{FailureKind, TransportFailure};

/// The phase of an FTP session in which an error occurred.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Stage {
    Connect,
    Login,
    Directory,
    Store,
    List,
}

impl Stage {
    fn describe(&self) -> &'static str {
        match self {
            Stage::Connect => "connecting",
            Stage::Login => "logging in",
            Stage::Directory => "preparing the remote directory",
            Stage::Store => "storing the file",
            Stage::List => "listing the remote directory",
        }
    }
}

/// Converts an FTP client error into a classified failure.
pub(crate) fn classify(stage: Stage, error: FtpError) -> TransportFailure {
    let kind = match &error {
        FtpError::ConnectionError(e) => classify_io(e.kind()),
        FtpError::UnexpectedResponse(response) => classify_reply(stage, response.status.code()),
        FtpError::InvalidAddress(_) => FailureKind::ConnectionError,
        _ => FailureKind::Unknown,
    };
    TransportFailure::new(
        kind,
        format!("FTP error while {}: {}", stage.describe(), error),
    )
}

pub(crate) fn classify_io(kind: ErrorKind) -> FailureKind {
    match kind {
        // Socket read/write timeouts surface as `WouldBlock` on Unix.
        ErrorKind::TimedOut | ErrorKind::WouldBlock => FailureKind::Timeout,
        _ => FailureKind::ConnectionError,
    }
}

pub(crate) fn classify_reply(stage: Stage, code: u32) -> FailureKind {
    match code {
        // Service not available, can't open data connection, transfer aborted.
        421 | 425 | 426 => FailureKind::ConnectionError,
        // Not logged in, need account, unexpected password prompt.
        530 | 532 | 331 | 332 | 430 => FailureKind::AuthError,
        // File unavailable, name not allowed, storage exceeded, bad argument.
        550 | 551 | 552 | 553 | 501 if matches!(stage, Stage::Directory | Stage::Store) => {
            FailureKind::RemotePathError
        }
        _ => FailureKind::Unknown,
    }
}
