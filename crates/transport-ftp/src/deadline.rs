//! Bounds a blocking FTP session by the deadline of its transfer attempt.

use std::io::{self, Read};
use std::time::{Duration, Instant};
use transport_traits::TransportFailure;

/// The time left until `deadline`, or a timeout failure if it has passed.
pub(crate) fn remaining(deadline: Instant) -> Result<Duration, TransportFailure> {
    let left = deadline.saturating_duration_since(Instant::now());
    if left.is_zero() {
        return Err(TransportFailure::timeout(
            "Transfer deadline passed before the FTP session finished",
        ));
    }
    Ok(left)
}

/// Wraps the local file so that an upload stops at the deadline instead of
/// writing on after the attempt was given up.
pub(crate) struct DeadlineReader<R> {
    inner: R,
    deadline: Instant,
}

impl<R> DeadlineReader<R> {
    pub fn new(inner: R, deadline: Instant) -> Self {
        Self { inner, deadline }
    }
}

impl<R: Read> Read for DeadlineReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if Instant::now() >= self.deadline {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "transfer deadline passed",
            ));
        }
        self.inner.read(buf)
    }
}
