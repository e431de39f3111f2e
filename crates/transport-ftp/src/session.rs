//! Blocking FTP session handling. Everything in here must run on the
//! blocking thread pool.

use crate::classify::{classify, Stage};
use crate::deadline::{remaining, DeadlineReader};
use app_config::ftp::FtpConnectionString;
use std::fs::File;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::{Duration, Instant};
use suppaftp::types::FileType;
use suppaftp::FtpStream;
use tracing::{debug, info, trace, warn};
use transport_traits::TransportFailure;

/// Connection parameters shared by all sessions of a transport.
#[derive(Debug, Clone)]
pub(crate) struct SessionParams {
    pub connection: FtpConnectionString,
    pub timeout: Duration,
}

/// An established, logged-in FTP session.
pub(crate) struct Session {
    stream: FtpStream,
    timeout: Duration,
    deadline: Instant,
}

impl Session {
    /// Connects, logs in and switches to binary mode.
    ///
    /// No socket operation waits past `deadline`.
    pub fn open(params: &SessionParams, deadline: Instant) -> Result<Self, TransportFailure> {
        let addr = resolve(&params.connection)?;
        debug!("Connecting to FTP server {addr}");

        let connect_timeout = params.timeout.min(remaining(deadline)?);
        let stream = FtpStream::connect_timeout(addr, connect_timeout)
            .map_err(|e| classify(Stage::Connect, e))?;
        let mut session = Self {
            stream,
            timeout: params.timeout,
            deadline,
        };
        session.arm_timeouts()?;
        let stream = &mut session.stream;

        match params.connection.user() {
            Some(user) => {
                let password = params.connection.password().unwrap_or_default();
                stream
                    .login(user, password)
                    .map_err(|e| classify(Stage::Login, e))?;
                trace!("Logged in as {user}");
            }
            None => {
                stream
                    .login("anonymous", "anonymous")
                    .map_err(|e| classify(Stage::Login, e))?;
                trace!("Logged in anonymously");
            }
        }

        stream
            .transfer_type(FileType::Binary)
            .map_err(|e| classify(Stage::Login, e))?;

        Ok(session)
    }

    /// Caps the control socket timeouts at the time left until the deadline.
    fn arm_timeouts(&self) -> Result<(), TransportFailure> {
        let timeout = self.timeout.min(remaining(self.deadline)?);
        let socket = self.stream.get_ref();
        socket
            .set_read_timeout(Some(timeout))
            .and_then(|_| socket.set_write_timeout(Some(timeout)))
            .map_err(|e| {
                TransportFailure::connection(format!("Failed to configure socket timeouts: {e}"))
            })
    }

    /// Creates every component of `remote_dir` that does not exist yet,
    /// then changes into it.
    pub fn enter_directory(&mut self, remote_dir: &str) -> Result<(), TransportFailure> {
        self.arm_timeouts()?;
        let mut current = String::new();
        for part in remote_dir.split('/').filter(|part| !part.is_empty()) {
            current.push('/');
            current.push_str(part);

            if self.stream.cwd(&current).is_ok() {
                continue;
            }

            match self.stream.mkdir(&current) {
                Ok(()) => info!("Created remote directory {current}"),
                // Another session may have created it in the meantime; `cwd`
                // below reports the real problem if it still does not exist.
                Err(e) => debug!("Could not create remote directory {current}: {e}"),
            }
        }

        let target = if current.is_empty() { "/" } else { &current };
        self.stream
            .cwd(target)
            .map_err(|e| classify(Stage::Directory, e))
    }

    /// Stores the local file under `file_name` in the current directory.
    ///
    /// The upload is aborted with a timeout failure once the deadline passes.
    pub fn store(&mut self, local_path: &Path, file_name: &str) -> Result<u64, TransportFailure> {
        let file = File::open(local_path).map_err(|e| {
            TransportFailure::unknown(format!("Failed to open local file {local_path:?}: {e}"))
        })?;
        self.arm_timeouts()?;
        let mut reader = DeadlineReader::new(file, self.deadline);
        self.stream
            .put_file(file_name, &mut reader)
            .map_err(|e| classify(Stage::Store, e))
    }

    /// Lists the root directory, returning the number of entries.
    pub fn list_root(&mut self) -> Result<usize, TransportFailure> {
        self.stream
            .nlst(Some("/"))
            .map(|entries| entries.len())
            .map_err(|e| classify(Stage::List, e))
    }

    pub fn welcome(&self) -> Option<String> {
        self.stream.get_welcome_msg().map(|msg| msg.trim().to_string())
    }

    /// Closes the session politely. Failures are irrelevant at this point.
    pub fn close(mut self) {
        if let Err(e) = self.stream.quit() {
            warn!("Failed to close FTP session cleanly: {e}");
        }
    }
}

fn resolve(connection: &FtpConnectionString) -> Result<SocketAddr, TransportFailure> {
    let address = connection.address();
    address
        .to_socket_addrs()
        .map_err(|e| TransportFailure::connection(format!("Failed to resolve {address}: {e}")))?
        .next()
        .ok_or_else(|| TransportFailure::connection(format!("No address found for {address}")))
}

/// Splits an absolute remote path into its directory and file name.
pub(crate) fn split_remote_path(remote_path: &str) -> Result<(&str, &str), TransportFailure> {
    match remote_path.rsplit_once('/') {
        Some((_, "")) | None => Err(TransportFailure::remote_path(format!(
            "Remote path {remote_path} does not name a file"
        ))),
        Some((directory, file_name)) => Ok((directory, file_name)),
    }
}
