use crate::session::{split_remote_path, Session, SessionParams};
use app_config::ftp::FtpTransportConfig;
use app_config::AppConfig;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::task::spawn_blocking;
use tracing::{debug, info};
use transport_traits::{
    DynTransport, Transport, TransportFailure, TransportInfo, TransportTag, TryCreateFromConfig,
};

/// Pushes files to an FTP server.
///
/// The FTP client is blocking, so every session runs on the blocking
/// thread pool. A fresh session is opened per file and gives up with a
/// timeout once the deadline of its attempt has passed.
pub struct FtpTransport {
    /// The tag identifying the transport.
    tag: String,
    /// The directory below which the event folders are created.
    remote_dir: String,
    params: SessionParams,
}

impl FtpTransport {
    pub fn new(config: &FtpTransportConfig) -> Self {
        Self {
            tag: config.tag.clone(),
            remote_dir: config.remote_dir.trim_end_matches('/').to_string(),
            params: SessionParams {
                connection: config.connection_string.clone(),
                timeout: config.timeout(),
            },
        }
    }
}

impl TransportTag for FtpTransport {
    fn tag(&self) -> &str {
        &self.tag
    }
}

#[async_trait]
impl Transport for FtpTransport {
    fn destination(&self, event_id: &str, file_name: &str) -> String {
        format!("{}/{}/{}", self.remote_dir, event_id, file_name)
    }

    async fn send(
        &self,
        local_path: &Path,
        remote_path: &str,
        deadline: Instant,
    ) -> Result<u64, TransportFailure> {
        let (remote_dir, file_name) = split_remote_path(remote_path)?;
        let (remote_dir, file_name) = (remote_dir.to_string(), file_name.to_string());
        let local_path: PathBuf = local_path.to_path_buf();
        let params = self.params.clone();

        let bytes = spawn_blocking(move || {
            let mut session = Session::open(&params, deadline)?;
            let result = session
                .enter_directory(&remote_dir)
                .and_then(|_| session.store(&local_path, &file_name));
            session.close();
            result
        })
        .await
        .map_err(|e| TransportFailure::unknown(format!("FTP worker task failed: {e}")))??;

        info!(
            "Uploaded {bytes} bytes to ftp://{address}{remote_path}",
            address = self.params.connection.address()
        );
        Ok(bytes)
    }

    async fn probe(&self) -> Result<String, TransportFailure> {
        let params = self.params.clone();
        let deadline = Instant::now() + params.timeout;
        let (entries, welcome) = spawn_blocking(move || {
            let mut session = Session::open(&params, deadline)?;
            let welcome = session.welcome();
            let result = session.list_root();
            session.close();
            result.map(|entries| (entries, welcome))
        })
        .await
        .map_err(|e| TransportFailure::unknown(format!("FTP worker task failed: {e}")))??;

        debug!("FTP probe listed {entries} root entries");
        Ok(match welcome {
            Some(welcome) => format!("Connected to {} ({welcome})", self.params.connection),
            None => format!("Connected to {}", self.params.connection),
        })
    }
}

impl TransportInfo for FtpTransport {
    fn transport_name() -> &'static str {
        "FTP"
    }

    fn transport_version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }
}

impl TryCreateFromConfig for FtpTransport {
    type Error = FtpTransportConstructionError;

    fn try_from_config(config: &AppConfig) -> Result<DynTransport, Self::Error> {
        match &config.transport.ftp {
            Some(ftp) => Ok(DynTransport::new(FtpTransport::new(ftp))),
            None => Err(FtpTransportConstructionError::MissingConfiguration),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FtpTransportConstructionError {
    #[error("No FTP transport is configured (transport.ftp)")]
    MissingConfiguration,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> FtpTransportConfig {
        serde_yaml::from_str(
            r#"
            connection_string: "ftp://user:pw@127.0.0.1:2121"
            remote_dir: /srv/event_photos/incoming/
            "#,
        )
        .expect("Failed to deserialize FTP config")
    }

    #[test]
    fn destination_is_derived_from_event_and_file_name() {
        let transport = FtpTransport::new(&config());
        assert_eq!(
            transport.destination("wedding-2024", "ana_20241209_120000_abc12345.jpg"),
            "/srv/event_photos/incoming/wedding-2024/ana_20241209_120000_abc12345.jpg"
        );
        assert_eq!(transport.tag(), "ftp");
    }

    #[test]
    fn missing_configuration_is_reported() {
        let config = AppConfig::default();
        assert!(matches!(
            FtpTransport::try_from_config(&config),
            Err(FtpTransportConstructionError::MissingConfiguration)
        ));
    }
}
