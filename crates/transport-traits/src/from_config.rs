use crate::{DynTransport, TransportInfo};
use app_config::AppConfig;
use std::error::Error;
use tracing::{error, info};

pub trait TryCreateFromConfig: TransportInfo
where
    Self::Error: Error + Send + Sync + 'static,
{
    type Error;

    fn try_from_config(config: &AppConfig) -> Result<DynTransport, Self::Error>;

    /// Creates the transport described by the configuration.
    fn create(config: &AppConfig) -> Result<DynTransport, CreateTransportError>
    where
        Self: Sized,
    {
        match Self::try_from_config(config) {
            Ok(transport) => {
                info!(
                    "Registering {transport} transport {tag} (transport version {transport_version})",
                    transport = Self::transport_name(),
                    tag = transport.tag(),
                    transport_version = Self::transport_version(),
                );
                Ok(transport)
            }
            Err(e) => {
                error!(
                    "Failed to initialize {transport} transport: {error}",
                    transport = Self::transport_name(),
                    error = e
                );
                Err(CreateTransportError::TryCreateFromConfig(Box::new(e)))
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CreateTransportError {
    #[error(transparent)]
    TryCreateFromConfig(Box<dyn Error + Send + Sync>),
}
