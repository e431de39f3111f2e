// only enables the `doc_cfg` feature when
// the `docsrs` configuration attribute is defined
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod ftp;
pub mod queue;
pub mod uploads;

use clap::ArgMatches;
use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// The prefix of environment variables overriding configuration values,
/// e.g. `EVENTFOLIO__QUEUE__MAX_ATTEMPTS=5`.
pub const ENV_PREFIX: &str = "EVENTFOLIO";

/// The application configuration.
#[derive(Default, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// The version of the configuration.
    version: u8,
    /// Settings for accepting and stashing uploads.
    pub uploads: uploads::UploadsConfig,
    /// The remote transfer target.
    pub transport: TransportConfig,
    /// Settings for the transfer queue and its retry policy.
    pub queue: queue::QueueConfig,
}

/// Provides transport-specific configuration.
#[derive(Default, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Provides FTP specific configuration.
    pub ftp: Option<ftp::FtpTransportConfig>,
}

impl AppConfig {
    pub fn load(config_dir: &Path, matches: &ArgMatches) -> Result<Self, anyhow::Error> {
        let mut config_builder = ConfigBuilder::<DefaultState>::default();

        // Add default configuration.
        config_builder = config_builder
            .add_source(
                File::from(config_dir.join("default.yml"))
                    .format(FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                // The YAML FAQ requests `.yaml` to be used as the default.
                File::from(config_dir.join("default.yaml"))
                    .format(FileFormat::Yaml)
                    .required(false),
            );

        if let Some(path) = matches.get_one::<PathBuf>("config_file").cloned() {
            info!(
                "Loading configuration file from {config_path:?}",
                config_path = path
            );
            config_builder =
                config_builder.add_source(File::from(path).format(FileFormat::Yaml).required(true))
        }

        // Environment variables take precedence over any file.
        config_builder = config_builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config = match config_builder.build() {
            Ok(config) => config,
            Err(e) => {
                error!("Unable to load configuration: {error}", error = e);
                return Err(e.into());
            }
        };

        match config.try_deserialize() {
            Ok(config) => Ok(config),
            Err(e) => {
                error!("Unable to deserialize configuration: {error}", error = e);
                Err(e.into())
            }
        }
    }
}
