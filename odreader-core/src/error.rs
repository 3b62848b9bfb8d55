use crate::config::ConfigError;
use crate::hardware::HardwareError;
use crate::header::HeaderError;
use crate::registry::RegistryError;
use shared_state::StateError;
use std::path::PathBuf;
use transport::TransportError;

#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Hardware(#[from] HardwareError),
    #[error(transparent)]
    Header(#[from] HeaderError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("invalid experiment name '{0}': use letters, digits, '_', '-' or spaces")]
    InvalidName(String),
    #[error("invalid device name {0:?}: tabs and line breaks are not allowed")]
    InvalidDeviceName(String),
    #[error("an experiment named '{0}' is already running")]
    NameInUse(String),
    #[error("output file {0} already exists")]
    OutputExists(PathBuf),
    #[error("interval must be a positive, representable number of minutes, got {0}")]
    InvalidInterval(f64),
    #[error("no running experiment named '{0}'")]
    UnknownExperiment(String),
    #[error("failed to start sampler: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("failed to signal sampler {pid}: {source}")]
    Terminate {
        pid: u32,
        #[source]
        source: std::io::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
