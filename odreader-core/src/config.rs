use crate::hardware::MeasurementSettings;
use crate::sampler::SamplerSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use transport::{RetryPolicy, TransportConfig, TransportKind};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("could not serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: 4,
            delay_ms: 1000,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.attempts, Duration::from_millis(self.delay_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingSettings {
    pub repetitions: u32,
    pub dac_voltages: Vec<f64>,
    pub failure_limit: u32,
    pub failure_backoff_ms: u64,
    /// Pause before each repetition; defaults to spreading one second over
    /// all repetitions.
    pub repetition_spacing_ms: Option<u64>,
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            repetitions: 9,
            dac_voltages: vec![5.0, 2.6],
            failure_limit: 4,
            failure_backoff_ms: 2300,
            repetition_spacing_ms: None,
        }
    }
}

/// Settings shared by the CLI and the sampling processes it spawns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub state_path: PathBuf,
    pub output_dir: PathBuf,
    pub bench_path: PathBuf,
    /// Executable launched for `sample`; the running binary when unset.
    pub sampler_program: Option<PathBuf>,
    pub discovery: RetrySettings,
    pub hardware: RetrySettings,
    pub sampling: SamplingSettings,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from("odreader_state.json"),
            output_dir: PathBuf::from("runs"),
            bench_path: PathBuf::from("odreader_bench.json"),
            sampler_program: None,
            discovery: RetrySettings {
                attempts: 3,
                delay_ms: 1000,
            },
            hardware: RetrySettings {
                attempts: 4,
                delay_ms: 1000,
            },
            sampling: SamplingSettings::default(),
        }
    }
}

impl ReaderConfig {
    /// Reads `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("no config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(err) => return Err(err.into()),
        };
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            kind: TransportKind::Simulated,
            bench_path: self.bench_path.clone(),
        }
    }

    pub fn measurement_settings(&self) -> MeasurementSettings {
        let repetitions = self.sampling.repetitions.max(1);
        let spacing_ms = self
            .sampling
            .repetition_spacing_ms
            .unwrap_or(1000 / u64::from(repetitions));
        MeasurementSettings {
            repetitions,
            dac_voltages: self.sampling.dac_voltages.clone(),
            repetition_spacing: Duration::from_millis(spacing_ms),
        }
    }

    pub fn sampler_settings(&self) -> SamplerSettings {
        SamplerSettings {
            measurement: self.measurement_settings(),
            failure_limit: self.sampling.failure_limit.max(1),
            failure_backoff: Duration::from_millis(self.sampling.failure_backoff_ms),
        }
    }
}
