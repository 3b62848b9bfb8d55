use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub mod store;
pub use store::{StateLock, StateStore};

/// Hardware serial number; the identity of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceKey(pub u64);

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One physical port: owning device plus 1-based position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortKey {
    pub device: DeviceKey,
    pub position: u8,
}

impl PortKey {
    pub const fn new(device: DeviceKey, position: u8) -> Self {
        Self { device, position }
    }
}

impl fmt::Display for PortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.device, self.position)
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("port must look like <serial>:<position>, got '{0}'")]
pub struct PortKeyParseError(pub String);

impl FromStr for PortKey {
    type Err = PortKeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PortKeyParseError(s.to_string());
        let (serial, position) = s.trim().split_once(':').ok_or_else(invalid)?;
        let serial = serial.trim().parse::<u64>().map_err(|_| invalid())?;
        let position = position.trim().parse::<u8>().map_err(|_| invalid())?;
        Ok(Self::new(DeviceKey(serial), position))
    }
}

/// An experiment is identified by its name together with its sampler pid, so
/// a restart under the same name is a different experiment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExperimentKey {
    pub name: String,
    pub process_id: Option<u32>,
}

impl fmt::Display for ExperimentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.process_id {
            Some(pid) => write!(f, "{} (pid {pid})", self.name),
            None => write!(f, "{} (not started)", self.name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Usage {
    #[default]
    Unused,
    Test,
    Reference,
}

impl Usage {
    /// Numeric code written to output file headers.
    pub fn code(self) -> u8 {
        match self {
            Usage::Unused => 0,
            Usage::Test => 1,
            Usage::Reference => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Usage::Unused),
            1 => Some(Usage::Test),
            2 => Some(Usage::Reference),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub serial: DeviceKey,
    pub name: String,
}

/// A started (or starting) sampling job as it is written to the shared state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub name: String,
    pub interval_minutes: f64,
    pub test_ports: Vec<PortKey>,
    #[serde(default)]
    pub reference_port: Option<PortKey>,
    /// Names of the devices owning the ports at the time the experiment started.
    #[serde(default)]
    pub devices: Vec<DeviceSnapshot>,
    pub output_path: PathBuf,
    #[serde(default)]
    pub process_id: Option<u32>,
}

impl Experiment {
    pub fn key(&self) -> ExperimentKey {
        ExperimentKey {
            name: self.name.clone(),
            process_id: self.process_id,
        }
    }

    /// Test ports in order, then the reference port.
    pub fn all_ports(&self) -> Vec<PortKey> {
        self.port_usages().map(|(port, _)| port).collect()
    }

    pub fn port_usages(&self) -> impl Iterator<Item = (PortKey, Usage)> + '_ {
        self.test_ports
            .iter()
            .map(|port| (*port, Usage::Test))
            .chain(self.reference_port.map(|port| (port, Usage::Reference)))
    }

    pub fn device_name(&self, serial: DeviceKey) -> Option<&str> {
        self.devices
            .iter()
            .find(|d| d.serial == serial)
            .map(|d| d.name.as_str())
    }

    pub fn output_stem(&self) -> Option<&str> {
        self.output_path.file_stem().and_then(|s| s.to_str())
    }
}

/// The cross-process source of truth: live experiments plus their names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SharedState {
    #[serde(rename = "Experiments", default)]
    pub experiments: Vec<Experiment>,
    #[serde(rename = "Experiment_names", default)]
    pub experiment_names: Vec<String>,
}

impl SharedState {
    pub fn contains(&self, key: &ExperimentKey) -> bool {
        self.experiments.iter().any(|e| &e.key() == key)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.experiment_names.iter().any(|n| n == name)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Experiment> {
        self.experiments.iter().find(|e| e.name == name)
    }

    pub fn insert(&mut self, experiment: Experiment) {
        self.experiment_names.push(experiment.name.clone());
        self.experiments.push(experiment);
    }

    pub fn remove(&mut self, key: &ExperimentKey) -> Option<Experiment> {
        let idx = self.experiments.iter().position(|e| &e.key() == key)?;
        let removed = self.experiments.remove(idx);
        if let Some(name_idx) = self
            .experiment_names
            .iter()
            .position(|n| *n == removed.name)
        {
            self.experiment_names.remove(name_idx);
        }
        Some(removed)
    }

    /// Records the sampler pid of an entry persisted before its process existed.
    pub fn set_process_id(&mut self, key: &ExperimentKey, process_id: u32) -> bool {
        match self.experiments.iter_mut().find(|e| &e.key() == key) {
            Some(experiment) => {
                experiment.process_id = Some(process_id);
                true
            }
            None => false,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum StateError {
    #[error("state file {0} does not exist")]
    Missing(PathBuf),
    #[error("state file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("could not lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SharedState {
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), StateError> {
        store::write_atomically(path.as_ref(), &serde_json::to_vec_pretty(self)?)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, StateError> {
        let path = path.as_ref();
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StateError::Missing(path.to_path_buf()));
            }
            Err(err) => return Err(err.into()),
        };
        serde_json::from_slice(&data).map_err(|source| StateError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
    }
}
