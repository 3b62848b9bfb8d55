use crate::device::Device;
use crate::port::Port;
use shared_state::{DeviceKey, Experiment, ExperimentKey, PortKey, Usage};
use std::collections::{BTreeMap, BTreeSet};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("device {0} is not known")]
    UnknownDevice(DeviceKey),
    #[error("port {0} does not exist")]
    UnknownPort(PortKey),
    #[error("port {port} is already in use ({usage:?} by {users:?})")]
    PortInUse {
        port: PortKey,
        usage: Usage,
        users: Vec<String>,
    },
    #[error("port {0} is listed more than once")]
    DuplicatePort(PortKey),
    #[error("an experiment needs at least one test port")]
    NoTestPorts,
    #[error("port {0} cannot be claimed as unused")]
    InvalidClaim(PortKey),
}

/// Result of one hardware enumeration.
///
/// `new_devices` holds freshly constructed devices for serials the registry did
/// not know when the enumeration ran; known devices are never rebuilt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Discovery {
    pub connected: Vec<DeviceKey>,
    pub new_devices: Vec<Device>,
}

impl Discovery {
    /// A discovery in which every given device is attached.
    pub fn from_devices(devices: Vec<Device>) -> Self {
        Self {
            connected: devices.iter().map(Device::key).collect(),
            new_devices: devices,
        }
    }
}

/// Known devices (and through them every port) plus the live experiments.
///
/// Ports are owned by their device; everything else refers to them by
/// [`PortKey`].
#[derive(Debug, Default)]
pub struct Registry {
    devices: BTreeMap<DeviceKey, Device>,
    experiments: BTreeMap<ExperimentKey, Experiment>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn device(&self, key: DeviceKey) -> Option<&Device> {
        self.devices.get(&key)
    }

    pub(crate) fn device_mut(&mut self, key: DeviceKey) -> Option<&mut Device> {
        self.devices.get_mut(&key)
    }

    pub fn device_keys(&self) -> BTreeSet<DeviceKey> {
        self.devices.keys().copied().collect()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Adds `device` unless its serial is already known; the known device (and
    /// its claims) wins.
    pub fn insert_device(&mut self, device: Device) -> bool {
        if self.devices.contains_key(&device.key()) {
            return false;
        }
        self.devices.insert(device.key(), device);
        true
    }

    pub(crate) fn retain_devices<F>(&mut self, mut keep: F) -> Vec<DeviceKey>
    where
        F: FnMut(&Device) -> bool,
    {
        let dropped: Vec<DeviceKey> = self
            .devices
            .values()
            .filter(|d| !keep(d))
            .map(Device::key)
            .collect();
        for key in &dropped {
            self.devices.remove(key);
        }
        dropped
    }

    /// Applies an enumeration. With `reset` the known set is replaced by the
    /// discovered devices; otherwise only new serials are added.
    pub fn apply_discovery(&mut self, discovery: Discovery, reset: bool) -> Vec<DeviceKey> {
        if reset {
            self.devices.clear();
        }
        let mut added = Vec::new();
        for device in discovery.new_devices {
            let key = device.key();
            if self.insert_device(device) {
                added.push(key);
            }
        }
        added
    }

    /// Every port of every known device, ordered by serial then position.
    pub fn ports(&self) -> impl Iterator<Item = &Port> {
        self.devices.values().flat_map(|d| d.ports().iter())
    }

    pub fn port(&self, key: PortKey) -> Option<&Port> {
        self.devices.get(&key.device)?.port(key.position)
    }

    fn port_mut(&mut self, key: PortKey) -> Result<&mut Port, RegistryError> {
        let device = self
            .devices
            .get_mut(&key.device)
            .ok_or(RegistryError::UnknownDevice(key.device))?;
        device
            .port_mut(key.position)
            .ok_or(RegistryError::UnknownPort(key))
    }

    pub fn report_available_ports(&self) -> Vec<&Port> {
        self.ports().filter(|p| p.is_available()).collect()
    }

    pub fn report_reference_ports(&self) -> Vec<&Port> {
        self.ports()
            .filter(|p| p.usage() == Usage::Reference)
            .collect()
    }

    pub fn count_available_ports(&self) -> usize {
        self.ports().filter(|p| p.is_available()).count()
    }

    /// Marks `port` as used by `experiment`. Eligibility is the caller's
    /// business; see [`Registry::claim_ports`] for the checked variant.
    pub fn claim(
        &mut self,
        port: PortKey,
        experiment: &str,
        usage: Usage,
    ) -> Result<(), RegistryError> {
        if usage == Usage::Unused {
            return Err(RegistryError::InvalidClaim(port));
        }
        self.port_mut(port)?.claim(experiment, usage);
        Ok(())
    }

    /// Checks every port and claims all of them, or none.
    pub fn claim_ports(
        &mut self,
        experiment: &str,
        test_ports: &[PortKey],
        reference_port: Option<PortKey>,
    ) -> Result<(), RegistryError> {
        if test_ports.is_empty() {
            return Err(RegistryError::NoTestPorts);
        }
        let requested: Vec<(PortKey, Usage)> = test_ports
            .iter()
            .map(|p| (*p, Usage::Test))
            .chain(reference_port.map(|p| (p, Usage::Reference)))
            .collect();

        let mut seen = BTreeSet::new();
        for (key, usage) in &requested {
            if !seen.insert(*key) {
                return Err(RegistryError::DuplicatePort(*key));
            }
            if !self.devices.contains_key(&key.device) {
                return Err(RegistryError::UnknownDevice(key.device));
            }
            let port = self.port(*key).ok_or(RegistryError::UnknownPort(*key))?;
            if !port.can_claim(*usage) {
                return Err(RegistryError::PortInUse {
                    port: *key,
                    usage: port.usage(),
                    users: port.users().to_vec(),
                });
            }
        }

        for (key, usage) in requested {
            self.claim(key, experiment, usage)?;
        }
        Ok(())
    }

    /// Removes `experiment` from every port. Safe for names that hold nothing.
    pub fn release(&mut self, experiment: &str) {
        for device in self.devices.values_mut() {
            for port in device.ports_mut() {
                port.release(experiment);
            }
        }
    }

    pub(crate) fn clear_claims(&mut self) {
        for device in self.devices.values_mut() {
            for port in device.ports_mut() {
                port.clear();
            }
        }
    }

    pub fn experiments(&self) -> impl Iterator<Item = &Experiment> {
        self.experiments.values()
    }

    pub fn experiment(&self, key: &ExperimentKey) -> Option<&Experiment> {
        self.experiments.get(key)
    }

    pub fn experiment_by_name(&self, name: &str) -> Option<&Experiment> {
        self.experiments.values().find(|e| e.name == name)
    }

    pub fn experiment_keys(&self) -> Vec<ExperimentKey> {
        self.experiments.keys().cloned().collect()
    }

    pub(crate) fn insert_experiment(&mut self, experiment: Experiment) -> bool {
        let key = experiment.key();
        if self.experiments.contains_key(&key) {
            return false;
        }
        self.experiments.insert(key, experiment);
        true
    }

    pub(crate) fn remove_experiment(&mut self, key: &ExperimentKey) -> Option<Experiment> {
        self.experiments.remove(key)
    }
}
