use crate::port::Port;
use shared_state::{DeviceKey, DeviceSnapshot};
use transport::PORTS_PER_DEVICE;

/// A reader and its fixed set of ports.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    name: String,
    serial: DeviceKey,
    ports: Vec<Port>,
}

impl Device {
    pub fn new(name: impl Into<String>, serial: DeviceKey) -> Self {
        Self {
            name: name.into(),
            serial,
            ports: (1..=PORTS_PER_DEVICE)
                .map(|position| Port::new(serial, position))
                .collect(),
        }
    }

    pub fn key(&self) -> DeviceKey {
        self.serial
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Ports ordered by position.
    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    pub fn port(&self, position: u8) -> Option<&Port> {
        self.ports.get(usize::from(position).checked_sub(1)?)
    }

    pub(crate) fn port_mut(&mut self, position: u8) -> Option<&mut Port> {
        self.ports.get_mut(usize::from(position).checked_sub(1)?)
    }

    pub(crate) fn ports_mut(&mut self) -> impl Iterator<Item = &mut Port> {
        self.ports.iter_mut()
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            serial: self.serial,
            name: self.name.clone(),
        }
    }
}
