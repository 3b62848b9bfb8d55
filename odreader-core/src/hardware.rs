use crate::device::Device;
use crate::registry::Discovery;
use log::{debug, info};
use shared_state::DeviceKey;
use std::collections::BTreeSet;
use std::time::Duration;
use transport::{DeviceHandle, DeviceTransport, RetryError, RetryPolicy, TransportError};

#[derive(thiserror::Error, Debug)]
pub enum HardwareError {
    #[error(transparent)]
    RetriesExhausted(#[from] RetryError<TransportError>),
    #[error("no ports requested from device {0}")]
    NoPorts(DeviceKey),
}

/// Indicator blink used to locate a reader on the bench.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentifyPattern {
    pub toggles: u32,
    pub delay: Duration,
}

impl Default for IdentifyPattern {
    fn default() -> Self {
        Self {
            toggles: 25,
            delay: Duration::from_millis(150),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementSettings {
    pub repetitions: u32,
    /// Excitation voltage per DAC, applied for the duration of a reading.
    pub dac_voltages: Vec<f64>,
    pub repetition_spacing: Duration,
}

impl Default for MeasurementSettings {
    fn default() -> Self {
        Self {
            repetitions: 9,
            dac_voltages: vec![5.0, 2.6],
            repetition_spacing: Duration::from_millis(1000 / 9),
        }
    }
}

/// Retrying front for a [`DeviceTransport`].
///
/// Every operation opens its device, does its work and drops the handle
/// before returning, so no connection outlives a single call.
pub struct Hardware {
    transport: Box<dyn DeviceTransport>,
    discovery_retry: RetryPolicy,
    device_retry: RetryPolicy,
    identify: IdentifyPattern,
}

impl Hardware {
    pub fn new(
        transport: Box<dyn DeviceTransport>,
        discovery_retry: RetryPolicy,
        device_retry: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            discovery_retry,
            device_retry,
            identify: IdentifyPattern::default(),
        }
    }

    pub fn with_identify_pattern(mut self, identify: IdentifyPattern) -> Self {
        self.identify = identify;
        self
    }

    /// Lists attached serials and builds a [`Device`] for each one not in
    /// `known`. The whole enumeration is retried as a unit.
    pub fn discover(&mut self, known: &BTreeSet<DeviceKey>) -> Result<Discovery, HardwareError> {
        let transport = &mut self.transport;
        let discovery = self.discovery_retry.run("device discovery", || {
            let serials = transport.list_serials()?;
            let mut discovery = Discovery::default();
            for serial in serials {
                let key = DeviceKey(serial);
                discovery.connected.push(key);
                if known.contains(&key) {
                    continue;
                }
                let name = transport.open(serial)?.name()?;
                discovery.new_devices.push(Device::new(name, key));
            }
            Ok::<_, TransportError>(discovery)
        })?;
        debug!(
            "discovery found {} device(s), {} new",
            discovery.connected.len(),
            discovery.new_devices.len()
        );
        Ok(discovery)
    }

    /// Runs `f` against an open handle for `serial`, retrying the open and
    /// the operation together.
    pub fn connect<T, F>(
        &mut self,
        serial: DeviceKey,
        operation: &str,
        mut f: F,
    ) -> Result<T, HardwareError>
    where
        F: FnMut(&mut dyn DeviceHandle) -> Result<T, TransportError>,
    {
        let transport = &mut self.transport;
        let label = format!("{operation} on device {serial}");
        let value = self.device_retry.run(&label, || {
            let mut handle = transport.open(serial.0)?;
            f(handle.as_mut())
        })?;
        Ok(value)
    }

    pub fn read_name(&mut self, serial: DeviceKey) -> Result<String, HardwareError> {
        self.connect(serial, "read name", |handle| handle.name())
    }

    pub fn rename(&mut self, serial: DeviceKey, name: &str) -> Result<(), HardwareError> {
        self.connect(serial, "rename", |handle| handle.set_name(name))?;
        info!("device {serial} renamed to '{name}'");
        Ok(())
    }

    /// Toggles the indicator and DAC0 so the reader can be found on the bench.
    pub fn identify(&mut self, serial: DeviceKey) -> Result<(), HardwareError> {
        let pattern = self.identify;
        self.connect(serial, "identify", |handle| {
            for cycle in 0..pattern.toggles {
                let on = cycle % 2 == 1;
                handle.set_indicator(on)?;
                handle.set_dac(0, if on { 2.5 } else { 0.0 })?;
                std::thread::sleep(pattern.delay);
            }
            handle.set_indicator(false)?;
            handle.set_dac(0, 0.0)
        })
    }

    /// Averages `settings.repetitions` readings of each position, with the
    /// DACs driven during the reading and zeroed afterwards.
    pub fn measure_voltages(
        &mut self,
        serial: DeviceKey,
        positions: &[u8],
        settings: &MeasurementSettings,
    ) -> Result<Vec<f64>, HardwareError> {
        if positions.is_empty() {
            return Err(HardwareError::NoPorts(serial));
        }
        let repetitions = settings.repetitions.max(1);
        self.connect(serial, "voltage measurement", |handle| {
            handle.configure_analog(positions)?;
            for (dac, volts) in settings.dac_voltages.iter().enumerate() {
                handle.set_dac(dac as u8, *volts)?;
            }
            let mut sums = vec![0.0; positions.len()];
            for _ in 0..repetitions {
                std::thread::sleep(settings.repetition_spacing);
                for (sum, value) in sums.iter_mut().zip(handle.read_analog(positions)?) {
                    *sum += value;
                }
            }
            for dac in 0..settings.dac_voltages.len() {
                handle.set_dac(dac as u8, 0.0)?;
            }
            Ok(sums
                .into_iter()
                .map(|sum| sum / f64::from(repetitions))
                .collect())
        })
    }

    pub fn temperature_celsius(&mut self, serial: DeviceKey) -> Result<f64, HardwareError> {
        let kelvin = self.connect(serial, "temperature reading", |handle| {
            handle.temperature_kelvin()
        })?;
        Ok(kelvin - 273.15)
    }
}
