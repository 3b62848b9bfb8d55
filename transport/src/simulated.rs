use crate::{analog_io_masks, DeviceHandle, DeviceTransport, TransportError, PORTS_PER_DEVICE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const KELVIN_OFFSET: f64 = 273.15;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedDevice {
    pub serial: u64,
    pub name: String,
    #[serde(default = "default_temperature_c")]
    pub temperature_c: f64,
    #[serde(default = "default_baseline_volts")]
    pub baseline_volts: f64,
    #[serde(skip)]
    pub indicator_toggles: u32,
}

fn default_temperature_c() -> f64 {
    30.0
}

fn default_baseline_volts() -> f64 {
    1.2
}

impl SimulatedDevice {
    pub fn new(serial: u64, name: &str) -> Self {
        Self {
            serial,
            name: name.to_string(),
            temperature_c: default_temperature_c(),
            baseline_volts: default_baseline_volts(),
            indicator_toggles: 0,
        }
    }

    fn volts_at(&self, position: u8) -> f64 {
        self.baseline_volts - 0.01 * f64::from(position - 1)
    }
}

/// A set of pretend readers, stored as JSON so every process sees the same bench.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulatedBench {
    pub devices: Vec<SimulatedDevice>,
}

impl SimulatedBench {
    pub fn with_devices(count: usize) -> Self {
        let devices = (0..count)
            .map(|idx| {
                let letter = (b'A' + (idx % 26) as u8) as char;
                SimulatedDevice::new(1001 + idx as u64, &format!("Reader-{letter}"))
            })
            .collect();
        Self { devices }
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), TransportError> {
        let data = serde_json::to_vec_pretty(self)?;
        fs::write(path, data)?;
        Ok(())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, TransportError> {
        let data = fs::read(path)?;
        let bench = serde_json::from_slice(&data)?;
        Ok(bench)
    }

    pub fn device(&self, serial: u64) -> Option<&SimulatedDevice> {
        self.devices.iter().find(|d| d.serial == serial)
    }

    fn device_mut(&mut self, serial: u64) -> Option<&mut SimulatedDevice> {
        self.devices.iter_mut().find(|d| d.serial == serial)
    }
}

#[derive(Debug, Default)]
pub struct SimulatedTransport {
    bench: SimulatedBench,
    bench_path: Option<PathBuf>,
    pending_faults: u32,
}

impl SimulatedTransport {
    pub fn new(bench: SimulatedBench) -> Self {
        Self {
            bench,
            bench_path: None,
            pending_faults: 0,
        }
    }

    /// A bench backed by `path`. A missing file is an empty bench.
    pub fn open_bench<P: AsRef<Path>>(path: P) -> Result<Self, TransportError> {
        let path = path.as_ref().to_path_buf();
        let bench = if path.exists() {
            SimulatedBench::load_from_file(&path)?
        } else {
            SimulatedBench::default()
        };
        Ok(Self {
            bench,
            bench_path: Some(path),
            pending_faults: 0,
        })
    }

    pub fn bench(&self) -> &SimulatedBench {
        &self.bench
    }

    /// The next `count` transport calls fail as if the device were busy.
    pub fn inject_faults(&mut self, count: u32) {
        self.pending_faults = count;
    }

    pub fn pending_faults(&self) -> u32 {
        self.pending_faults
    }

    fn take_fault(&mut self, serial: u64) -> Result<(), TransportError> {
        if self.pending_faults > 0 {
            self.pending_faults -= 1;
            return Err(TransportError::Busy(serial));
        }
        Ok(())
    }

    fn refresh(&mut self) -> Result<(), TransportError> {
        let Some(path) = &self.bench_path else {
            return Ok(());
        };
        if path.exists() {
            let toggles: Vec<(u64, u32)> = self
                .bench
                .devices
                .iter()
                .map(|d| (d.serial, d.indicator_toggles))
                .collect();
            self.bench = SimulatedBench::load_from_file(path)?;
            for (serial, count) in toggles {
                if let Some(device) = self.bench.device_mut(serial) {
                    device.indicator_toggles = count;
                }
            }
        }
        Ok(())
    }

    fn persist(&self) -> Result<(), TransportError> {
        if let Some(path) = &self.bench_path {
            self.bench.save_to_file(path)?;
        }
        Ok(())
    }
}

impl DeviceTransport for SimulatedTransport {
    fn list_serials(&mut self) -> Result<Vec<u64>, TransportError> {
        self.take_fault(0)?;
        self.refresh()?;
        Ok(self.bench.devices.iter().map(|d| d.serial).collect())
    }

    fn open(&mut self, serial: u64) -> Result<Box<dyn DeviceHandle + '_>, TransportError> {
        self.take_fault(serial)?;
        self.refresh()?;
        if self.bench.device(serial).is_none() {
            return Err(TransportError::DeviceNotFound(serial));
        }
        Ok(Box::new(SimulatedHandle {
            transport: self,
            serial,
            analog_mask: (0, 0),
            dacs: [0.0; 2],
        }))
    }
}

struct SimulatedHandle<'a> {
    transport: &'a mut SimulatedTransport,
    serial: u64,
    analog_mask: (u8, u8),
    dacs: [f64; 2],
}

impl SimulatedHandle<'_> {
    fn device(&self) -> Result<&SimulatedDevice, TransportError> {
        self.transport
            .bench
            .device(self.serial)
            .ok_or(TransportError::DeviceNotFound(self.serial))
    }

    fn device_mut(&mut self) -> Result<&mut SimulatedDevice, TransportError> {
        self.transport
            .bench
            .device_mut(self.serial)
            .ok_or(TransportError::DeviceNotFound(self.serial))
    }

    fn is_analog(&self, position: u8) -> bool {
        let (fio, eio) = self.analog_mask;
        match position {
            1..=8 => fio & (1 << (position - 1)) != 0,
            9..=PORTS_PER_DEVICE => eio & (1 << (position - 9)) != 0,
            _ => false,
        }
    }
}

impl DeviceHandle for SimulatedHandle<'_> {
    fn serial(&self) -> u64 {
        self.serial
    }

    fn name(&mut self) -> Result<String, TransportError> {
        Ok(self.device()?.name.clone())
    }

    fn set_name(&mut self, name: &str) -> Result<(), TransportError> {
        self.device_mut()?.name = name.to_string();
        self.transport.persist()
    }

    fn set_indicator(&mut self, _on: bool) -> Result<(), TransportError> {
        self.device_mut()?.indicator_toggles += 1;
        Ok(())
    }

    fn set_dac(&mut self, dac: u8, volts: f64) -> Result<(), TransportError> {
        let slot = self
            .dacs
            .get_mut(usize::from(dac))
            .ok_or_else(|| TransportError::Fault(format!("no DAC{dac}")))?;
        *slot = volts;
        Ok(())
    }

    fn configure_analog(&mut self, positions: &[u8]) -> Result<(), TransportError> {
        self.analog_mask = analog_io_masks(positions)?;
        Ok(())
    }

    fn read_analog(&mut self, positions: &[u8]) -> Result<Vec<f64>, TransportError> {
        let serial = self.serial;
        self.transport.take_fault(serial)?;
        let powered = self.dacs[0] > 0.0;
        let mut volts = Vec::with_capacity(positions.len());
        for &position in positions {
            if !self.is_analog(position) {
                return Err(TransportError::ChannelNotConfigured(position));
            }
            let device = self.device()?;
            volts.push(if powered { device.volts_at(position) } else { 0.0 });
        }
        Ok(volts)
    }

    fn temperature_kelvin(&mut self) -> Result<f64, TransportError> {
        let serial = self.serial;
        self.transport.take_fault(serial)?;
        Ok(self.device()?.temperature_c + KELVIN_OFFSET)
    }
}
