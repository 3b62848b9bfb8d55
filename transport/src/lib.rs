use std::path::PathBuf;

pub mod retry;
pub mod simulated;

pub use retry::{RetryError, RetryPolicy};
pub use simulated::{SimulatedBench, SimulatedDevice, SimulatedTransport};

/// Analog inputs on one reader; position `n` is wired to channel `n - 1`.
pub const PORTS_PER_DEVICE: u8 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Simulated,
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub kind: TransportKind,
    pub bench_path: PathBuf,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Simulated,
            bench_path: PathBuf::from("odreader_bench.json"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("device {0} not found")]
    DeviceNotFound(u64),
    #[error("device {0} is busy")]
    Busy(u64),
    #[error("analog input at position {0} is not configured")]
    ChannelNotConfigured(u8),
    #[error("invalid port position {0}")]
    InvalidPosition(u8),
    #[error("transport fault: {0}")]
    Fault(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One open connection to one physical device. Dropping the handle closes it.
pub trait DeviceHandle {
    fn serial(&self) -> u64;
    fn name(&mut self) -> Result<String, TransportError>;
    fn set_name(&mut self, name: &str) -> Result<(), TransportError>;
    fn set_indicator(&mut self, on: bool) -> Result<(), TransportError>;
    fn set_dac(&mut self, dac: u8, volts: f64) -> Result<(), TransportError>;
    fn configure_analog(&mut self, positions: &[u8]) -> Result<(), TransportError>;
    fn read_analog(&mut self, positions: &[u8]) -> Result<Vec<f64>, TransportError>;
    fn temperature_kelvin(&mut self) -> Result<f64, TransportError>;
}

/// Enumerates attached readers and opens them one at a time.
///
/// `open` borrows the transport mutably, so at most one handle exists per
/// transport: the hardware only tolerates one open connection.
pub trait DeviceTransport: Send {
    fn list_serials(&mut self) -> Result<Vec<u64>, TransportError>;
    fn open(&mut self, serial: u64) -> Result<Box<dyn DeviceHandle + '_>, TransportError>;
}

/// FIO/EIO analog-enable masks for a set of 1-based port positions.
pub fn analog_io_masks(positions: &[u8]) -> Result<(u8, u8), TransportError> {
    let mut fio = 0u8;
    let mut eio = 0u8;
    for &position in positions {
        match position {
            1..=8 => fio |= 1 << (position - 1),
            9..=PORTS_PER_DEVICE => eio |= 1 << (position - 9),
            _ => return Err(TransportError::InvalidPosition(position)),
        }
    }
    Ok((fio, eio))
}

pub struct TransportFactory;

impl TransportFactory {
    pub fn create(config: &TransportConfig) -> Result<Box<dyn DeviceTransport>, TransportError> {
        match config.kind {
            TransportKind::Simulated => {
                let transport = SimulatedTransport::open_bench(&config.bench_path)?;
                Ok(Box::new(transport))
            }
        }
    }
}
