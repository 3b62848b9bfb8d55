use crate::error::CoreError;
use crate::hardware::{Hardware, HardwareError, MeasurementSettings};
use crate::header::{append_annotation, append_row, sampling_interval, HeaderError, OutputHeader};
use log::{info, warn};
use shared_state::{DeviceKey, StateError, StateStore};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub struct SamplerSettings {
    pub measurement: MeasurementSettings,
    /// Consecutive failed cycles tolerated before giving up.
    pub failure_limit: u32,
    pub failure_backoff: Duration,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            measurement: MeasurementSettings::default(),
            failure_limit: 4,
            failure_backoff: Duration::from_millis(2300),
        }
    }
}

/// Why the sampler should stop before its next measurement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KillSwitch {
    OutputMissing,
    StateMissing(PathBuf),
    StateUnreadable(String),
    NotListed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    KillSwitch(KillSwitch),
    TooManyFailures,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Recorded,
    Failed { consecutive: u32 },
    Stop(StopReason),
}

/// The per-experiment sampling loop run in its own process.
///
/// It never touches port claims; it only reads the state file to decide
/// whether to keep going and appends to its own output file.
pub struct Sampler {
    output_path: PathBuf,
    store: StateStore,
    hardware: Hardware,
    header: OutputHeader,
    groups: Vec<(DeviceKey, Vec<(usize, u8)>)>,
    interval: Duration,
    settings: SamplerSettings,
    started: Instant,
    consecutive_failures: u32,
}

impl Sampler {
    pub fn new(
        output_path: impl Into<PathBuf>,
        state_path: impl Into<PathBuf>,
        hardware: Hardware,
        settings: SamplerSettings,
    ) -> Result<Self, CoreError> {
        let output_path = output_path.into();
        let header = OutputHeader::read_from(&output_path)?;
        let interval =
            sampling_interval(header.interval_minutes).ok_or_else(|| HeaderError::InvalidValue {
                field: "interval",
                value: header.interval_minutes.to_string(),
            })?;
        let groups = header.ports_by_device();
        Ok(Self {
            output_path,
            store: StateStore::new(state_path),
            hardware,
            header,
            groups,
            interval,
            settings,
            started: Instant::now(),
            consecutive_failures: 0,
        })
    }

    pub fn header(&self) -> &OutputHeader {
        &self.header
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn write_start_time(&mut self) -> std::io::Result<()> {
        self.started = Instant::now();
        let now = chrono::Local::now().format("%a %b %e %H:%M:%S %Y");
        append_row(
            &self.output_path,
            &["#Start Time:".to_string(), now.to_string()],
        )
    }

    /// Lock-free checks of the output file and the shared state.
    pub fn check_kill_switch(&self) -> Option<KillSwitch> {
        if !self.output_path.exists() {
            return Some(KillSwitch::OutputMissing);
        }
        let state = match self.store.load() {
            Ok(state) => state,
            Err(StateError::Missing(path)) => return Some(KillSwitch::StateMissing(path)),
            Err(err) => return Some(KillSwitch::StateUnreadable(err.to_string())),
        };
        let stem = self
            .output_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(self.header.name.as_str());
        if state.contains_name(stem) {
            None
        } else {
            Some(KillSwitch::NotListed)
        }
    }

    fn annotate_kill_switch(&self, reason: &KillSwitch) {
        let lines = match reason {
            KillSwitch::OutputMissing => return,
            KillSwitch::StateMissing(path) => vec![format!(
                "Self terminating. State file does not exist at {}.",
                path.display()
            )],
            KillSwitch::StateUnreadable(err) => vec![
                format!("Self terminating. Could not load {}", self.store.path().display()),
                err.clone(),
            ],
            KillSwitch::NotListed => {
                vec!["Self terminating because run was not found in the state file.".to_string()]
            }
        };
        for line in lines {
            self.annotate(&line);
        }
    }

    fn annotate(&self, line: &str) {
        if let Err(err) = append_annotation(&self.output_path, line) {
            warn!("could not annotate {}: {err}", self.output_path.display());
        }
    }

    /// Elapsed minutes, mean temperature in °C, then one averaged voltage per
    /// header column in header order.
    pub fn measure_row(&mut self) -> Result<Vec<f64>, HardwareError> {
        let mut volts = vec![0.0; self.header.columns.len()];
        let mut temperatures = Vec::with_capacity(self.groups.len());
        for (serial, ports) in &self.groups {
            let positions: Vec<u8> = ports.iter().map(|(_, position)| *position).collect();
            let readings =
                self.hardware
                    .measure_voltages(*serial, &positions, &self.settings.measurement)?;
            for ((column, _), value) in ports.iter().zip(readings) {
                volts[*column] = value;
            }
            temperatures.push(self.hardware.temperature_celsius(*serial)?);
        }
        let elapsed = self.started.elapsed().as_secs_f64() / 60.0;
        let temperature = if temperatures.is_empty() {
            0.0
        } else {
            temperatures.iter().sum::<f64>() / temperatures.len() as f64
        };
        let mut row = Vec::with_capacity(volts.len() + 2);
        row.push(elapsed);
        row.push(temperature);
        row.extend(volts);
        Ok(row)
    }

    pub fn run_cycle(&mut self) -> CycleOutcome {
        if let Some(reason) = self.check_kill_switch() {
            self.annotate_kill_switch(&reason);
            return CycleOutcome::Stop(StopReason::KillSwitch(reason));
        }

        let result = self.measure_row();
        match result {
            Ok(row) => {
                self.consecutive_failures = 0;
                let fields: Vec<String> = row.iter().map(f64::to_string).collect();
                match append_row(&self.output_path, &fields) {
                    Ok(()) => CycleOutcome::Recorded,
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                        CycleOutcome::Stop(StopReason::KillSwitch(KillSwitch::OutputMissing))
                    }
                    Err(err) => self.record_failure(&err.to_string()),
                }
            }
            Err(err) => self.record_failure(&err.to_string()),
        }
    }

    fn record_failure(&mut self, message: &str) -> CycleOutcome {
        self.consecutive_failures += 1;
        warn!(
            "{}: measurement failed ({}/{}): {message}",
            self.header.name, self.consecutive_failures, self.settings.failure_limit
        );
        self.annotate(message);
        if self.consecutive_failures >= self.settings.failure_limit {
            self.annotate("Stopping timecourse due to failures");
            return CycleOutcome::Stop(StopReason::TooManyFailures);
        }
        CycleOutcome::Failed {
            consecutive: self.consecutive_failures,
        }
    }

    /// Time left until the next interval boundary measured from the start.
    fn until_next_sample(&self) -> Duration {
        let elapsed = self.started.elapsed().as_secs_f64();
        let interval_secs = self.interval.as_secs_f64();
        Duration::try_from_secs_f64(interval_secs - elapsed % interval_secs).unwrap_or(self.interval)
    }

    /// Samples until a kill switch fires or failures pile up.
    pub fn run(&mut self) -> Result<StopReason, CoreError> {
        self.write_start_time()?;
        info!(
            "sampling {} every {} min into {}",
            self.header.name,
            self.header.interval_minutes,
            self.output_path.display()
        );
        loop {
            match self.run_cycle() {
                CycleOutcome::Recorded => std::thread::sleep(self.until_next_sample()),
                CycleOutcome::Failed { .. } => std::thread::sleep(self.settings.failure_backoff),
                CycleOutcome::Stop(reason) => {
                    info!("{} stopped: {reason:?}", self.header.name);
                    return Ok(reason);
                }
            }
        }
    }
}
