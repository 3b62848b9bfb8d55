use crate::registry::Registry;
use shared_state::{DeviceKey, Experiment, Usage};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

const INFO: &str = "#Info:";
const DEVICE_NAMES: &str = "#Device Names:";
const DEVICE_IDS: &str = "#Device IDs:";
const PORTS: &str = "#Ports:";
const USAGE: &str = "#Usage:";

#[derive(thiserror::Error, Debug)]
pub enum HeaderError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("output file {0} already exists")]
    Exists(std::path::PathBuf),
    #[error("header has {0} lines, expected 5")]
    Truncated(usize),
    #[error("header line {line} should start with '{expected}'")]
    MissingLabel { line: usize, expected: &'static str },
    #[error("header columns disagree: {0}")]
    ColumnMismatch(String),
    #[error("invalid {field} '{value}' in header")]
    InvalidValue { field: &'static str, value: String },
    #[error("{field} {value:?} contains a tab or line break")]
    UnsafeField { field: &'static str, value: String },
}

/// True when `value` can sit in a tab-separated header field as is.
pub fn is_plain_field(value: &str) -> bool {
    !value.contains(['\t', '\r', '\n'])
}

/// The sampling period for an interval in minutes, if it is positive and
/// representable.
pub fn sampling_interval(minutes: f64) -> Option<Duration> {
    if !(minutes.is_finite() && minutes > 0.0) {
        return None;
    }
    Duration::try_from_secs_f64(minutes * 60.0).ok()
}

/// One measured port as described by the header.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderColumn {
    pub device_name: String,
    pub serial: DeviceKey,
    pub position: u8,
    pub usage: Usage,
}

/// The five tab-separated lines at the top of every output file.
///
/// The sampling process and downstream tooling read these positionally, so
/// the labels and their order never change.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputHeader {
    pub name: String,
    pub interval_minutes: f64,
    pub columns: Vec<HeaderColumn>,
}

impl OutputHeader {
    pub const LINES: usize = 5;

    /// Columns follow the experiment's test ports, then its reference port.
    /// Device names come from the registry, falling back to the snapshot.
    pub fn for_experiment(experiment: &Experiment, registry: &Registry) -> Self {
        let columns = experiment
            .port_usages()
            .map(|(port, usage)| {
                let device_name = registry
                    .device(port.device)
                    .map(|d| d.name().to_string())
                    .or_else(|| experiment.device_name(port.device).map(str::to_string))
                    .unwrap_or_default();
                HeaderColumn {
                    device_name,
                    serial: port.device,
                    position: port.position,
                    usage,
                }
            })
            .collect();
        Self {
            name: experiment.name.clone(),
            interval_minutes: experiment.interval_minutes,
            columns,
        }
    }

    pub fn render(&self) -> Result<String, HeaderError> {
        if !is_plain_field(&self.name) {
            return Err(HeaderError::UnsafeField {
                field: "experiment name",
                value: self.name.clone(),
            });
        }
        if let Some(column) = self.columns.iter().find(|c| !is_plain_field(&c.device_name)) {
            return Err(HeaderError::UnsafeField {
                field: "device name",
                value: column.device_name.clone(),
            });
        }

        fn line<I: IntoIterator<Item = String>>(label: &str, fields: I) -> String {
            let mut out = label.to_string();
            for field in fields {
                out.push('\t');
                out.push_str(&field);
            }
            out.push('\n');
            out
        }

        let mut out = line(
            INFO,
            [self.name.clone(), self.interval_minutes.to_string()],
        );
        out += &line(DEVICE_NAMES, self.columns.iter().map(|c| c.device_name.clone()));
        out += &line(DEVICE_IDS, self.columns.iter().map(|c| c.serial.to_string()));
        out += &line(PORTS, self.columns.iter().map(|c| c.position.to_string()));
        out += &line(USAGE, self.columns.iter().map(|c| c.usage.code().to_string()));
        Ok(out)
    }

    /// Creates `path` and writes the header; an existing file is left alone.
    pub fn write_new(&self, path: &Path) -> Result<(), HeaderError> {
        let text = self.render()?;
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(HeaderError::Exists(path.to_path_buf()));
            }
            Err(err) => return Err(err.into()),
        };
        file.write_all(text.as_bytes())?;
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Self, HeaderError> {
        Self::parse(&fs::read_to_string(path)?)
    }

    pub fn parse(text: &str) -> Result<Self, HeaderError> {
        let lines: Vec<&str> = text.lines().take(Self::LINES).collect();
        if lines.len() < Self::LINES {
            return Err(HeaderError::Truncated(lines.len()));
        }
        let info = labelled(&lines, 0, INFO)?;
        let (name, interval) = match info.as_slice() {
            [name, interval, ..] => (name.to_string(), *interval),
            _ => {
                return Err(HeaderError::ColumnMismatch(
                    "info line needs a name and an interval".into(),
                ))
            }
        };
        let interval_minutes = interval
            .trim()
            .parse::<f64>()
            .map_err(|_| HeaderError::InvalidValue {
                field: "interval",
                value: interval.to_string(),
            })?;

        let names = labelled(&lines, 1, DEVICE_NAMES)?;
        let ids = labelled(&lines, 2, DEVICE_IDS)?;
        let ports = labelled(&lines, 3, PORTS)?;
        let usages = labelled(&lines, 4, USAGE)?;
        if ids.len() != names.len() || ports.len() != names.len() || usages.len() != names.len() {
            return Err(HeaderError::ColumnMismatch(format!(
                "{} names, {} ids, {} ports, {} usages",
                names.len(),
                ids.len(),
                ports.len(),
                usages.len()
            )));
        }

        let mut columns = Vec::with_capacity(names.len());
        for idx in 0..names.len() {
            let serial = ids[idx].trim().parse::<u64>().map_err(|_| HeaderError::InvalidValue {
                field: "device id",
                value: ids[idx].to_string(),
            })?;
            let position = ports[idx].trim().parse::<u8>().map_err(|_| HeaderError::InvalidValue {
                field: "port",
                value: ports[idx].to_string(),
            })?;
            let usage = usages[idx]
                .trim()
                .parse::<u8>()
                .ok()
                .and_then(Usage::from_code)
                .ok_or_else(|| HeaderError::InvalidValue {
                    field: "usage",
                    value: usages[idx].to_string(),
                })?;
            columns.push(HeaderColumn {
                device_name: names[idx].to_string(),
                serial: DeviceKey(serial),
                position,
                usage,
            });
        }

        Ok(Self {
            name,
            interval_minutes,
            columns,
        })
    }

    /// Columns grouped by device in order of first appearance, each position
    /// paired with its column index.
    pub fn ports_by_device(&self) -> Vec<(DeviceKey, Vec<(usize, u8)>)> {
        let mut groups: Vec<(DeviceKey, Vec<(usize, u8)>)> = Vec::new();
        for (idx, column) in self.columns.iter().enumerate() {
            match groups.iter_mut().find(|(serial, _)| *serial == column.serial) {
                Some((_, ports)) => ports.push((idx, column.position)),
                None => groups.push((column.serial, vec![(idx, column.position)])),
            }
        }
        groups
    }
}

fn labelled<'a>(
    lines: &[&'a str],
    idx: usize,
    label: &'static str,
) -> Result<Vec<&'a str>, HeaderError> {
    let mut parts = lines[idx].trim_end_matches('\r').split('\t');
    if parts.next() != Some(label) {
        return Err(HeaderError::MissingLabel {
            line: idx + 1,
            expected: label,
        });
    }
    Ok(parts.collect())
}

/// Appends one tab-separated row. The file must already exist.
pub fn append_row(path: &Path, fields: &[String]) -> std::io::Result<()> {
    let mut file = OpenOptions::new().append(true).open(path)?;
    writeln!(file, "{}", fields.join("\t"))
}

/// Appends a `#` annotation line. The file must already exist.
pub fn append_annotation(path: &Path, text: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().append(true).open(path)?;
    writeln!(file, "#{text}")
}
