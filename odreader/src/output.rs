use log::{LevelFilter, Log, Metadata, Record};
use odreader_core::{Experiment, Port, ReconcileReport, Registry, Usage};
use std::str::FromStr;

pub const LOG_ENV: &str = "ODREADER_LOG";

struct StderrLogger;

static LOGGER: StderrLogger = StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[ODReader][{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

/// `-v` flags win over the environment; warnings only by default.
pub fn init_logger(verbose: u8) {
    let level = match verbose {
        0 => std::env::var(LOG_ENV)
            .ok()
            .and_then(|value| LevelFilter::from_str(value.trim()).ok())
            .unwrap_or(LevelFilter::Warn),
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

pub fn print_info(message: &str) {
    println!("[ODReader][INFO] {message}");
}

pub fn print_error(message: &str) {
    eprintln!("[ODReader][ERROR]: {message}");
}

fn usage_label(usage: Usage) -> &'static str {
    match usage {
        Usage::Unused => "unused",
        Usage::Test => "test",
        Usage::Reference => "reference",
    }
}

fn port_json(registry: &Registry, port: &Port) -> serde_json::Value {
    let device = registry.device(port.device()).map(|d| d.name()).unwrap_or("");
    serde_json::json!({
        "serial": port.device().0,
        "device": device,
        "position": port.position(),
        "usage": port.usage().code(),
        "users": port.users(),
    })
}

pub fn print_device_list(registry: &Registry) {
    if registry.device_count() == 0 {
        print_info("No devices found");
        return;
    }
    print_info("Devices:");
    for device in registry.devices() {
        let free = device.ports().iter().filter(|p| p.is_available()).count();
        println!(
            "{} - {} ({free}/{} ports free)",
            device.key(),
            device.name(),
            device.ports().len()
        );
    }
}

pub fn print_port_list(registry: &Registry, ports: &[&Port], title: &str, json: bool) {
    if json {
        let value: Vec<serde_json::Value> =
            ports.iter().map(|port| port_json(registry, port)).collect();
        println!("{}", serde_json::Value::Array(value));
        return;
    }
    if ports.is_empty() {
        print_info(&format!("No {title}"));
        return;
    }
    print_info(&format!("{} {title}:", ports.len()));
    for port in ports {
        let device = registry.device(port.device()).map(|d| d.name()).unwrap_or("");
        if port.users().is_empty() {
            println!("{} ({device}) {}", port.key(), usage_label(port.usage()));
        } else {
            println!(
                "{} ({device}) {} [{}]",
                port.key(),
                usage_label(port.usage()),
                port.users().join(", ")
            );
        }
    }
}

fn ports_text(experiment: &Experiment) -> String {
    let mut text = experiment
        .test_ports
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    if let Some(reference) = experiment.reference_port {
        text.push_str(&format!(" ref {reference}"));
    }
    text
}

/// `running` pairs each experiment with whether its sampler is alive.
pub fn print_experiment_list(experiments: &[(&Experiment, bool)], json: bool) {
    if json {
        let value: Vec<serde_json::Value> = experiments
            .iter()
            .map(|(experiment, running)| {
                serde_json::json!({
                    "name": experiment.name,
                    "process_id": experiment.process_id,
                    "running": running,
                    "interval_minutes": experiment.interval_minutes,
                    "test_ports": experiment.test_ports.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    "reference_port": experiment.reference_port.map(|p| p.to_string()),
                    "output": experiment.output_path,
                })
            })
            .collect();
        println!("{}", serde_json::Value::Array(value));
        return;
    }
    if experiments.is_empty() {
        print_info("No running experiments");
        return;
    }
    print_info("Experiments:");
    for (experiment, running) in experiments {
        let pid = experiment
            .process_id
            .map(|pid| pid.to_string())
            .unwrap_or_else(|| "-".to_string());
        let status = if *running { "running" } else { "not running" };
        println!(
            "{} (pid {pid}, {status}) every {} min on {} -> {}",
            experiment.name,
            experiment.interval_minutes,
            ports_text(experiment),
            experiment.output_path.display()
        );
    }
}

pub fn print_reconcile_report(report: &ReconcileReport) {
    print_info(&format!("{} device(s) attached", report.connected.len()));
    for key in &report.recovered {
        println!("recovered {key}");
    }
    for key in &report.dropped {
        println!("dropped {key}");
    }
    for serial in &report.adopted {
        println!("device {serial} kept for a running experiment but not attached");
    }
    for serial in &report.dropped_devices {
        println!("device {serial} detached");
    }
}
