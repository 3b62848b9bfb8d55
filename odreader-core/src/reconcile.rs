use crate::device::Device;
use crate::registry::{Discovery, Registry};
use log::{debug, info, warn};
use shared_state::{DeviceKey, ExperimentKey, SharedState};
use std::collections::BTreeSet;

/// What one reconciliation pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub connected: Vec<DeviceKey>,
    /// Devices added because discovery saw them for the first time.
    pub discovered: Vec<DeviceKey>,
    /// Devices no longer attached and not used by any live experiment.
    pub dropped_devices: Vec<DeviceKey>,
    /// Devices kept only because a live experiment still references them.
    pub adopted: Vec<DeviceKey>,
    /// Experiments found in the persisted state but not in memory.
    pub recovered: Vec<ExperimentKey>,
    /// In-memory experiments that are no longer persisted.
    pub dropped: Vec<ExperimentKey>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.discovered.is_empty()
            && self.dropped_devices.is_empty()
            && self.adopted.is_empty()
            && self.recovered.is_empty()
            && self.dropped.is_empty()
    }
}

/// Merges a fresh hardware enumeration and the persisted experiment list into
/// `registry`.
///
/// The persisted state decides which experiments are live; port claims are
/// rebuilt from those experiments on every pass, so running this twice with
/// the same inputs leaves the registry as the first run did.
pub fn reconcile(
    registry: &mut Registry,
    discovery: Discovery,
    persisted: &SharedState,
) -> ReconcileReport {
    let mut report = ReconcileReport {
        connected: discovery.connected.clone(),
        ..ReconcileReport::default()
    };

    let connected: BTreeSet<DeviceKey> = discovery.connected.iter().copied().collect();
    report.discovered = registry.apply_discovery(discovery, false);

    let referenced: BTreeSet<DeviceKey> = persisted
        .experiments
        .iter()
        .flat_map(|e| e.all_ports())
        .map(|p| p.device)
        .collect();
    report.dropped_devices = registry
        .retain_devices(|d| connected.contains(&d.key()) || referenced.contains(&d.key()));
    for key in &report.dropped_devices {
        info!("device {key} is no longer attached");
    }

    let live: BTreeSet<ExperimentKey> = persisted.experiments.iter().map(|e| e.key()).collect();
    for experiment in &persisted.experiments {
        if registry.insert_experiment(experiment.clone()) {
            debug!("recovered experiment {}", experiment.key());
            report.recovered.push(experiment.key());
        }
    }
    for key in registry.experiment_keys() {
        if !live.contains(&key) {
            registry.remove_experiment(&key);
            debug!("experiment {key} is no longer persisted");
            report.dropped.push(key);
        }
    }

    registry.clear_claims();
    let experiments: Vec<_> = registry.experiments().cloned().collect();
    for experiment in &experiments {
        for (port, usage) in experiment.port_usages() {
            if registry.device(port.device).is_none() {
                let name = experiment
                    .device_name(port.device)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Reader-{}", port.device));
                registry.insert_device(Device::new(name, port.device));
                if !report.adopted.contains(&port.device) {
                    report.adopted.push(port.device);
                }
            }
            if let Err(err) = registry.claim(port, &experiment.name, usage) {
                warn!("experiment {} references {port}: {err}", experiment.name);
            }
        }
    }
    for key in referenced.difference(&connected) {
        if registry.device(*key).is_some() && !report.adopted.contains(key) {
            report.adopted.push(*key);
        }
    }
    for key in &report.adopted {
        info!("device {key} is not attached but still used by a running experiment");
    }

    report
}
