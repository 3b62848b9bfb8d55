use crate::config::ReaderConfig;
use crate::error::CoreError;
use crate::hardware::Hardware;
use crate::header::{is_plain_field, sampling_interval, HeaderError, OutputHeader};
use crate::reconcile::{reconcile, ReconcileReport};
use crate::registry::{Discovery, Registry, RegistryError};
use crate::supervisor::{OsSupervisor, ProcessSupervisor, SamplerCommand, Termination};
use log::{debug, info, warn};
use shared_state::{
    DeviceKey, Experiment, ExperimentKey, PortKey, SharedState, StateLock, StateStore,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use transport::TransportFactory;

/// An experiment as composed by the user, before anything is claimed.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentDraft {
    pub name: String,
    pub interval_minutes: f64,
    pub test_ports: Vec<PortKey>,
    pub reference_port: Option<PortKey>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    Completed(ExperimentKey),
    /// The sampler was already gone, usually because its kill switch fired.
    AlreadyStopped(ExperimentKey),
}

impl StopOutcome {
    pub fn key(&self) -> &ExperimentKey {
        match self {
            StopOutcome::Completed(key) | StopOutcome::AlreadyStopped(key) => key,
        }
    }

    pub fn message(&self) -> String {
        match self {
            StopOutcome::Completed(key) => format!("{} successfully completed.", key.name),
            StopOutcome::AlreadyStopped(key) => format!(
                "{}: can't find the sampler process, it must have already stopped",
                key.name
            ),
        }
    }
}

/// Letters, digits, `_`, `-` and spaces; the name becomes a file name.
pub fn validate_name(name: &str) -> Result<(), CoreError> {
    let valid = !name.trim().is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ' '));
    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidName(name.to_string()))
    }
}

/// The long-lived side: owns the registry and mutates the shared state.
///
/// Every write to the state file happens under the store's lock, and the
/// lock is taken at most once per operation.
pub struct Orchestrator {
    registry: Registry,
    store: StateStore,
    hardware: Hardware,
    supervisor: Box<dyn ProcessSupervisor>,
    sampler: SamplerCommand,
    output_dir: PathBuf,
}

impl Orchestrator {
    pub fn new(
        store: StateStore,
        hardware: Hardware,
        supervisor: Box<dyn ProcessSupervisor>,
        sampler: SamplerCommand,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry: Registry::new(),
            store,
            hardware,
            supervisor,
            sampler,
            output_dir: output_dir.into(),
        }
    }

    /// Wires the configured transport, real processes, and either the
    /// configured sampler program or the running executable.
    pub fn from_config(config: &ReaderConfig, config_path: Option<&Path>) -> Result<Self, CoreError> {
        let transport = TransportFactory::create(&config.transport_config())?;
        let hardware = Hardware::new(
            transport,
            config.discovery.policy(),
            config.hardware.policy(),
        );
        let program = match &config.sampler_program {
            Some(program) => program.clone(),
            None => std::env::current_exe()?,
        };
        let mut sampler = SamplerCommand::new(program);
        if let Some(path) = config_path {
            sampler = sampler.arg("--config").arg(absolute(path)?);
        }
        Ok(Self::new(
            StateStore::new(&config.state_path),
            hardware,
            Box::new(OsSupervisor),
            sampler,
            &config.output_dir,
        ))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn output_path_for(&self, name: &str) -> PathBuf {
        self.output_dir.join(format!("{name}.tsv"))
    }

    pub fn is_running(&self, experiment: &Experiment) -> bool {
        experiment
            .process_id
            .is_some_and(|pid| self.supervisor.is_alive(pid))
    }

    /// Enumerates hardware. With `reset` the known devices are rebuilt from
    /// scratch; their claims come back on the next [`Orchestrator::reconcile`].
    pub fn discover(&mut self, reset: bool) -> Result<Vec<DeviceKey>, CoreError> {
        let known = if reset {
            BTreeSet::new()
        } else {
            self.registry.device_keys()
        };
        let discovery = self.hardware.discover(&known)?;
        let connected = discovery.connected.clone();
        let added = self.registry.apply_discovery(discovery, reset);
        for key in &added {
            if let Some(device) = self.registry.device(*key) {
                info!("found device {key} ({})", device.name());
            }
        }
        Ok(connected)
    }

    /// Brings the registry in line with attached hardware and the state file.
    pub fn reconcile(&mut self) -> Result<ReconcileReport, CoreError> {
        let state = self.store.load_or_init()?;
        self.reconcile_with(&state)
    }

    fn reconcile_with(&mut self, state: &SharedState) -> Result<ReconcileReport, CoreError> {
        let discovery = self.hardware.discover(&self.registry.device_keys())?;
        Ok(self.merge(discovery, state))
    }

    /// Reconciles against `state` without touching the hardware.
    fn merge_persisted(&mut self, state: &SharedState) -> ReconcileReport {
        let discovery = Discovery {
            connected: self.registry.device_keys().into_iter().collect(),
            new_devices: Vec::new(),
        };
        self.merge(discovery, state)
    }

    fn merge(&mut self, discovery: Discovery, state: &SharedState) -> ReconcileReport {
        let report = reconcile(&mut self.registry, discovery, state);
        if !report.is_noop() {
            debug!("reconciled: {report:?}");
        }
        report
    }

    /// Claims ports, writes the output header, records the experiment and
    /// launches its sampler, all while holding the state lock.
    ///
    /// The experiment is persisted before the sampler starts so the sampler's
    /// first state check finds it. Any failure undoes the claims, the state
    /// entry and the output file.
    pub fn start_experiment(&mut self, draft: ExperimentDraft) -> Result<ExperimentKey, CoreError> {
        validate_name(&draft.name)?;
        if sampling_interval(draft.interval_minutes).is_none() {
            return Err(CoreError::InvalidInterval(draft.interval_minutes));
        }
        let output_path = absolute(&self.output_path_for(&draft.name))?;

        let lock = self.store.lock()?;
        let mut state = self.store.load_or_init_locked(&lock)?;
        self.reconcile_with(&state)?;
        if state.contains_name(&draft.name) || self.registry.experiment_by_name(&draft.name).is_some()
        {
            return Err(CoreError::NameInUse(draft.name));
        }
        if output_path.exists() {
            return Err(CoreError::OutputExists(output_path));
        }
        self.registry
            .claim_ports(&draft.name, &draft.test_ports, draft.reference_port)?;

        let name = draft.name.clone();
        let experiment = self.build_experiment(draft, output_path);
        match self.launch(&lock, &mut state, experiment) {
            Ok(key) => {
                drop(lock);
                self.merge_persisted(&state);
                info!("started {key}");
                Ok(key)
            }
            Err(err) => {
                self.registry.release(&name);
                Err(err)
            }
        }
    }

    fn build_experiment(&self, draft: ExperimentDraft, output_path: PathBuf) -> Experiment {
        let mut serials: Vec<DeviceKey> = Vec::new();
        for port in draft.test_ports.iter().chain(draft.reference_port.iter()) {
            if !serials.contains(&port.device) {
                serials.push(port.device);
            }
        }
        let devices = serials
            .into_iter()
            .filter_map(|serial| self.registry.device(serial).map(|d| d.snapshot()))
            .collect();
        Experiment {
            name: draft.name,
            interval_minutes: draft.interval_minutes,
            test_ports: draft.test_ports,
            reference_port: draft.reference_port,
            devices,
            output_path,
            process_id: None,
        }
    }

    fn launch(
        &mut self,
        lock: &StateLock,
        state: &mut SharedState,
        experiment: Experiment,
    ) -> Result<ExperimentKey, CoreError> {
        let header = OutputHeader::for_experiment(&experiment, &self.registry);
        header
            .write_new(&experiment.output_path)
            .map_err(|err| match err {
                HeaderError::Exists(path) => CoreError::OutputExists(path),
                other => other.into(),
            })?;

        let pending = experiment.key();
        let output_path = experiment.output_path.clone();
        state.insert(experiment);

        match self.persist_and_spawn(lock, state, &pending, &output_path) {
            Ok(pid) => Ok(ExperimentKey {
                name: pending.name,
                process_id: Some(pid),
            }),
            Err((err, pid)) => {
                if let Some(pid) = pid {
                    if let Err(kill_err) = self.supervisor.terminate(pid) {
                        warn!("could not stop sampler {pid} after failed start: {kill_err}");
                    }
                }
                state.remove(&ExperimentKey {
                    name: pending.name.clone(),
                    process_id: pid,
                });
                if let Err(save_err) = self.store.save(lock, state) {
                    warn!("could not roll back state for {}: {save_err}", pending.name);
                }
                if let Err(rm_err) = std::fs::remove_file(&output_path) {
                    warn!("could not remove {}: {rm_err}", output_path.display());
                }
                Err(err)
            }
        }
    }

    /// On failure also returns the pid of a sampler that was already running.
    fn persist_and_spawn(
        &mut self,
        lock: &StateLock,
        state: &mut SharedState,
        pending: &ExperimentKey,
        output_path: &Path,
    ) -> Result<u32, (CoreError, Option<u32>)> {
        self.store
            .save(lock, state)
            .map_err(|err| (CoreError::from(err), None))?;
        let state_path = absolute(self.store.path()).map_err(|err| (CoreError::from(err), None))?;
        let command = self.sampler.for_experiment(output_path, &state_path);
        let pid = self
            .supervisor
            .spawn(&command)
            .map_err(|err| (CoreError::Spawn(err), None))?;
        state.set_process_id(pending, pid);
        self.store
            .save(lock, state)
            .map_err(|err| (CoreError::from(err), Some(pid)))?;
        Ok(pid)
    }

    /// Releases the experiment's ports, removes it from the state file and
    /// signals its sampler.
    pub fn stop_experiment(&mut self, key: &ExperimentKey) -> Result<StopOutcome, CoreError> {
        self.registry.release(&key.name);
        let (state, removed) = self.store.update(|state| state.remove(key))?;
        if removed.is_none() {
            debug!("{key} was not in the state file");
        }
        self.merge_persisted(&state);

        let outcome = match key.process_id {
            None => StopOutcome::AlreadyStopped(key.clone()),
            Some(pid) => match self.supervisor.terminate(pid) {
                Ok(Termination::Terminated) => StopOutcome::Completed(key.clone()),
                Ok(Termination::NotFound) => StopOutcome::AlreadyStopped(key.clone()),
                Err(source) => return Err(CoreError::Terminate { pid, source }),
            },
        };
        info!("{}", outcome.message());
        Ok(outcome)
    }

    pub fn stop_by_name(&mut self, name: &str) -> Result<StopOutcome, CoreError> {
        if self.registry.experiment_by_name(name).is_none() {
            let state = self.store.load_or_init()?;
            self.merge_persisted(&state);
        }
        let key = self
            .registry
            .experiment_by_name(name)
            .map(Experiment::key)
            .ok_or_else(|| CoreError::UnknownExperiment(name.to_string()))?;
        self.stop_experiment(&key)
    }

    /// Stops every live experiment whose output file has been removed.
    pub fn stop_orphaned(&mut self) -> Result<Vec<StopOutcome>, CoreError> {
        let state = self.store.load_or_init()?;
        self.merge_persisted(&state);
        let orphaned: Vec<ExperimentKey> = self
            .registry
            .experiments()
            .filter(|e| !e.output_path.exists())
            .map(Experiment::key)
            .collect();
        orphaned
            .iter()
            .map(|key| self.stop_experiment(key))
            .collect()
    }

    fn ensure_known(&mut self, serial: DeviceKey) -> Result<(), CoreError> {
        if self.registry.device(serial).is_none() {
            self.discover(false)?;
        }
        if self.registry.device(serial).is_none() {
            return Err(RegistryError::UnknownDevice(serial).into());
        }
        Ok(())
    }

    pub fn rename_device(&mut self, serial: DeviceKey, name: &str) -> Result<(), CoreError> {
        if !is_plain_field(name) {
            return Err(CoreError::InvalidDeviceName(name.to_string()));
        }
        self.ensure_known(serial)?;
        self.hardware.rename(serial, name)?;
        if let Some(device) = self.registry.device_mut(serial) {
            device.set_name(name);
        }
        Ok(())
    }

    pub fn identify_device(&mut self, serial: DeviceKey) -> Result<(), CoreError> {
        self.ensure_known(serial)?;
        self.hardware.identify(serial)?;
        Ok(())
    }
}

fn absolute(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
