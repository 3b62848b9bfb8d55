pub mod config;
pub mod device;
pub mod error;
pub mod hardware;
pub mod header;
pub mod orchestrator;
pub mod port;
pub mod reconcile;
pub mod registry;
pub mod sampler;
pub mod supervisor;

pub use config::{ConfigError, ReaderConfig};
pub use device::Device;
pub use error::CoreError;
pub use hardware::{Hardware, HardwareError, IdentifyPattern, MeasurementSettings};
pub use header::{is_plain_field, sampling_interval, HeaderColumn, HeaderError, OutputHeader};
pub use orchestrator::{ExperimentDraft, Orchestrator, StopOutcome};
pub use port::Port;
pub use reconcile::{reconcile, ReconcileReport};
pub use registry::{Discovery, Registry, RegistryError};
pub use sampler::{CycleOutcome, KillSwitch, Sampler, SamplerSettings, StopReason};
pub use supervisor::{OsSupervisor, ProcessSupervisor, SamplerCommand, Termination};

pub use shared_state::{
    DeviceKey, DeviceSnapshot, Experiment, ExperimentKey, PortKey, SharedState, StateError,
    StateStore, Usage,
};
