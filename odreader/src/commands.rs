use clap::{ArgAction, Parser, Subcommand};
use odreader_core::PortKey;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "odreader", version, about = "Multi-tube OD reader coordinator")]
pub struct Cli {
    /// TOML settings file; defaults apply when absent
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Log more (-v info, -vv debug); ODREADER_LOG sets the level otherwise
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    Devices {
        #[command(subcommand)]
        command: DeviceCommands,
    },
    Ports {
        #[command(subcommand)]
        command: PortCommands,
    },
    Experiment {
        #[command(subcommand)]
        command: ExperimentCommands,
    },
    /// Merge attached hardware and the state file
    Reconcile,
    Bench {
        #[command(subcommand)]
        command: BenchCommands,
    },
    /// Sampling loop for one experiment (started by `experiment start`)
    Sample { output: PathBuf, state: PathBuf },
}

#[derive(Subcommand)]
pub enum DeviceCommands {
    List {
        /// Forget known devices and enumerate from scratch
        #[arg(long)]
        reset: bool,
    },
    Rename {
        serial: u64,
        name: String,
    },
    /// Blink the reader's indicator
    Identify {
        serial: u64,
    },
}

#[derive(Subcommand)]
pub enum PortCommands {
    Available {
        #[arg(long, alias = "jq")]
        json: bool,
    },
    Reference {
        #[arg(long, alias = "jq")]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum ExperimentCommands {
    Start {
        name: String,
        /// Minutes between samples
        #[arg(long)]
        interval: f64,
        /// Test ports as serial:position, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        ports: Vec<PortKey>,
        #[arg(long)]
        reference: Option<PortKey>,
    },
    Stop {
        name: String,
    },
    List {
        #[arg(long, alias = "jq")]
        json: bool,
    },
    /// Stop experiments whose output file was removed
    Cleanup,
}

#[derive(Subcommand)]
pub enum BenchCommands {
    /// Write a simulated bench file
    Init {
        #[arg(long, default_value_t = 2)]
        devices: usize,
        #[arg(long)]
        force: bool,
    },
}
