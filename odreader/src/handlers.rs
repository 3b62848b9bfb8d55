use crate::commands::{
    BenchCommands, Cli, Commands, DeviceCommands, ExperimentCommands, PortCommands,
};
use crate::output::{
    print_device_list, print_experiment_list, print_info, print_port_list,
    print_reconcile_report,
};
use odreader_core::{
    DeviceKey, ExperimentDraft, Hardware, Orchestrator, ReaderConfig, Sampler,
};
use std::error::Error;
use std::path::Path;
use transport::{SimulatedBench, TransportFactory};

pub fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config_path = cli.config.as_deref();
    let config = ReaderConfig::load_or_default(config_path)?;
    match cli.command {
        Commands::Devices { command } => handle_device_command(&config, config_path, command),
        Commands::Ports { command } => handle_port_command(&config, config_path, command),
        Commands::Experiment { command } => {
            handle_experiment_command(&config, config_path, command)
        }
        Commands::Reconcile => {
            let mut orchestrator = Orchestrator::from_config(&config, config_path)?;
            let report = orchestrator.reconcile()?;
            print_reconcile_report(&report);
            Ok(())
        }
        Commands::Bench { command } => handle_bench_command(&config, command),
        Commands::Sample { output, state } => run_sampler(&config, &output, &state),
    }
}

fn handle_device_command(
    config: &ReaderConfig,
    config_path: Option<&Path>,
    command: DeviceCommands,
) -> Result<(), Box<dyn Error>> {
    let mut orchestrator = Orchestrator::from_config(config, config_path)?;
    match command {
        DeviceCommands::List { reset } => {
            if reset {
                orchestrator.discover(true)?;
            }
            orchestrator.reconcile()?;
            print_device_list(orchestrator.registry());
        }
        DeviceCommands::Rename { serial, name } => {
            orchestrator.reconcile()?;
            orchestrator.rename_device(DeviceKey(serial), &name)?;
            print_info(&format!("Device {serial} renamed to '{name}'"));
        }
        DeviceCommands::Identify { serial } => {
            orchestrator.identify_device(DeviceKey(serial))?;
            print_info(&format!("Device {serial} identified"));
        }
    }
    Ok(())
}

fn handle_port_command(
    config: &ReaderConfig,
    config_path: Option<&Path>,
    command: PortCommands,
) -> Result<(), Box<dyn Error>> {
    let mut orchestrator = Orchestrator::from_config(config, config_path)?;
    orchestrator.reconcile()?;
    let registry = orchestrator.registry();
    match command {
        PortCommands::Available { json } => {
            let ports = registry.report_available_ports();
            print_port_list(registry, &ports, "available ports", json);
        }
        PortCommands::Reference { json } => {
            let ports = registry.report_reference_ports();
            print_port_list(registry, &ports, "reference ports", json);
        }
    }
    Ok(())
}

fn handle_experiment_command(
    config: &ReaderConfig,
    config_path: Option<&Path>,
    command: ExperimentCommands,
) -> Result<(), Box<dyn Error>> {
    let mut orchestrator = Orchestrator::from_config(config, config_path)?;
    match command {
        ExperimentCommands::Start {
            name,
            interval,
            ports,
            reference,
        } => {
            let key = orchestrator.start_experiment(ExperimentDraft {
                name,
                interval_minutes: interval,
                test_ports: ports,
                reference_port: reference,
            })?;
            let output = orchestrator.output_path_for(&key.name);
            print_info(&format!("Started {key}, writing to {}", output.display()));
        }
        ExperimentCommands::Stop { name } => {
            let outcome = orchestrator.stop_by_name(&name)?;
            print_info(&outcome.message());
        }
        ExperimentCommands::List { json } => {
            orchestrator.reconcile()?;
            let experiments: Vec<_> = orchestrator
                .registry()
                .experiments()
                .map(|experiment| (experiment, orchestrator.is_running(experiment)))
                .collect();
            print_experiment_list(&experiments, json);
        }
        ExperimentCommands::Cleanup => {
            let outcomes = orchestrator.stop_orphaned()?;
            if outcomes.is_empty() {
                print_info("No orphaned experiments");
            }
            for outcome in outcomes {
                print_info(&outcome.message());
            }
        }
    }
    Ok(())
}

fn handle_bench_command(config: &ReaderConfig, command: BenchCommands) -> Result<(), Box<dyn Error>> {
    match command {
        BenchCommands::Init { devices, force } => {
            if config.bench_path.exists() && !force {
                return Err(format!(
                    "{} already exists, use --force to overwrite",
                    config.bench_path.display()
                )
                .into());
            }
            SimulatedBench::with_devices(devices).save_to_file(&config.bench_path)?;
            print_info(&format!(
                "Wrote {devices} simulated device(s) to {}",
                config.bench_path.display()
            ));
        }
    }
    Ok(())
}

fn run_sampler(config: &ReaderConfig, output: &Path, state: &Path) -> Result<(), Box<dyn Error>> {
    let transport = TransportFactory::create(&config.transport_config())?;
    let hardware = Hardware::new(transport, config.discovery.policy(), config.hardware.policy());
    let mut sampler = Sampler::new(output, state, hardware, config.sampler_settings())?;
    sampler.run()?;
    Ok(())
}
