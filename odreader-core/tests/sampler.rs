use odreader_core::{
    CoreError, CycleOutcome, HeaderError, DeviceKey, DeviceSnapshot, Experiment, Hardware, HeaderColumn, KillSwitch,
    MeasurementSettings, OutputHeader, Sampler, SamplerSettings, SharedState, StateStore,
    StopReason, Usage,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use transport::{RetryPolicy, SimulatedBench, SimulatedTransport};

fn settings() -> SamplerSettings {
    SamplerSettings {
        measurement: MeasurementSettings {
            repetitions: 3,
            dac_voltages: vec![5.0, 2.6],
            repetition_spacing: Duration::ZERO,
        },
        failure_limit: 4,
        failure_backoff: Duration::ZERO,
    }
}

fn hardware(transport: SimulatedTransport) -> Hardware {
    Hardware::new(Box::new(transport), RetryPolicy::once(), RetryPolicy::once())
}

fn column(serial: u64, position: u8, usage: Usage) -> HeaderColumn {
    HeaderColumn {
        device_name: format!("Reader-{serial}"),
        serial: DeviceKey(serial),
        position,
        usage,
    }
}

/// Writes a header for `name` and, when `listed`, a state file naming it.
fn prepare(dir: &Path, name: &str, listed: bool) -> (PathBuf, PathBuf) {
    let output = dir.join(format!("{name}.tsv"));
    let header = OutputHeader {
        name: name.to_string(),
        interval_minutes: 0.5,
        columns: vec![
            column(1001, 1, Usage::Test),
            column(1002, 3, Usage::Test),
            column(1001, 16, Usage::Reference),
        ],
    };
    header.write_new(&output).unwrap();

    let state_path = dir.join("state.json");
    let mut state = SharedState::default();
    if listed {
        state.insert(Experiment {
            name: name.to_string(),
            interval_minutes: 0.5,
            test_ports: Vec::new(),
            reference_port: None,
            devices: vec![DeviceSnapshot {
                serial: DeviceKey(1001),
                name: "Reader-1001".to_string(),
            }],
            output_path: output.clone(),
            process_id: Some(1),
        });
    }
    StateStore::new(&state_path).update(|s| *s = state).unwrap();
    (output, state_path)
}

fn data_rows(output: &Path) -> Vec<Vec<String>> {
    std::fs::read_to_string(output)
        .unwrap()
        .lines()
        .filter(|l| !l.starts_with('#'))
        .map(|l| l.split('\t').map(str::to_string).collect())
        .collect()
}

fn annotations(output: &Path) -> Vec<String> {
    std::fs::read_to_string(output)
        .unwrap()
        .lines()
        .skip(OutputHeader::LINES)
        .filter(|l| l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[test]
fn cycle_appends_row_in_header_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (output, state) = prepare(dir.path(), "growth_A", true);
    let transport = SimulatedTransport::new(SimulatedBench::with_devices(2));
    let mut sampler = Sampler::new(&output, &state, hardware(transport), settings()).unwrap();
    assert_eq!(sampler.interval(), Duration::from_secs(30));

    sampler.write_start_time().unwrap();
    assert_eq!(sampler.run_cycle(), CycleOutcome::Recorded);

    let rows = data_rows(&output);
    assert_eq!(rows.len(), 1);
    let values: Vec<f64> = rows[0].iter().map(|v| v.parse().unwrap()).collect();
    assert_eq!(values.len(), 5);
    assert!(values[0] >= 0.0 && values[0] < 1.0);
    assert!((values[1] - 30.0).abs() < 1e-9);
    assert!((values[2] - 1.2).abs() < 1e-9);
    assert!((values[3] - 1.18).abs() < 1e-9);
    assert!((values[4] - 1.05).abs() < 1e-9);

    let notes = annotations(&output);
    assert_eq!(notes.len(), 1);
    assert!(notes[0].starts_with("#Start Time:\t"));
}

#[test]
fn missing_output_stops_silently() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (output, state) = prepare(dir.path(), "growth_A", true);
    let transport = SimulatedTransport::new(SimulatedBench::with_devices(2));
    let mut sampler = Sampler::new(&output, &state, hardware(transport), settings()).unwrap();

    std::fs::remove_file(&output).unwrap();
    assert_eq!(
        sampler.run_cycle(),
        CycleOutcome::Stop(StopReason::KillSwitch(KillSwitch::OutputMissing))
    );
    assert!(!output.exists());
}

#[test]
fn unlisted_run_annotates_and_stops() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (output, state) = prepare(dir.path(), "growth_A", false);
    let transport = SimulatedTransport::new(SimulatedBench::with_devices(2));
    let mut sampler = Sampler::new(&output, &state, hardware(transport), settings()).unwrap();

    assert_eq!(
        sampler.run_cycle(),
        CycleOutcome::Stop(StopReason::KillSwitch(KillSwitch::NotListed))
    );
    assert_eq!(
        annotations(&output),
        vec!["#Self terminating because run was not found in the state file.".to_string()]
    );
    assert!(data_rows(&output).is_empty());
}

#[test]
fn missing_or_corrupt_state_stops_the_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (output, state) = prepare(dir.path(), "growth_A", true);
    let transport = SimulatedTransport::new(SimulatedBench::with_devices(2));
    let mut sampler = Sampler::new(&output, &state, hardware(transport), settings()).unwrap();

    std::fs::write(&state, "{ not json").unwrap();
    assert!(matches!(
        sampler.check_kill_switch(),
        Some(KillSwitch::StateUnreadable(_))
    ));

    std::fs::remove_file(&state).unwrap();
    assert_eq!(
        sampler.run_cycle(),
        CycleOutcome::Stop(StopReason::KillSwitch(KillSwitch::StateMissing(
            state.clone()
        )))
    );
    let notes = annotations(&output);
    assert!(notes[0].starts_with("#Self terminating. State file does not exist"));
}

#[test]
fn repeated_failures_stop_the_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (output, state) = prepare(dir.path(), "growth_A", true);
    let mut transport = SimulatedTransport::new(SimulatedBench::with_devices(2));
    transport.inject_faults(100);
    let mut sampler = Sampler::new(&output, &state, hardware(transport), settings()).unwrap();

    for consecutive in 1..=3 {
        assert_eq!(sampler.run_cycle(), CycleOutcome::Failed { consecutive });
    }
    assert_eq!(
        sampler.run_cycle(),
        CycleOutcome::Stop(StopReason::TooManyFailures)
    );

    let notes = annotations(&output);
    assert_eq!(notes.len(), 5);
    assert_eq!(notes[4], "#Stopping timecourse due to failures");
    assert!(data_rows(&output).is_empty());
}

#[test]
fn a_success_resets_the_failure_count() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (output, state) = prepare(dir.path(), "growth_A", true);
    let mut transport = SimulatedTransport::new(SimulatedBench::with_devices(2));
    transport.inject_faults(3);
    let mut sampler = Sampler::new(&output, &state, hardware(transport), settings()).unwrap();

    for consecutive in 1..=3 {
        assert_eq!(sampler.run_cycle(), CycleOutcome::Failed { consecutive });
    }
    assert_eq!(sampler.run_cycle(), CycleOutcome::Recorded);
    assert_eq!(sampler.run_cycle(), CycleOutcome::Recorded);
    assert_eq!(data_rows(&output).len(), 2);
}

#[test]
fn run_exits_when_the_run_is_removed_from_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (output, state) = prepare(dir.path(), "growth_A", false);
    let transport = SimulatedTransport::new(SimulatedBench::with_devices(2));
    let mut sampler = Sampler::new(&output, &state, hardware(transport), settings()).unwrap();

    let reason = sampler.run().unwrap();
    assert_eq!(reason, StopReason::KillSwitch(KillSwitch::NotListed));
    let notes = annotations(&output);
    assert!(notes[0].starts_with("#Start Time:"));
}

#[test]
fn sampler_needs_a_valid_header() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = dir.path().join("broken.tsv");
    std::fs::write(&output, "#Info:\tbroken\t1\n").unwrap();
    let transport = SimulatedTransport::new(SimulatedBench::with_devices(1));
    assert!(Sampler::new(&output, dir.path().join("state.json"), hardware(transport), settings()).is_err());
}

#[test]
fn sampler_rejects_intervals_it_cannot_sleep_for() {
    let dir = tempfile::tempdir().expect("tempdir");
    for (name, interval) in [("huge", "1e300"), ("zero", "0"), ("never", "inf")] {
        let output = dir.path().join(format!("{name}.tsv"));
        std::fs::write(
            &output,
            format!(
                "#Info:\t{name}\t{interval}\n#Device Names:\tReader-A\n#Device IDs:\t1001\n#Ports:\t1\n#Usage:\t1\n"
            ),
        )
        .unwrap();
        let transport = SimulatedTransport::new(SimulatedBench::with_devices(1));
        let result = Sampler::new(&output, dir.path().join("state.json"), hardware(transport), settings());
        assert!(
            matches!(
                result,
                Err(CoreError::Header(HeaderError::InvalidValue { field: "interval", .. }))
            ),
            "interval {interval} was accepted"
        );
    }
}

#[test]
fn unwritable_output_still_counts_failures() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (output, state) = prepare(dir.path(), "growth_A", true);
    let mut transport = SimulatedTransport::new(SimulatedBench::with_devices(2));
    transport.inject_faults(100);
    let mut sampler = Sampler::new(&output, &state, hardware(transport), settings()).unwrap();

    std::fs::remove_file(&output).unwrap();
    std::fs::create_dir(&output).unwrap();

    for consecutive in 1..=3 {
        assert_eq!(sampler.run_cycle(), CycleOutcome::Failed { consecutive });
    }
    assert_eq!(
        sampler.run_cycle(),
        CycleOutcome::Stop(StopReason::TooManyFailures)
    );
    assert!(output.is_dir());
}
