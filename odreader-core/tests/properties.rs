use odreader_core::{
    reconcile, Device, DeviceKey, Discovery, Experiment, PortKey, Registry, SharedState, Usage,
};
use proptest::prelude::*;
use std::path::PathBuf;

const NAMES: [&str; 4] = ["exp0", "exp1", "exp2", "exp3"];

#[derive(Debug, Clone)]
enum Op {
    Claim { port: PortKey, user: usize, usage: Usage },
    ClaimPorts { tests: Vec<PortKey>, reference: Option<PortKey>, user: usize },
    Release { user: usize },
}

fn arb_port() -> impl Strategy<Value = PortKey> {
    (1001u64..=1002, 1u8..=16).prop_map(|(serial, position)| PortKey::new(DeviceKey(serial), position))
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (arb_port(), 0..NAMES.len(), prop_oneof![Just(Usage::Test), Just(Usage::Reference)])
            .prop_map(|(port, user, usage)| Op::Claim { port, user, usage }),
        (
            proptest::collection::vec(arb_port(), 0..4),
            proptest::option::of(arb_port()),
            0..NAMES.len()
        )
            .prop_map(|(tests, reference, user)| Op::ClaimPorts { tests, reference, user }),
        (0..NAMES.len()).prop_map(|user| Op::Release { user }),
    ]
}

fn registry() -> Registry {
    let mut registry = Registry::new();
    registry.insert_device(Device::new("Reader-A", DeviceKey(1001)));
    registry.insert_device(Device::new("Reader-B", DeviceKey(1002)));
    registry
}

fn apply(registry: &mut Registry, op: &Op) {
    match op {
        Op::Claim { port, user, usage } => {
            registry.claim(*port, NAMES[*user], *usage).unwrap();
        }
        Op::ClaimPorts { tests, reference, user } => {
            let before: Vec<_> = registry.ports().cloned().collect();
            if registry.claim_ports(NAMES[*user], tests, *reference).is_err() {
                let after: Vec<_> = registry.ports().cloned().collect();
                assert_eq!(before, after, "failed claim_ports changed the registry");
            }
        }
        Op::Release { user } => registry.release(NAMES[*user]),
    }
}

fn arb_state() -> impl Strategy<Value = SharedState> {
    proptest::collection::vec(
        (proptest::collection::vec(arb_port(), 1..3), proptest::option::of(arb_port()), 1u32..50),
        0..4,
    )
    .prop_map(|entries| {
        let mut state = SharedState::default();
        for (idx, (tests, reference, pid)) in entries.into_iter().enumerate() {
            state.insert(Experiment {
                name: format!("exp{idx}"),
                interval_minutes: 1.0,
                test_ports: tests,
                reference_port: reference,
                devices: Vec::new(),
                output_path: PathBuf::from(format!("exp{idx}.tsv")),
                process_id: Some(pid),
            });
        }
        state
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: a port is unused exactly when nobody holds it
    #[test]
    fn prop_usage_matches_users(ops in proptest::collection::vec(arb_op(), 0..40)) {
        let mut registry = registry();
        for op in &ops {
            apply(&mut registry, op);
            for port in registry.ports() {
                prop_assert_eq!(port.usage() == Usage::Unused, port.users().is_empty());
            }
        }
    }

    /// Property: releasing every name frees every port
    #[test]
    fn prop_release_all_restores_registry(ops in proptest::collection::vec(arb_op(), 0..40)) {
        let mut registry = registry();
        for op in &ops {
            apply(&mut registry, op);
        }
        for name in NAMES {
            registry.release(name);
        }
        prop_assert_eq!(registry.count_available_ports(), 32);
    }

    /// Property: reconciling twice equals reconciling once
    #[test]
    fn prop_reconcile_is_idempotent(state in arb_state(), attached in proptest::collection::vec(1001u64..=1003, 0..3)) {
        let discovery = || Discovery::from_devices(
            attached.iter().map(|s| Device::new(format!("Reader-{s}"), DeviceKey(*s))).collect(),
        );
        let mut registry = Registry::new();
        reconcile(&mut registry, discovery(), &state);
        let once: Vec<_> = registry.ports().cloned().collect();
        let once_keys = registry.experiment_keys();

        reconcile(&mut registry, discovery(), &state);
        let twice: Vec<_> = registry.ports().cloned().collect();
        prop_assert_eq!(once, twice);
        prop_assert_eq!(once_keys, registry.experiment_keys());
    }
}
