use odreader_core::{Device, DeviceKey, Discovery, PortKey, Registry, RegistryError, Usage};

fn port(serial: u64, position: u8) -> PortKey {
    PortKey::new(DeviceKey(serial), position)
}

fn registry_with_reader() -> Registry {
    let mut registry = Registry::new();
    registry.insert_device(Device::new("Reader-A", DeviceKey(1001)));
    registry
}

#[test]
fn empty_registry_reports_no_ports() {
    let registry = Registry::new();
    assert!(registry.report_available_ports().is_empty());
    assert_eq!(registry.count_available_ports(), 0);
}

#[test]
fn new_device_has_sixteen_unused_ports() {
    let registry = registry_with_reader();
    let device = registry.device(DeviceKey(1001)).unwrap();
    assert_eq!(device.ports().len(), 16);
    let positions: Vec<u8> = device.ports().iter().map(|p| p.position()).collect();
    assert_eq!(positions, (1..=16).collect::<Vec<u8>>());
    assert!(device.ports().iter().all(|p| p.usage() == Usage::Unused));
    assert_eq!(registry.count_available_ports(), 16);
}

#[test]
fn test_claims_remove_ports_from_available() {
    let mut registry = registry_with_reader();
    for position in [1, 2, 3] {
        registry.claim(port(1001, position), "exp1", Usage::Test).unwrap();
    }

    for position in [1, 2, 3] {
        let claimed = registry.port(port(1001, position)).unwrap();
        assert_eq!(claimed.usage(), Usage::Test);
        assert_eq!(claimed.users(), ["exp1".to_string()]);
    }
    let available = registry.report_available_ports();
    assert_eq!(available.len(), 13);
    assert!(available.iter().all(|p| p.position() > 3));
}

#[test]
fn shared_reference_port_is_released_by_its_last_user() {
    let mut registry = registry_with_reader();
    registry.claim(port(1001, 5), "exp1", Usage::Reference).unwrap();
    registry.claim(port(1001, 5), "exp2", Usage::Reference).unwrap();

    let reference = registry.port(port(1001, 5)).unwrap();
    assert_eq!(reference.usage(), Usage::Reference);
    assert_eq!(reference.users(), ["exp1".to_string(), "exp2".to_string()]);
    assert_eq!(registry.report_reference_ports().len(), 1);

    registry.release("exp1");
    let reference = registry.port(port(1001, 5)).unwrap();
    assert_eq!(reference.usage(), Usage::Reference);
    assert_eq!(reference.users(), ["exp2".to_string()]);

    registry.release("exp2");
    let reference = registry.port(port(1001, 5)).unwrap();
    assert_eq!(reference.usage(), Usage::Unused);
    assert!(reference.users().is_empty());
    assert_eq!(registry.count_available_ports(), 16);
}

#[test]
fn release_of_unknown_name_changes_nothing() {
    let mut registry = registry_with_reader();
    registry.claim(port(1001, 1), "exp1", Usage::Test).unwrap();
    let before: Vec<_> = registry.ports().cloned().collect();

    registry.release("never-claimed");
    registry.release("never-claimed");

    let after: Vec<_> = registry.ports().cloned().collect();
    assert_eq!(before, after);
}

#[test]
fn claim_then_release_restores_previous_state() {
    let mut registry = registry_with_reader();
    registry.claim(port(1001, 5), "exp1", Usage::Reference).unwrap();
    let before: Vec<_> = registry.ports().cloned().collect();

    registry.claim(port(1001, 2), "exp2", Usage::Test).unwrap();
    registry.claim(port(1001, 5), "exp2", Usage::Reference).unwrap();
    registry.release("exp2");

    let after: Vec<_> = registry.ports().cloned().collect();
    assert_eq!(before, after);
}

#[test]
fn claiming_a_missing_port_fails() {
    let mut registry = registry_with_reader();
    assert_eq!(
        registry.claim(port(1001, 17), "exp1", Usage::Test),
        Err(RegistryError::UnknownPort(port(1001, 17)))
    );
    assert_eq!(
        registry.claim(port(2002, 1), "exp1", Usage::Test),
        Err(RegistryError::UnknownDevice(DeviceKey(2002)))
    );
    assert_eq!(
        registry.claim(port(1001, 1), "exp1", Usage::Unused),
        Err(RegistryError::InvalidClaim(port(1001, 1)))
    );
}

#[test]
fn claim_ports_is_all_or_nothing() {
    let mut registry = registry_with_reader();
    registry
        .claim_ports("exp1", &[port(1001, 3)], Some(port(1001, 16)))
        .unwrap();

    let err = registry
        .claim_ports("exp2", &[port(1001, 1), port(1001, 2), port(1001, 3)], None)
        .unwrap_err();
    assert!(matches!(err, RegistryError::PortInUse { port: p, .. } if p == port(1001, 3)));
    assert!(registry.port(port(1001, 1)).unwrap().is_available());
    assert!(registry.port(port(1001, 2)).unwrap().is_available());
}

#[test]
fn claim_ports_shares_references_but_not_test_ports() {
    let mut registry = registry_with_reader();
    registry
        .claim_ports("exp1", &[port(1001, 1)], Some(port(1001, 16)))
        .unwrap();
    registry
        .claim_ports("exp2", &[port(1001, 2)], Some(port(1001, 16)))
        .unwrap();
    assert_eq!(
        registry.port(port(1001, 16)).unwrap().users(),
        ["exp1".to_string(), "exp2".to_string()]
    );

    let err = registry
        .claim_ports("exp3", &[port(1001, 16)], None)
        .unwrap_err();
    assert!(matches!(err, RegistryError::PortInUse { usage: Usage::Reference, .. }));

    let err = registry
        .claim_ports("exp3", &[port(1001, 4)], Some(port(1001, 1)))
        .unwrap_err();
    assert!(matches!(err, RegistryError::PortInUse { usage: Usage::Test, .. }));
}

#[test]
fn claim_ports_rejects_malformed_requests() {
    let mut registry = registry_with_reader();
    assert_eq!(
        registry.claim_ports("exp1", &[], Some(port(1001, 16))),
        Err(RegistryError::NoTestPorts)
    );
    assert_eq!(
        registry.claim_ports("exp1", &[port(1001, 1)], Some(port(1001, 1))),
        Err(RegistryError::DuplicatePort(port(1001, 1)))
    );
    assert_eq!(
        registry.claim_ports("exp1", &[port(1001, 0)], None),
        Err(RegistryError::UnknownPort(port(1001, 0)))
    );
    assert_eq!(registry.count_available_ports(), 16);
}

#[test]
fn devices_are_identified_by_serial() {
    let mut registry = registry_with_reader();
    registry.claim(port(1001, 1), "exp1", Usage::Test).unwrap();

    assert!(!registry.insert_device(Device::new("Other name", DeviceKey(1001))));
    assert_eq!(registry.device_count(), 1);
    let device = registry.device(DeviceKey(1001)).unwrap();
    assert_eq!(device.name(), "Reader-A");
    assert_eq!(device.port(1).unwrap().usage(), Usage::Test);

    let a = Device::new("Reader-A", DeviceKey(7)).port(3).cloned().unwrap();
    let b = Device::new("Reader-B", DeviceKey(7)).port(3).cloned().unwrap();
    assert_eq!(a.key(), b.key());
}

#[test]
fn discovery_without_reset_keeps_known_devices() {
    let mut registry = registry_with_reader();
    registry.claim(port(1001, 1), "exp1", Usage::Test).unwrap();

    let added = registry.apply_discovery(
        Discovery::from_devices(vec![
            Device::new("Renamed", DeviceKey(1001)),
            Device::new("Reader-B", DeviceKey(1002)),
        ]),
        false,
    );
    assert_eq!(added, vec![DeviceKey(1002)]);
    assert_eq!(registry.device(DeviceKey(1001)).unwrap().name(), "Reader-A");
    assert_eq!(
        registry.port(port(1001, 1)).unwrap().usage(),
        Usage::Test
    );
    assert_eq!(registry.count_available_ports(), 31);
}

#[test]
fn discovery_with_reset_replaces_known_devices() {
    let mut registry = registry_with_reader();
    registry.claim(port(1001, 1), "exp1", Usage::Test).unwrap();

    registry.apply_discovery(
        Discovery::from_devices(vec![Device::new("Reader-B", DeviceKey(1002))]),
        true,
    );
    assert!(registry.device(DeviceKey(1001)).is_none());
    assert_eq!(registry.device_count(), 1);
    assert_eq!(registry.count_available_ports(), 16);
}
