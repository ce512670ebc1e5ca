use fleetops_core::{Cluster, FleetError, Inventory};
use fleetops_devkit::{HostEntry, InventoryBuilder, TestHarness};
use std::io::ErrorKind;
use std::path::PathBuf;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

#[test]
fn test_inventory_load() {
    let inv = Inventory::load(fixture("full_inventory.yml")).unwrap();
    assert_eq!(inv.len(), 3);
    for id in ["postgres", "rabbit", "web"] {
        assert!(inv.get(id).is_some(), "{id} missing");
    }
    assert_eq!(inv.get("web").unwrap().address(), "192.168.100.5");
    assert_eq!(inv.ssh_target("web").unwrap().port, 2222);
    assert_eq!(inv.ssh_target("rabbit").unwrap().user, "deploy");
}

#[test]
fn test_nonexistent_file() {
    let harness = TestHarness::new().unwrap();
    match Inventory::load(harness.missing_path()) {
        Err(FleetError::Io(e)) => assert_eq!(e.kind(), ErrorKind::NotFound),
        other => panic!("expected a not-found error, got {other:?}"),
    }
}

#[test]
fn test_empty_inventory() {
    let err = Inventory::load(fixture("empty_inventory.yml")).unwrap_err();
    assert!(matches!(err, FleetError::MissingHosts));
    assert!(err.is_config());
}

#[test]
fn test_empty_hosts() {
    let err = Cluster::load(fixture("empty_hosts.yml")).err().unwrap();
    assert!(matches!(err, FleetError::EmptyHosts));
}

#[test]
fn test_n_hosts_give_n_keys() {
    let harness = TestHarness::new().unwrap();
    let mut builder = InventoryBuilder::new();
    for i in 0..12 {
        builder = builder.host(HostEntry::new(format!("node-{i:02}")).ip(&format!("10.0.0.{i}")));
    }
    let path = harness.write_fixture("many.yml", &builder).unwrap();

    let inv = Inventory::load(path).unwrap();
    assert_eq!(inv.len(), 12);
    assert_eq!(inv.get("node-07").unwrap().address(), "10.0.0.7");
}

#[test]
fn test_invalid_host_entries() {
    let harness = TestHarness::new().unwrap();

    let no_address = InventoryBuilder::new().host(HostEntry::new("db").user("root"));
    let path = harness.write_fixture("no_address.yml", &no_address).unwrap();
    assert!(matches!(Inventory::load(path), Err(FleetError::InvalidHost { .. })));

    let bad_port = InventoryBuilder::new().host(HostEntry::new("db").ip("10.0.0.1").set_field("port", "five"));
    let path = harness.write_fixture("bad_port.yml", &bad_port).unwrap();
    let err = Inventory::load(path).unwrap_err();
    assert!(err.to_string().contains("db"), "{err}");
}

#[test]
fn test_malformed_file() {
    let harness = TestHarness::new().unwrap();
    let path = harness.write_inventory("broken.yml", "hosts:\n  db: {ip: [\n").unwrap();
    assert!(matches!(Inventory::load(path), Err(FleetError::Yaml(_))));
}
