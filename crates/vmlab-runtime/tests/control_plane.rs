//! End-to-end use of the mock control-plane through the trait object, the way
//! the orchestration layer drives it.

use vmlab_runtime::{
    interface_mac, parse_lease_table, select_backend, serial_pty, ControlPlane, MockControlPlane,
    RuntimeError, Virsh,
};
use vmlab_schema::{
    render_domain, render_interface, render_network, render_serial, AdapterModel,
    HardwareProfile, Identity, LabSubnet, NetworkDescriptor,
};

fn identity(name: &str) -> Identity {
    Identity {
        uuid: uuid::Uuid::new_v4(),
        name: name.to_owned(),
    }
}

#[test]
fn rendered_descriptors_are_accepted() {
    let backend = select_backend("mock", "test:///default").unwrap();
    let net = identity("lln_test");
    backend
        .create_network(&render_network(&NetworkDescriptor {
            identity: &net,
            subnet: LabSubnet::new(7, 9),
            internet: false,
            netboot: None,
        }))
        .unwrap();

    let devices = format!(
        "{}{}",
        render_interface("lln_test", AdapterModel::Virtio, None),
        render_serial(0)
    );
    let machine = identity("llm_test");
    backend
        .create_domain(&render_domain(
            &machine,
            &HardwareProfile::default(),
            None,
            &devices,
        ))
        .unwrap();

    let live = backend.domain_descriptor("llm_test").unwrap();
    assert!(interface_mac(&live, "lln_test").unwrap().is_some());
    assert!(serial_pty(&live, 0).unwrap().is_some());
    assert_eq!(backend.list_domains().unwrap(), vec!["llm_test"]);

    backend.destroy_domain("llm_test").unwrap();
    backend.destroy_network("lln_test").unwrap();
    assert!(backend.list_domains().unwrap().is_empty());
}

#[test]
fn installed_leases_are_returned() {
    let mock = MockControlPlane::new();
    mock.create_network("<network><name>lln_a</name></network>")
        .unwrap();
    let leases = parse_lease_table(
        "lln_a",
        " 2030-01-01 00:00:00   52:54:00:00:00:01   ipv4   10.1.2.50/24   host1   -\n",
    )
    .unwrap();
    mock.set_leases("lln_a", leases);

    let got = mock.network_leases("lln_a").unwrap();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].ip.to_string(), "10.1.2.50");
}

#[test]
fn unknown_backend_is_rejected() {
    assert!(matches!(
        select_backend("xen", "xen:///system"),
        Err(RuntimeError::BackendUnavailable(name)) if name == "xen"
    ));
}

#[cfg(unix)]
fn stub_virsh(dir: &std::path::Path) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let script = r#"#!/bin/sh
case "$3" in
  uri) echo "$2" ;;
  list) printf 'llm_a\n\nllm_b\n' ;;
  create) grep -q '<name>llm_ok</name>' "$4" || { echo "domain already exists" >&2; exit 1; } ;;
  net-dhcp-leases)
    echo " Expiry Time           MAC address         Protocol   IP address       Hostname   Client ID or DUID"
    echo "-----------------------------------------------------------------------------------------------------"
    echo " 2030-01-01 00:00:00   52:54:00:AA:00:01   ipv4       10.1.2.50/24     host1      -"
    ;;
  *) exit 0 ;;
esac
"#;
    let path = dir.join("virsh");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[cfg(unix)]
#[test]
fn virsh_client_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let virsh = Virsh::with_program("test:///default", stub_virsh(dir.path()));
    assert!(virsh.available());
    assert_eq!(virsh.list_domains().unwrap(), vec!["llm_a", "llm_b"]);

    let leases = virsh.network_leases("lln_a").unwrap();
    assert_eq!(leases.len(), 1);
    assert_eq!(leases[0].mac, "52:54:00:aa:00:01");
    assert_eq!(leases[0].iface, "lln_a");

    virsh
        .create_domain("<domain><name>llm_ok</name></domain>")
        .unwrap();
    let err = virsh
        .create_domain("<domain><name>llm_taken</name></domain>")
        .unwrap_err();
    assert!(err.is_transient());
    assert!(err.to_string().contains("domain already exists"));

    virsh.destroy_domain("llm_ok").unwrap();
    virsh.send_key("llm_ok", 0x1E).unwrap();
}
