//! Runtime facts about a live machine's devices, read back from the
//! control-plane: interface MACs, DHCP-assigned addresses and serial PTYs.

use crate::device::NetworkInterface;
use crate::machine::Machine;
use crate::session::Session;
use crate::CoreError;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::debug;
use vmlab_runtime::{interface_mac, serial_pty};
use vmlab_schema::SerialPort;

impl Machine {
    /// Live descriptor of the running domain, with the MACs and PTYs the
    /// hypervisor assigned.
    pub fn live_descriptor(&self, session: &Session) -> Result<String, CoreError> {
        let (identity, uri) = self.require_live()?;
        let control_plane = session.connect(uri.as_deref())?;
        Ok(control_plane.domain_descriptor(&identity.name)?)
    }

    /// MAC address assigned to `iface`, which must be one of this machine's
    /// interfaces.
    pub fn interface_mac(
        &self,
        session: &Session,
        iface: &NetworkInterface,
    ) -> Result<String, CoreError> {
        self.owns(iface)?;
        let network = iface
            .network()
            .name()
            .ok_or_else(|| CoreError::NotLive(iface.network().to_string()))?;
        let xml = self.live_descriptor(session)?;
        interface_mac(&xml, &network)?.ok_or_else(|| CoreError::NotAttached {
            what: "MAC address",
            owner: iface.to_string(),
        })
    }

    /// Addresses leased to `iface`, in lease table order. Empty until the
    /// guest has asked for one.
    pub fn interface_ips(
        &self,
        session: &Session,
        iface: &NetworkInterface,
    ) -> Result<Vec<IpAddr>, CoreError> {
        let mac = self.interface_mac(session, iface)?;
        let leases = iface.network().dhcp_leases(session)?;
        let ips: Vec<IpAddr> = leases
            .iter()
            .filter(|lease| lease.matches_mac(&mac))
            .map(|lease| lease.ip)
            .collect();
        debug!("{mac}: {} leased addresses", ips.len());
        Ok(ips)
    }

    /// First address leased to `iface`, if any.
    pub fn interface_ip(
        &self,
        session: &Session,
        iface: &NetworkInterface,
    ) -> Result<Option<IpAddr>, CoreError> {
        Ok(self.interface_ips(session, iface)?.into_iter().next())
    }

    /// Host PTY backing `port`, which must be one of this machine's serial
    /// ports.
    pub fn serial_pty(&self, session: &Session, port: &SerialPort) -> Result<PathBuf, CoreError> {
        let slot = self.owns(port)?;
        let xml = self.live_descriptor(session)?;
        serial_pty(&xml, slot)?.ok_or_else(|| CoreError::NotAttached {
            what: "serial PTY",
            owner: format!("{port} of {self}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{all_of, by_label, Component};
    use crate::network::{NetworkConfig, VirtualNetwork};
    use crate::retry::RetryPolicy;
    use std::sync::Arc;
    use vmlab_runtime::{parse_lease_table, ControlPlane, DhcpLease, MockControlPlane};
    use vmlab_store::RecordingImageTool;

    fn lease(network: &str, mac: &str, ip: &str) -> DhcpLease {
        let table = format!(
            " Expiry Time           MAC address         Protocol   IP address           Hostname   Client ID or DUID
-------------------------------------------------------------------------------------------------------------
 2030-01-01 00:00:00   {mac}   ipv4       {ip}/24      guest      -
"
        );
        parse_lease_table(network, &table).unwrap().remove(0)
    }

    fn session(cp: &Arc<MockControlPlane>, dir: &std::path::Path) -> Session {
        Session::with_control_plane(
            Arc::clone(cp) as Arc<dyn ControlPlane>,
            dir,
            Arc::new(RecordingImageTool::new()),
        )
        .with_retry(RetryPolicy::immediate(1))
    }

    #[test]
    fn serial_ptys_follow_port_order() {
        let dir = tempfile::tempdir().unwrap();
        let cp = Arc::new(MockControlPlane::new());
        let session = session(&cp, dir.path());
        let m = Machine::new(vec![
            Component::from(SerialPort::new().with_label("main")),
            SerialPort::new().with_label("alt").into(),
        ]);
        m.acquire(&session).unwrap();

        let main: &SerialPort = by_label(&m, "main").unwrap();
        let alt: &SerialPort = by_label(&m, "alt").unwrap();
        assert_eq!(m.serial_pty(&session, main).unwrap(), PathBuf::from("/dev/pts/0"));
        assert_eq!(m.serial_pty(&session, alt).unwrap(), PathBuf::from("/dev/pts/1"));
    }

    #[test]
    fn foreign_components_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cp = Arc::new(MockControlPlane::new());
        let session = session(&cp, dir.path());
        let m = Machine::new(vec![SerialPort::new().into()]);
        m.acquire(&session).unwrap();

        let stray = SerialPort::new();
        assert!(matches!(
            m.serial_pty(&session, &stray),
            Err(CoreError::ForeignComponent(_))
        ));
    }

    #[test]
    fn leases_are_filtered_by_interface_mac() {
        let dir = tempfile::tempdir().unwrap();
        let cp = Arc::new(MockControlPlane::new());
        let session = session(&cp, dir.path());
        let net = VirtualNetwork::new(NetworkConfig::new());
        let m = Machine::new(vec![NetworkInterface::virtio(&net).into()]);
        m.acquire(&session).unwrap();

        let iface = all_of::<NetworkInterface>(&m)[0];
        let mac = m.interface_mac(&session, iface).unwrap();
        assert_eq!(mac, "52:54:00:00:00:01");
        assert_eq!(m.interface_ip(&session, iface).unwrap(), None);

        let name = net.name().unwrap();
        cp.set_leases(
            &name,
            vec![
                lease(&name, "52:54:00:99:99:99", "10.1.1.50"),
                lease(&name, "52:54:00:00:00:01", "10.1.1.23"),
            ],
        );
        assert_eq!(
            m.interface_ips(&session, iface).unwrap(),
            vec!["10.1.1.23".parse::<IpAddr>().unwrap()]
        );
    }

    #[test]
    fn queries_require_a_live_machine() {
        let dir = tempfile::tempdir().unwrap();
        let cp = Arc::new(MockControlPlane::new());
        let session = session(&cp, dir.path());
        let m = Machine::new(vec![SerialPort::new().into()]);
        let port: &SerialPort = crate::component::first_of(&m).unwrap();
        assert!(matches!(
            m.serial_pty(&session, port),
            Err(CoreError::NotLive(_))
        ));
    }
}
