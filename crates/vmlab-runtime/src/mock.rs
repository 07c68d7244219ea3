use crate::backend::ControlPlane;
use crate::lease::DhcpLease;
use crate::live::descriptor_name;
use crate::RuntimeError;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

const DOMAIN_INTERFACE: &str = "<interface type='network'>";
const DOMAIN_SERIAL: &str = "<serial type='pty'>";

#[derive(Default)]
struct MockState {
    domain_rejections: usize,
    network_rejections: usize,
    domain_failures: usize,
    domain_attempts: usize,
    network_attempts: usize,
    domains: BTreeMap<String, String>,
    networks: BTreeMap<String, String>,
    submitted_domains: Vec<String>,
    submitted_networks: Vec<String>,
    destroyed_domains: Vec<String>,
    destroyed_networks: Vec<String>,
    leases: HashMap<String, Vec<DhcpLease>>,
    keys: Vec<(String, u16)>,
    next_mac: u32,
    next_pty: u32,
}

impl MockState {
    fn mac_element(&mut self) -> String {
        self.next_mac += 1;
        let [_, a, b, c] = self.next_mac.to_be_bytes();
        format!("<mac address='52:54:00:{a:02x}:{b:02x}:{c:02x}'/>")
    }

    fn pty_source(&mut self) -> String {
        let pty = format!("<source path='/dev/pts/{}'/>", self.next_pty);
        self.next_pty += 1;
        pty
    }

    /// Fill in what libvirt assigns at creation: interface MACs and serial
    /// PTYs.
    fn annotate(&mut self, descriptor: &str) -> String {
        let mut live = String::with_capacity(descriptor.len());
        let mut rest = descriptor;
        loop {
            let next_iface = rest.find(DOMAIN_INTERFACE);
            let next_serial = rest.find(DOMAIN_SERIAL);
            let (at, tag, extra) = match (next_iface, next_serial) {
                (Some(i), Some(s)) if s < i => (s, DOMAIN_SERIAL, self.pty_source()),
                (Some(i), _) => (i, DOMAIN_INTERFACE, self.mac_element()),
                (None, Some(s)) => (s, DOMAIN_SERIAL, self.pty_source()),
                (None, None) => break,
            };
            let end = at + tag.len();
            live.push_str(&rest[..end]);
            live.push_str(&extra);
            rest = &rest[end..];
        }
        live.push_str(rest);
        live
    }
}

/// In-memory control-plane with scriptable rejections.
///
/// Created domains get libvirt-style MAC addresses and PTY paths in their
/// live descriptor; leases are whatever the test installs.
pub struct MockControlPlane {
    uri: String,
    state: Mutex<MockState>,
}

impl Default for MockControlPlane {
    fn default() -> Self {
        Self::with_uri("test:///default")
    }
}

impl MockControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_uri(uri: &str) -> Self {
        Self {
            uri: uri.to_owned(),
            state: Mutex::new(MockState::default()),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, MockState>, RuntimeError> {
        self.state
            .lock()
            .map_err(|e| RuntimeError::Io(std::io::Error::other(format!("mutex poisoned: {e}"))))
    }

    fn read<T: Default>(&self, f: impl FnOnce(&MockState) -> T) -> T {
        self.state.lock().map(|s| f(&s)).unwrap_or_default()
    }

    fn write(&self, f: impl FnOnce(&mut MockState)) {
        if let Ok(mut s) = self.state.lock() {
            f(&mut s);
        }
    }

    /// Reject the next `n` domain submissions as transient conflicts.
    pub fn reject_next_domains(&self, n: usize) {
        self.write(|s| s.domain_rejections = n);
    }

    pub fn reject_next_networks(&self, n: usize) {
        self.write(|s| s.network_rejections = n);
    }

    /// Fail the next `n` domain submissions with a non-transient error.
    pub fn fail_next_domains(&self, n: usize) {
        self.write(|s| s.domain_failures = n);
    }

    pub fn set_leases(&self, network: &str, leases: Vec<DhcpLease>) {
        self.write(|s| {
            s.leases.insert(network.to_owned(), leases);
        });
    }

    pub fn domain_attempts(&self) -> usize {
        self.read(|s| s.domain_attempts)
    }

    pub fn network_attempts(&self) -> usize {
        self.read(|s| s.network_attempts)
    }

    /// Descriptors of every domain that was accepted, in submission order.
    pub fn submitted_domains(&self) -> Vec<String> {
        self.read(|s| s.submitted_domains.clone())
    }

    pub fn submitted_networks(&self) -> Vec<String> {
        self.read(|s| s.submitted_networks.clone())
    }

    pub fn live_domains(&self) -> Vec<String> {
        self.read(|s| s.domains.keys().cloned().collect())
    }

    pub fn live_networks(&self) -> Vec<String> {
        self.read(|s| s.networks.keys().cloned().collect())
    }

    pub fn destroyed_domains(&self) -> Vec<String> {
        self.read(|s| s.destroyed_domains.clone())
    }

    pub fn destroyed_networks(&self) -> Vec<String> {
        self.read(|s| s.destroyed_networks.clone())
    }

    pub fn sent_keys(&self) -> Vec<(String, u16)> {
        self.read(|s| s.keys.clone())
    }
}

impl ControlPlane for MockControlPlane {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn uri(&self) -> &str {
        &self.uri
    }

    fn available(&self) -> bool {
        true
    }

    fn create_domain(&self, descriptor: &str) -> Result<(), RuntimeError> {
        let name = descriptor_name(descriptor)?;
        let mut state = self.state()?;
        state.domain_attempts += 1;
        if state.domain_failures > 0 {
            state.domain_failures -= 1;
            return Err(RuntimeError::ToolFailed {
                tool: "virsh",
                code: 1,
                stderr: "simulated fatal failure".to_owned(),
            });
        }
        if state.domain_rejections > 0 {
            state.domain_rejections -= 1;
            return Err(RuntimeError::Rejected {
                operation: "create",
                name,
                message: "simulated conflict".to_owned(),
            });
        }
        if state.domains.contains_key(&name) {
            return Err(RuntimeError::Rejected {
                operation: "create",
                name,
                message: "domain already exists".to_owned(),
            });
        }
        let live = state.annotate(descriptor);
        state.domains.insert(name, live);
        state.submitted_domains.push(descriptor.to_owned());
        Ok(())
    }

    fn create_network(&self, descriptor: &str) -> Result<(), RuntimeError> {
        let name = descriptor_name(descriptor)?;
        let mut state = self.state()?;
        state.network_attempts += 1;
        if state.network_rejections > 0 {
            state.network_rejections -= 1;
            return Err(RuntimeError::Rejected {
                operation: "net-create",
                name,
                message: "simulated conflict".to_owned(),
            });
        }
        if state.networks.contains_key(&name) {
            return Err(RuntimeError::Rejected {
                operation: "net-create",
                name,
                message: "network already exists".to_owned(),
            });
        }
        state.networks.insert(name, descriptor.to_owned());
        state.submitted_networks.push(descriptor.to_owned());
        Ok(())
    }

    fn domain_descriptor(&self, domain: &str) -> Result<String, RuntimeError> {
        self.state()?
            .domains
            .get(domain)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(domain.to_owned()))
    }

    fn destroy_domain(&self, domain: &str) -> Result<(), RuntimeError> {
        let mut state = self.state()?;
        if state.domains.remove(domain).is_none() {
            return Err(RuntimeError::NotFound(domain.to_owned()));
        }
        state.destroyed_domains.push(domain.to_owned());
        Ok(())
    }

    fn destroy_network(&self, network: &str) -> Result<(), RuntimeError> {
        let mut state = self.state()?;
        if state.networks.remove(network).is_none() {
            return Err(RuntimeError::NotFound(network.to_owned()));
        }
        state.destroyed_networks.push(network.to_owned());
        Ok(())
    }

    fn network_leases(&self, network: &str) -> Result<Vec<DhcpLease>, RuntimeError> {
        let state = self.state()?;
        if !state.networks.contains_key(network) {
            return Err(RuntimeError::NotFound(network.to_owned()));
        }
        Ok(state.leases.get(network).cloned().unwrap_or_default())
    }

    fn send_key(&self, domain: &str, keycode: u16) -> Result<(), RuntimeError> {
        let mut state = self.state()?;
        if !state.domains.contains_key(domain) {
            return Err(RuntimeError::NotFound(domain.to_owned()));
        }
        state.keys.push((domain.to_owned(), keycode));
        Ok(())
    }

    fn list_domains(&self) -> Result<Vec<String>, RuntimeError> {
        Ok(self.state()?.domains.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::{interface_mac, serial_pty};

    const DOMAIN: &str = "<domain type='kvm'><name>llm_1</name><devices>\
<interface type='network'><source network='lln_a'/></interface>\
<serial type='pty'><target type='isa-serial' port='0'/></serial>\
<interface type='network'><source network='lln_b'/></interface>\
</devices></domain>";

    #[test]
    fn mock_domain_lifecycle() {
        let mock = MockControlPlane::new();
        mock.create_domain(DOMAIN).unwrap();
        assert_eq!(mock.live_domains(), vec!["llm_1"]);
        assert_eq!(mock.list_domains().unwrap(), vec!["llm_1"]);

        mock.send_key("llm_1", 0x1E).unwrap();
        assert_eq!(mock.sent_keys(), vec![("llm_1".to_owned(), 0x1E)]);

        mock.destroy_domain("llm_1").unwrap();
        assert!(mock.live_domains().is_empty());
        assert_eq!(mock.destroyed_domains(), vec!["llm_1"]);
        assert!(matches!(
            mock.destroy_domain("llm_1"),
            Err(RuntimeError::NotFound(_))
        ));
    }

    #[test]
    fn live_descriptor_gets_macs_and_ptys() {
        let mock = MockControlPlane::new();
        mock.create_domain(DOMAIN).unwrap();
        let live = mock.domain_descriptor("llm_1").unwrap();
        assert_eq!(
            interface_mac(&live, "lln_a").unwrap().as_deref(),
            Some("52:54:00:00:00:01")
        );
        assert_eq!(
            interface_mac(&live, "lln_b").unwrap().as_deref(),
            Some("52:54:00:00:00:02")
        );
        assert_eq!(
            serial_pty(&live, 0).unwrap(),
            Some(std::path::PathBuf::from("/dev/pts/0"))
        );
        assert_eq!(mock.submitted_domains(), vec![DOMAIN.to_owned()]);
    }

    #[test]
    fn annotation_follows_device_order() {
        let mut state = MockState::default();
        let serial_first = state.annotate(
            "<serial type='pty'><target port='0'/></serial>\
<interface type='network'><source network='lln_a'/></interface>",
        );
        assert_eq!(
            serial_first,
            "<serial type='pty'><source path='/dev/pts/0'/><target port='0'/></serial>\
<interface type='network'><mac address='52:54:00:00:00:01'/><source network='lln_a'/></interface>"
        );

        let only_iface =
            state.annotate("<interface type='network'><source network='lln_b'/></interface>");
        assert!(only_iface.contains("<mac address='52:54:00:00:00:02'/>"));
        assert!(!only_iface.contains("/dev/pts"));
        assert_eq!(state.annotate("<devices/>"), "<devices/>");
    }

    #[test]
    fn scripted_rejections_are_transient() {
        let mock = MockControlPlane::new();
        mock.reject_next_domains(2);
        assert!(mock.create_domain(DOMAIN).unwrap_err().is_transient());
        assert!(mock.create_domain(DOMAIN).unwrap_err().is_transient());
        mock.create_domain(DOMAIN).unwrap();
        assert_eq!(mock.domain_attempts(), 3);
        assert_eq!(mock.submitted_domains().len(), 1);
    }

    #[test]
    fn scripted_failures_are_fatal() {
        let mock = MockControlPlane::new();
        mock.fail_next_domains(1);
        assert!(!mock.create_domain(DOMAIN).unwrap_err().is_transient());
        mock.create_domain(DOMAIN).unwrap();
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mock = MockControlPlane::new();
        mock.create_domain(DOMAIN).unwrap();
        let err = mock.create_domain(DOMAIN).unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn leases_require_a_live_network() {
        let mock = MockControlPlane::new();
        assert!(mock.network_leases("lln_a").is_err());
        mock.create_network("<network><name>lln_a</name></network>")
            .unwrap();
        assert!(mock.network_leases("lln_a").unwrap().is_empty());
        mock.destroy_network("lln_a").unwrap();
        assert_eq!(mock.destroyed_networks(), vec!["lln_a"]);
    }
}
