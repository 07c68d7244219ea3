use crate::lease::DhcpLease;
use crate::RuntimeError;

/// Hypervisor control-plane bound to one endpoint URI.
///
/// Domains and networks are addressed by their generated name. Every call
/// blocks until the control-plane answers.
pub trait ControlPlane: Send + Sync {
    fn name(&self) -> &str;

    fn uri(&self) -> &str;

    fn available(&self) -> bool;

    /// Create and start a transient domain from `descriptor`.
    fn create_domain(&self, descriptor: &str) -> Result<(), RuntimeError>;

    /// Create and start a transient network from `descriptor`.
    fn create_network(&self, descriptor: &str) -> Result<(), RuntimeError>;

    /// Live descriptor of a running domain, including the addresses and
    /// endpoints the control-plane assigned.
    fn domain_descriptor(&self, domain: &str) -> Result<String, RuntimeError>;

    fn destroy_domain(&self, domain: &str) -> Result<(), RuntimeError>;

    fn destroy_network(&self, network: &str) -> Result<(), RuntimeError>;

    fn network_leases(&self, network: &str) -> Result<Vec<DhcpLease>, RuntimeError>;

    /// Press and release one key, given as a linux keycode.
    fn send_key(&self, domain: &str, keycode: u16) -> Result<(), RuntimeError>;

    fn list_domains(&self) -> Result<Vec<String>, RuntimeError>;
}

pub fn select_backend(name: &str, uri: &str) -> Result<Box<dyn ControlPlane>, RuntimeError> {
    match name {
        "virsh" => Ok(Box::new(crate::virsh::Virsh::new(uri))),
        "mock" => Ok(Box::new(crate::mock::MockControlPlane::with_uri(uri))),
        other => Err(RuntimeError::BackendUnavailable(other.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_valid_backends() {
        let virsh = select_backend("virsh", "qemu:///system").unwrap();
        assert_eq!(virsh.name(), "virsh");
        assert_eq!(virsh.uri(), "qemu:///system");
        let mock = select_backend("mock", "test:///default").unwrap();
        assert_eq!(mock.name(), "mock");
        assert_eq!(mock.uri(), "test:///default");
    }

    #[test]
    fn select_invalid_backend_fails() {
        assert!(matches!(
            select_backend("xen", "qemu:///system"),
            Err(RuntimeError::BackendUnavailable(_))
        ));
    }
}
