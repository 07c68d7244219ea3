//! Boundary between vmlab and the host: the hypervisor control-plane and the
//! external tools it drives.
//!
//! This crate implements the `ControlPlane` trait with a `virsh`-driven libvirt
//! backend and an in-memory `MockControlPlane`, parses DHCP lease tables and
//! live domain descriptors, queries host routes for subnet collision checks,
//! launches the interactive tools (console viewer, serial terminal, packet
//! capture, bridge attach), and checks that the required host tools exist.

pub mod backend;
pub mod lease;
pub mod live;
pub mod mock;
pub mod prereq;
pub mod routes;
pub mod tools;
pub mod virsh;

pub use backend::{select_backend, ControlPlane};
pub use lease::{parse_lease_table, DhcpLease, LeaseType};
pub use live::{descriptor_name, interface_mac, serial_pty};
pub use mock::MockControlPlane;
pub use prereq::{
    check_core_prereqs, check_tool_prereqs, command_exists, format_missing, MissingPrereq,
};
pub use routes::{parse_ip_routes, IpRoute, RouteSource, StaticRoutes};
pub use virsh::Virsh;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("backend '{0}' is not available on this system")]
    BackendUnavailable(String),
    #[error("control-plane rejected {operation} of '{name}': {message}")]
    Rejected {
        operation: &'static str,
        name: String,
        message: String,
    },
    #[error("'{0}' not found on the control-plane")]
    NotFound(String),
    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} exited with status {code}: {stderr}")]
    ToolFailed {
        tool: &'static str,
        code: i32,
        stderr: String,
    },
    #[error("failed to parse lease table: {0}")]
    LeaseParse(String),
    #[error("failed to parse host routes: {0}")]
    RouteParse(#[from] serde_json::Error),
    #[error("failed to parse descriptor: {0}")]
    DescriptorParse(String),
}

impl RuntimeError {
    /// Rejections by the control-plane are worth retrying with a fresh
    /// identity; everything else is fatal.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_is_transient() {
        let e = RuntimeError::Rejected {
            operation: "create",
            name: "llm_1".to_owned(),
            message: "domain already exists".to_owned(),
        };
        assert!(e.is_transient());
        assert!(e.to_string().contains("llm_1"));
    }

    #[test]
    fn other_errors_are_fatal() {
        assert!(!RuntimeError::NotFound("llm_1".to_owned()).is_transient());
        assert!(!RuntimeError::BackendUnavailable("xen".to_owned()).is_transient());
        assert!(!RuntimeError::ToolFailed {
            tool: "ip",
            code: 2,
            stderr: String::new(),
        }
        .is_transient());
    }
}
