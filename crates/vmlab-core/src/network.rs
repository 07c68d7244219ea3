//! Reference-counted lab networks.
//!
//! A `VirtualNetwork` is created on its first acquisition and destroyed on
//! its last release. Creation draws a fresh identity and a random
//! `10.x.y.0/24` subnet per attempt, skipping subnets that overlap a host
//! route. Host routes are read once per creation, not once per attempt.

use crate::identity::{allocate, NETWORK_PREFIX};
use crate::lifecycle::{validate_transition, ResourceState};
use crate::session::Session;
use crate::CoreError;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};
use uuid::Uuid;
use vmlab_runtime::{tools, DhcpLease};
use vmlab_schema::{
    render_network, Identity, LabSubnet, NetbootConfig, NetworkDescriptor, NetworkSection,
};

pub const DEFAULT_BOOT_FILE: &str = "pxelinux.0";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkConfig {
    /// NAT forwarding to the host's uplink.
    pub internet: bool,
    /// TFTP root and boot file offered to PXE clients.
    pub netboot: Option<NetbootConfig>,
}

impl NetworkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_internet(mut self, internet: bool) -> Self {
        self.internet = internet;
        self
    }

    #[must_use]
    pub fn with_netboot(mut self, root: impl Into<PathBuf>, boot_file: Option<&str>) -> Self {
        self.netboot = Some(NetbootConfig {
            root: root.into(),
            boot_file: boot_file.unwrap_or(DEFAULT_BOOT_FILE).to_owned(),
        });
        self
    }
}

impl From<&NetworkSection> for NetworkConfig {
    fn from(section: &NetworkSection) -> Self {
        Self {
            internet: section.internet,
            netboot: section.netboot(),
        }
    }
}

#[derive(Debug)]
struct NetworkState {
    uri: Option<String>,
    label: Option<String>,
    refcount: usize,
    state: ResourceState,
    identity: Option<Identity>,
    subnet: Option<LabSubnet>,
}

#[derive(Debug)]
struct Shared {
    config: NetworkConfig,
    state: Mutex<NetworkState>,
}

/// Shared handle to one lab network. Clones refer to the same network.
#[derive(Debug, Clone)]
pub struct VirtualNetwork {
    shared: Arc<Shared>,
}

impl VirtualNetwork {
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(NetworkState {
                    uri: None,
                    label: None,
                    refcount: 0,
                    state: ResourceState::Defined,
                    identity: None,
                    subnet: None,
                }),
            }),
        }
    }

    /// Endpoint to create the network on instead of the session default.
    #[must_use]
    pub fn with_uri(self, uri: &str) -> Self {
        self.lock().uri = Some(uri.to_owned());
        self
    }

    #[must_use]
    pub fn with_label(self, label: &str) -> Self {
        self.lock().label = Some(label.to_owned());
        self
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.shared.config
    }

    pub fn label(&self) -> Option<String> {
        self.lock().label.clone()
    }

    pub fn uri(&self) -> Option<String> {
        self.lock().uri.clone()
    }

    pub fn refcount(&self) -> usize {
        self.lock().refcount
    }

    pub fn state(&self) -> ResourceState {
        self.lock().state
    }

    pub fn is_live(&self) -> bool {
        self.state() == ResourceState::Live
    }

    /// Bridge and network name while live.
    pub fn name(&self) -> Option<String> {
        let state = self.lock();
        live_identity(&state).map(|id| id.name.clone())
    }

    pub fn uuid(&self) -> Option<Uuid> {
        let state = self.lock();
        live_identity(&state).map(|id| id.uuid)
    }

    pub fn subnet(&self) -> Option<LabSubnet> {
        let state = self.lock();
        if state.state == ResourceState::Live {
            state.subnet
        } else {
            None
        }
    }

    /// Whether both handles refer to the same network.
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Take a reference, creating the network if this is the first one.
    pub fn acquire(&self, session: &Session) -> Result<(), CoreError> {
        let mut state = self.lock();
        state.refcount += 1;
        if state.refcount > 1 {
            debug!(
                "network {} acquired (refs={})",
                display_name(&state),
                state.refcount
            );
            return Ok(());
        }

        let created = validate_transition(state.state, ResourceState::Live)
            .and_then(|()| self.create(session, state.uri.as_deref()));
        match created {
            Ok((identity, subnet)) => {
                info!("network {} is live on {subnet}", identity.name);
                state.identity = Some(identity);
                state.subnet = Some(subnet);
                state.state = ResourceState::Live;
                Ok(())
            }
            Err(e) => {
                state.refcount -= 1;
                Err(e)
            }
        }
    }

    fn create(
        &self,
        session: &Session,
        uri: Option<&str>,
    ) -> Result<(Identity, LabSubnet), CoreError> {
        let control_plane = session.connect(uri)?;
        let routes = session.routes().routes()?;
        debug!("checking lab subnets against {} host routes", routes.len());
        let identities = session.identities();

        session.retry().run("network creation", |attempt| {
            let identity = allocate(identities, NETWORK_PREFIX);
            let subnet = LabSubnet::new(identities.octet(), identities.octet());
            if subnet.conflicts_with(&routes) {
                return Err(CoreError::SubnetConflict(subnet));
            }
            let xml = render_network(&NetworkDescriptor {
                identity: &identity,
                subnet,
                internet: self.shared.config.internet,
                netboot: self.shared.config.netboot.as_ref(),
            });
            debug!("attempt {attempt}: creating network {} on {subnet}", identity.name);
            control_plane.create_network(&xml)?;
            Ok((identity, subnet))
        })
    }

    /// Drop a reference, destroying the network when none remain.
    ///
    /// Releasing an unheld network does nothing. Destruction failures are
    /// logged, not returned.
    pub fn release(&self, session: &Session) {
        let mut state = self.lock();
        if state.refcount == 0 {
            debug!("release of unheld network {} ignored", display_name(&state));
            return;
        }
        state.refcount -= 1;
        if state.refcount > 0 {
            debug!(
                "network {} released (refs={})",
                display_name(&state),
                state.refcount
            );
            return;
        }
        if let Err(e) = validate_transition(state.state, ResourceState::TornDown) {
            warn!("network {}: {e}", display_name(&state));
            return;
        }

        if let Some(ref identity) = state.identity {
            let destroyed = session
                .connect(state.uri.as_deref())
                .and_then(|cp| cp.destroy_network(&identity.name).map_err(CoreError::from));
            match destroyed {
                Ok(()) => info!("network {} torn down", identity.name),
                Err(e) => warn!("failed to destroy network {}: {e}", identity.name),
            }
        }
        state.state = ResourceState::TornDown;
        state.subnet = None;
    }

    /// DHCP leases currently handed out on this network. Empty when the
    /// network is not live.
    pub fn dhcp_leases(&self, session: &Session) -> Result<Vec<DhcpLease>, CoreError> {
        let (name, uri) = {
            let state = self.lock();
            match live_identity(&state) {
                Some(id) => (id.name.clone(), state.uri.clone()),
                None => return Ok(Vec::new()),
            }
        };
        let control_plane = session.connect(uri.as_deref())?;
        Ok(control_plane.network_leases(&name)?)
    }

    fn require_name(&self) -> Result<String, CoreError> {
        self.name().ok_or_else(|| CoreError::NotLive(self.to_string()))
    }

    /// Start a packet capture on the network bridge in the background and
    /// return its process id.
    pub fn capture(
        &self,
        capture_filter: Option<&str>,
        display_filter: Option<&str>,
    ) -> Result<u32, CoreError> {
        let name = self.require_name()?;
        let pid = tools::spawn_detached(tools::packet_capture(
            &name,
            capture_filter,
            display_filter,
        ))?;
        info!("capturing on {name} (pid {pid})");
        Ok(pid)
    }

    /// Enslave a host interface to the network bridge.
    pub fn attach_host_interface(&self, host_iface: &str) -> Result<(), CoreError> {
        let name = self.require_name()?;
        tools::run_checked(tools::bridge_attach(host_iface, &name))?;
        info!("attached {host_iface} to {name}");
        Ok(())
    }
}

impl PartialEq for VirtualNetwork {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl Eq for VirtualNetwork {}

fn live_identity(state: &NetworkState) -> Option<&Identity> {
    if state.state == ResourceState::Live {
        state.identity.as_ref()
    } else {
        None
    }
}

fn display_name(state: &NetworkState) -> String {
    if let Some(id) = live_identity(state) {
        id.name.clone()
    } else if let Some(ref label) = state.label {
        label.clone()
    } else {
        "(unallocated)".to_owned()
    }
}

impl fmt::Display for VirtualNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        write!(f, "VirtualNetwork({}", display_name(&state))?;
        if let Some(subnet) = state.subnet.filter(|_| state.state == ResourceState::Live) {
            write!(f, ", {subnet}")?;
        }
        if self.shared.config.internet {
            f.write_str(", nat")?;
        }
        f.write_str(")")
    }
}
