//! Device materialization.
//!
//! Materializing a component produces the resources a domain needs (a disk
//! clone, a firmware copy, a live network) plus the descriptor fragment that
//! references them. Fragments are numbered per kind in component order:
//! the n-th disk gets slot n, the n-th serial port gets port n. Interfaces
//! marked for network boot take boot orders `1..=k` ahead of every disk.

use crate::component::{all_of, Component};
use crate::network::VirtualNetwork;
use crate::session::Session;
use crate::CoreError;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use vmlab_schema::{
    render_disk, render_interface, render_serial, AdapterModel, Disk, DiskFragment, FirmwareImage,
};

/// A network adapter attached to a lab network.
///
/// The network is acquired when the owning machine is created and released
/// when the machine is torn down.
#[derive(Debug, Clone)]
pub struct NetworkInterface {
    network: VirtualNetwork,
    model: AdapterModel,
    netboot: bool,
    label: Option<String>,
}

impl NetworkInterface {
    pub fn new(network: &VirtualNetwork, model: AdapterModel) -> Self {
        Self {
            network: network.clone(),
            model,
            netboot: false,
            label: None,
        }
    }

    pub fn virtio(network: &VirtualNetwork) -> Self {
        Self::new(network, AdapterModel::Virtio)
    }

    pub fn e1000(network: &VirtualNetwork) -> Self {
        Self::new(network, AdapterModel::E1000)
    }

    /// Boot from this interface before any disk.
    #[must_use]
    pub fn with_netboot(mut self, netboot: bool) -> Self {
        self.netboot = netboot;
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_owned());
        self
    }

    pub fn network(&self) -> &VirtualNetwork {
        &self.network
    }

    pub fn model(&self) -> AdapterModel {
        self.model
    }

    pub fn is_netboot(&self) -> bool {
        self.netboot
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

impl fmt::Display for NetworkInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.model {
            AdapterModel::Virtio => "VirtioInterface",
            AdapterModel::E1000 => "E1000Interface",
        };
        write!(f, "{kind}({})", self.network)
    }
}

/// A device's live resources and descriptor fragment.
#[derive(Debug)]
pub enum Materialized {
    Disk {
        fragment: DiskFragment,
        cloned: bool,
    },
    Firmware {
        live_path: PathBuf,
        cloned: bool,
    },
    Serial {
        slot: usize,
    },
    Interface {
        network: VirtualNetwork,
        network_name: String,
        model: AdapterModel,
        boot_order: Option<u32>,
    },
}

impl Materialized {
    /// Descriptor fragment placed under `<devices>`. Firmware has none; its
    /// path is rendered by the domain itself.
    pub fn render(&self) -> String {
        match self {
            Self::Disk { fragment, .. } => render_disk(fragment),
            Self::Firmware { .. } => String::new(),
            Self::Serial { slot } => render_serial(*slot),
            Self::Interface {
                network_name,
                model,
                boot_order,
                ..
            } => render_interface(network_name, *model, *boot_order),
        }
    }

    pub fn nvram(&self) -> Option<&Path> {
        match self {
            Self::Firmware { live_path, .. } => Some(live_path),
            _ => None,
        }
    }

    pub fn live_path(&self) -> Option<&Path> {
        match self {
            Self::Disk { fragment, .. } => Some(&fragment.live_path),
            Self::Firmware { live_path, .. } => Some(live_path),
            _ => None,
        }
    }

    /// Undo materialization: delete clones and release networks. Live
    /// images are never touched.
    pub fn release(self, session: &Session) -> Result<(), CoreError> {
        match self {
            Self::Disk {
                fragment,
                cloned: true,
            } => {
                session.clones().remove(&fragment.live_path)?;
            }
            Self::Firmware {
                live_path,
                cloned: true,
            } => {
                session.clones().remove(&live_path)?;
            }
            Self::Interface { network, .. } => network.release(session),
            _ => {}
        }
        Ok(())
    }
}

/// Release devices in reverse order, logging failures.
pub(crate) fn release_all(session: &Session, devices: Vec<Materialized>) {
    for device in devices.into_iter().rev() {
        if let Err(e) = device.release(session) {
            warn!("failed to release device: {e}");
        }
    }
}

/// Numbering state for materializing one machine's components in order.
pub(crate) struct Materializer<'a> {
    session: &'a Session,
    machine: &'a str,
    netboot_count: u32,
    next_disk: usize,
    next_serial: usize,
    next_netboot: u32,
}

impl<'a> Materializer<'a> {
    pub(crate) fn new(session: &'a Session, machine: &'a str, components: &[Component]) -> Self {
        let netboot = all_of::<NetworkInterface>(components)
            .into_iter()
            .filter(|i| i.is_netboot())
            .count();
        Self {
            session,
            machine,
            netboot_count: u32::try_from(netboot).unwrap_or(u32::MAX),
            next_disk: 0,
            next_serial: 0,
            next_netboot: 0,
        }
    }

    /// Materialize one component. The hardware profile yields nothing.
    pub(crate) fn materialize(
        &mut self,
        component: &Component,
    ) -> Result<Option<Materialized>, CoreError> {
        let device = match component {
            Component::Hardware(_) => return Ok(None),
            Component::Disk(disk) => self.disk(disk)?,
            Component::Firmware(firmware) => self.firmware(firmware)?,
            Component::Serial(_) => {
                let slot = self.next_serial;
                self.next_serial += 1;
                Materialized::Serial { slot }
            }
            Component::Interface(iface) => self.interface(iface)?,
        };
        debug!("{}: materialized {component}", self.machine);
        Ok(Some(device))
    }

    fn disk(&mut self, disk: &Disk) -> Result<Materialized, CoreError> {
        let slot = self.next_disk;
        let cloned = disk.clone_policy().is_clone();
        let live_path = if cloned {
            self.session.clones().create_disk_clone(
                disk.image_path(),
                self.machine,
                slot,
                disk.expand(),
            )?
        } else {
            disk.image_path().to_path_buf()
        };
        self.next_disk += 1;
        let boot_order = self
            .netboot_count
            .saturating_add(u32::try_from(slot).unwrap_or(u32::MAX))
            .saturating_add(1);
        Ok(Materialized::Disk {
            fragment: DiskFragment {
                live_path,
                bus: disk.bus(),
                slot,
                boot_order,
            },
            cloned,
        })
    }

    fn firmware(&self, firmware: &FirmwareImage) -> Result<Materialized, CoreError> {
        let cloned = firmware.clone_policy().is_clone();
        let live_path = if cloned {
            self.session
                .clones()
                .create_firmware_copy(firmware.image_path(), self.machine)?
        } else {
            firmware.image_path().to_path_buf()
        };
        Ok(Materialized::Firmware { live_path, cloned })
    }

    fn interface(&mut self, iface: &NetworkInterface) -> Result<Materialized, CoreError> {
        let network = iface.network();
        network
            .acquire(self.session)
            .map_err(|e| CoreError::NetworkUnavailable(Box::new(e)))?;
        let Some(network_name) = network.name() else {
            network.release(self.session);
            return Err(CoreError::NotLive(network.to_string()));
        };
        let boot_order = if iface.is_netboot() {
            self.next_netboot += 1;
            Some(self.next_netboot)
        } else {
            None
        };
        Ok(Materialized::Interface {
            network: network.clone(),
            network_name,
            model: iface.model(),
            boot_order,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetworkConfig;
    use crate::retry::RetryPolicy;
    use std::sync::Arc;
    use vmlab_runtime::{ControlPlane, MockControlPlane};
    use vmlab_schema::{HardwareProfile, SerialPort};
    use vmlab_store::{RecordingImageTool, QCOW2_MAGIC};

    struct Fixture {
        dir: tempfile::TempDir,
        tool: Arc<RecordingImageTool>,
        session: Session,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let tool = Arc::new(RecordingImageTool::new());
        let cp: Arc<dyn ControlPlane> = Arc::new(MockControlPlane::new());
        let session = Session::with_control_plane(cp, dir.path().join("clones"), tool.clone())
            .with_retry(RetryPolicy::immediate(1));
        Fixture { dir, tool, session }
    }

    fn base_image(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, QCOW2_MAGIC).unwrap();
        path
    }

    #[test]
    fn slots_and_boot_orders_follow_component_order() {
        let f = fixture();
        let net = VirtualNetwork::new(NetworkConfig::new());
        let components: Vec<Component> = vec![
            HardwareProfile::default().into(),
            Disk::virtio(base_image(f.dir.path(), "a.qcow2")).unwrap().into(),
            SerialPort::new().into(),
            NetworkInterface::virtio(&net).with_netboot(true).into(),
            Disk::sata(base_image(f.dir.path(), "b.qcow2")).unwrap().into(),
            SerialPort::new().into(),
        ];
        let mut m = Materializer::new(&f.session, "llm_t", &components);
        let devices: Vec<_> = components
            .iter()
            .filter_map(|c| m.materialize(c).unwrap())
            .collect();
        assert_eq!(devices.len(), 5);

        let xml: String = devices.iter().map(Materialized::render).collect();
        assert!(xml.contains("<target dev='vda' bus='virtio'/><boot order='2'/>"));
        assert!(xml.contains("<target dev='sdb' bus='sata'/><boot order='3'/>"));
        assert!(xml.contains("port='0'"));
        assert!(xml.contains("port='1'"));
        assert!(xml.contains("<boot order='1'/></interface>"));
        assert_eq!(f.tool.call_count(), 2);
        assert_eq!(net.refcount(), 1);

        release_all(&f.session, devices);
        assert_eq!(net.refcount(), 0);
        assert!(f.session.clones().list().unwrap().is_empty());
    }

    #[test]
    fn single_disk_boots_first() {
        let f = fixture();
        let components: Vec<Component> =
            vec![Disk::virtio(base_image(f.dir.path(), "a.qcow2")).unwrap().into()];
        let mut m = Materializer::new(&f.session, "llm_t", &components);
        let device = m.materialize(&components[0]).unwrap().unwrap();
        match device {
            Materialized::Disk { ref fragment, cloned } => {
                assert!(cloned);
                assert_eq!(fragment.slot, 0);
                assert_eq!(fragment.boot_order, 1);
                assert!(fragment.live_path.ends_with("llm_t-disk0.qcow2"));
            }
            ref other => panic!("unexpected device {other:?}"),
        }
    }

    #[test]
    fn live_devices_are_never_deleted() {
        let f = fixture();
        let base = base_image(f.dir.path(), "a.qcow2");
        let components: Vec<Component> = vec![Disk::virtio(&base).unwrap().live().into()];
        let mut m = Materializer::new(&f.session, "llm_t", &components);
        let device = m.materialize(&components[0]).unwrap().unwrap();
        assert_eq!(device.live_path(), Some(base.as_path()));
        device.release(&f.session).unwrap();
        assert!(base.exists());
        assert_eq!(f.tool.call_count(), 0);
    }

    #[test]
    fn firmware_copy_supplies_nvram() {
        let f = fixture();
        let vars = f.dir.path().join("vars.fd");
        std::fs::write(&vars, b"nvram").unwrap();
        let components: Vec<Component> = vec![FirmwareImage::new(&vars).unwrap().into()];
        let mut m = Materializer::new(&f.session, "llm_t", &components);
        let device = m.materialize(&components[0]).unwrap().unwrap();
        let nvram = device.nvram().unwrap().to_path_buf();
        assert!(nvram.ends_with("llm_t-nvram.fd"));
        assert_eq!(std::fs::read(&nvram).unwrap(), b"nvram");
        assert!(device.render().is_empty());
        device.release(&f.session).unwrap();
        assert!(!nvram.exists());
        assert!(vars.exists());
    }

    #[test]
    fn interface_display_names_model() {
        let net = VirtualNetwork::new(NetworkConfig::new()).with_label("lan");
        assert_eq!(
            NetworkInterface::e1000(&net).to_string(),
            "E1000Interface(VirtualNetwork(lan))"
        );
    }
}
