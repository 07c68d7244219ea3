//! Labs assembled from a manifest.
//!
//! Networks are built first, keyed by their manifest label, then machines in
//! manifest order with interfaces bound to those networks. Bringing a lab up
//! acquires the machines in order; a network comes up with the first machine
//! attached to it and goes down with the last.

use crate::component::{all_of, Component};
use crate::device::NetworkInterface;
use crate::machine::Machine;
use crate::network::{NetworkConfig, VirtualNetwork};
use crate::session::Session;
use crate::CoreError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::{info, warn};
use vmlab_schema::{LabManifest, MachineSection, ManifestError, SerialPort};

#[derive(Debug)]
pub struct Lab {
    networks: BTreeMap<String, VirtualNetwork>,
    machines: Vec<(String, Machine)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InterfaceSummary {
    pub network: String,
    pub bridge: Option<String>,
    pub model: String,
    pub mac: Option<String>,
    pub ips: Vec<IpAddr>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MachineSummary {
    pub label: String,
    pub domain: Option<String>,
    pub uuid: Option<String>,
    pub state: String,
    pub interfaces: Vec<InterfaceSummary>,
    pub serial_ptys: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkSummary {
    pub label: String,
    pub bridge: Option<String>,
    pub subnet: Option<String>,
    pub internet: bool,
    pub refs: usize,
}

fn build_machine(
    section: &MachineSection,
    index: usize,
    networks: &BTreeMap<String, VirtualNetwork>,
) -> Result<Machine, CoreError> {
    let label = section.display_name(index);
    let device_error = |source| ManifestError::Device {
        machine: label.clone(),
        source,
    };

    let mut components: Vec<Component> = Vec::new();
    if let Some(profile) = section.hardware_profile() {
        components.push(profile.into());
    }
    if let Some(firmware) = section.firmware_image().map_err(device_error)? {
        components.push(firmware.into());
    }
    for disk in section.disk_devices().map_err(device_error)? {
        components.push(disk.into());
    }
    for port in section.serial_port_devices() {
        components.push(port.into());
    }
    for iface in &section.interfaces {
        let network = networks
            .get(&iface.network)
            .ok_or_else(|| ManifestError::UnknownNetwork {
                machine: label.clone(),
                network: iface.network.clone(),
            })?;
        components.push(
            NetworkInterface::new(network, iface.model)
                .with_netboot(iface.netboot)
                .into(),
        );
    }
    Ok(Machine::new(components).with_label(&label))
}

impl Lab {
    pub fn from_manifest(manifest: &LabManifest) -> Result<Self, CoreError> {
        let networks: BTreeMap<String, VirtualNetwork> = manifest
            .networks
            .iter()
            .map(|(label, section)| {
                let network = VirtualNetwork::new(NetworkConfig::from(section)).with_label(label);
                (label.clone(), network)
            })
            .collect();

        let machines = manifest
            .machines
            .iter()
            .enumerate()
            .map(|(i, section)| {
                let machine = build_machine(section, i, &networks)?;
                Ok((section.display_name(i), machine))
            })
            .collect::<Result<Vec<_>, CoreError>>()?;

        Ok(Self { networks, machines })
    }

    pub fn network(&self, label: &str) -> Option<&VirtualNetwork> {
        self.networks.get(label)
    }

    pub fn machine(&self, label: &str) -> Option<&Machine> {
        self.machines
            .iter()
            .find(|(name, _)| name == label)
            .map(|(_, m)| m)
    }

    pub fn machines(&self) -> impl Iterator<Item = (&str, &Machine)> {
        self.machines.iter().map(|(name, m)| (name.as_str(), m))
    }

    pub fn networks(&self) -> impl Iterator<Item = (&str, &VirtualNetwork)> {
        self.networks.iter().map(|(name, n)| (name.as_str(), n))
    }

    pub fn up(&self, session: &Session) -> Result<(), CoreError> {
        self.up_with_cancel(session, || false)
    }

    /// Acquire every machine in manifest order. On failure or cancellation
    /// the machines already acquired are released again, newest first.
    pub fn up_with_cancel(
        &self,
        session: &Session,
        should_stop: impl Fn() -> bool,
    ) -> Result<(), CoreError> {
        for (i, (label, machine)) in self.machines.iter().enumerate() {
            let outcome = if should_stop() {
                Err(CoreError::Interrupted)
            } else {
                machine.acquire(session)
            };
            if let Err(e) = outcome {
                warn!("bringing up {label} failed: {e}; rolling back {i} machines");
                for (_, started) in self.machines[..i].iter().rev() {
                    started.release(session);
                }
                return Err(e);
            }
            info!("{label} is up");
        }
        Ok(())
    }

    /// Release every machine in reverse manifest order.
    pub fn down(&self, session: &Session) {
        for (label, machine) in self.machines.iter().rev() {
            machine.release(session);
            info!("{label} is down");
        }
    }

    /// Per-machine runtime view. Facts that cannot be read back (no lease
    /// yet, machine not live) are left empty.
    pub fn machine_summaries(&self, session: &Session) -> Vec<MachineSummary> {
        self.machines
            .iter()
            .map(|(label, machine)| summarize(label, machine, session))
            .collect()
    }

    pub fn network_summaries(&self) -> Vec<NetworkSummary> {
        self.networks
            .iter()
            .map(|(label, network)| NetworkSummary {
                label: label.clone(),
                bridge: network.name(),
                subnet: network.subnet().map(|s| s.to_string()),
                internet: network.config().internet,
                refs: network.refcount(),
            })
            .collect()
    }
}

fn summarize(label: &str, machine: &Machine, session: &Session) -> MachineSummary {
    let live = machine.is_live();
    let interfaces = all_of::<NetworkInterface>(machine)
        .into_iter()
        .map(|iface| {
            let mac = live
                .then(|| machine.interface_mac(session, iface).ok())
                .flatten();
            let ips = match mac {
                Some(_) => machine.interface_ips(session, iface).unwrap_or_default(),
                None => Vec::new(),
            };
            InterfaceSummary {
                network: iface.network().label().unwrap_or_default(),
                bridge: iface.network().name(),
                model: iface.model().to_string(),
                mac,
                ips,
            }
        })
        .collect();
    let serial_ptys = if live {
        all_of::<SerialPort>(machine)
            .into_iter()
            .filter_map(|port| machine.serial_pty(session, port).ok())
            .collect()
    } else {
        Vec::new()
    };

    MachineSummary {
        label: label.to_owned(),
        domain: machine.name(),
        uuid: machine.uuid().map(|u| u.to_string()),
        state: machine.state().to_string(),
        interfaces,
        serial_ptys,
    }
}
