//! Component declarations, descriptor rendering, and lab manifests for vmlab.
//!
//! This crate defines the schema layer: the hardware profile and device
//! declarations a machine is assembled from (`HardwareProfile`, `Disk`,
//! `FirmwareImage`, `SerialPort`, `AdapterModel`), rendering of libvirt domain
//! and network descriptors (`descriptor`), private subnet arithmetic used to
//! avoid host route collisions (`subnet`), the linux keycode table used for
//! keystroke injection, and TOML lab manifest parsing (`LabManifest`).

pub mod descriptor;
pub mod devices;
pub mod hardware;
pub mod keycodes;
pub mod manifest;
pub mod subnet;

pub use descriptor::{
    render_disk, render_domain, render_interface, render_network, render_serial, xml_escape,
    DiskFragment, Identity, NetbootConfig, NetworkDescriptor,
};
pub use devices::{
    disk_target_name, AdapterModel, ClonePolicy, Disk, DiskBus, FirmwareImage, ImageSize,
    SerialPort,
};
pub use hardware::HardwareProfile;
pub use keycodes::keycode_for;
pub use manifest::{
    parse_manifest_file, parse_manifest_str, DiskSection, FirmwareSection, HardwareSection,
    InterfaceSection, LabManifest, MachineSection, ManifestError, NetworkSection,
    SerialPortSection, Settings,
};
pub use subnet::{Ipv4Subnet, LabSubnet};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("unsupported image format for '{path}': expected a {expected} file")]
    UnsupportedImageFormat {
        path: PathBuf,
        expected: &'static str,
    },
    #[error("invalid image size '{0}', expected <digits>[K|M|G|T]")]
    InvalidSize(String),
    #[error("disk expansion requires a linked clone: {0}")]
    ExpandRequiresClone(PathBuf),
    #[error("invalid subnet '{0}'")]
    InvalidSubnet(String),
    #[error("failed to resolve image path: {0}")]
    Io(#[from] std::io::Error),
}
