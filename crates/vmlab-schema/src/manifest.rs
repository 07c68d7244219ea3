use crate::descriptor::NetbootConfig;
use crate::devices::{AdapterModel, Disk, DiskBus, FirmwareImage, SerialPort};
use crate::hardware::HardwareProfile;
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse manifest: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("unsupported manifest_version: {0}, expected 1")]
    UnsupportedVersion(u32),
    #[error("machine '{machine}' references unknown network '{network}'")]
    UnknownNetwork { machine: String, network: String },
    #[error("invalid device in machine '{machine}': {source}")]
    Device {
        machine: String,
        #[source]
        source: SchemaError,
    },
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LabManifest {
    pub manifest_version: u32,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkSection>,
    #[serde(default)]
    pub machines: Vec<MachineSection>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default = "default_uri")]
    pub uri: String,
    #[serde(default = "default_clone_dir")]
    pub clone_dir: PathBuf,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
    #[serde(default = "default_keystroke_delay_ms")]
    pub keystroke_delay_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            clone_dir: default_clone_dir(),
            retry_attempts: default_retry_attempts(),
            retry_interval_secs: default_retry_interval_secs(),
            keystroke_delay_ms: default_keystroke_delay_ms(),
        }
    }
}

fn default_uri() -> String {
    "qemu:///system".to_owned()
}

fn default_clone_dir() -> PathBuf {
    PathBuf::from("/tmp/vmlab/disks")
}

fn default_retry_attempts() -> u32 {
    10
}

fn default_retry_interval_secs() -> u64 {
    3
}

fn default_keystroke_delay_ms() -> u64 {
    50
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct NetworkSection {
    #[serde(default)]
    pub internet: bool,
    #[serde(default)]
    pub netboot_root: Option<PathBuf>,
    #[serde(default = "default_netboot_file")]
    pub netboot_file: String,
}

fn default_netboot_file() -> String {
    "pxelinux.0".to_owned()
}

impl NetworkSection {
    pub fn netboot(&self) -> Option<NetbootConfig> {
        self.netboot_root.as_ref().map(|root| NetbootConfig {
            root: root.clone(),
            boot_file: self.netboot_file.clone(),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MachineSection {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub hardware: Option<HardwareSection>,
    #[serde(default)]
    pub firmware: Option<FirmwareSection>,
    #[serde(default)]
    pub disks: Vec<DiskSection>,
    #[serde(default)]
    pub serial_ports: Vec<SerialPortSection>,
    #[serde(default)]
    pub interfaces: Vec<InterfaceSection>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HardwareSection {
    #[serde(default)]
    pub arch: Option<String>,
    #[serde(default)]
    pub chipset: Option<String>,
    #[serde(default)]
    pub ram_mib: Option<u32>,
    #[serde(default)]
    pub cpu_count: Option<u32>,
    #[serde(default)]
    pub efi_image: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FirmwareSection {
    pub image: PathBuf,
    #[serde(default = "default_true")]
    pub linked_clone: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DiskSection {
    pub image: PathBuf,
    #[serde(default = "default_bus")]
    pub bus: DiskBus,
    #[serde(default = "default_true")]
    pub linked_clone: bool,
    #[serde(default)]
    pub expand: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SerialPortSection {
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct InterfaceSection {
    pub network: String,
    #[serde(default)]
    pub model: AdapterModel,
    #[serde(default)]
    pub netboot: bool,
}

fn default_true() -> bool {
    true
}

fn default_bus() -> DiskBus {
    DiskBus::Virtio
}

impl MachineSection {
    /// Name used in error messages: the label, or the position in the manifest.
    pub fn display_name(&self, index: usize) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| format!("machines[{index}]"))
    }

    pub fn hardware_profile(&self) -> Option<HardwareProfile> {
        let hw = self.hardware.as_ref()?;
        let mut profile = HardwareProfile::default();
        if let Some(ref arch) = hw.arch {
            profile = profile.with_arch(arch);
        }
        if let Some(ref chipset) = hw.chipset {
            profile = profile.with_chipset(chipset);
        }
        if let Some(ram) = hw.ram_mib {
            profile = profile.with_ram_mib(ram);
        }
        if let Some(cpus) = hw.cpu_count {
            profile = profile.with_cpu_count(cpus);
        }
        if let Some(ref efi) = hw.efi_image {
            profile = profile.with_efi_image(efi);
        }
        Some(profile)
    }

    pub fn firmware_image(&self) -> Result<Option<FirmwareImage>, SchemaError> {
        let Some(ref fw) = self.firmware else {
            return Ok(None);
        };
        let image = FirmwareImage::new(&fw.image)?;
        Ok(Some(if fw.linked_clone { image } else { image.live() }))
    }

    pub fn disk_devices(&self) -> Result<Vec<Disk>, SchemaError> {
        self.disks
            .iter()
            .map(|section| {
                let mut disk = Disk::new(&section.image, section.bus)?;
                if !section.linked_clone {
                    disk = disk.live();
                }
                if let Some(ref size) = section.expand {
                    disk = disk.with_expand(size)?;
                }
                Ok(disk)
            })
            .collect()
    }

    pub fn serial_port_devices(&self) -> Vec<SerialPort> {
        self.serial_ports
            .iter()
            .map(|section| match section.label {
                Some(ref label) => SerialPort::new().with_label(label),
                None => SerialPort::new(),
            })
            .collect()
    }
}

impl LabManifest {
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.manifest_version != 1 {
            return Err(ManifestError::UnsupportedVersion(self.manifest_version));
        }
        if self.settings.retry_attempts == 0 {
            return Err(ManifestError::InvalidSettings(
                "retry_attempts must be at least 1".to_owned(),
            ));
        }
        if self.settings.uri.trim().is_empty() {
            return Err(ManifestError::InvalidSettings(
                "uri must not be empty".to_owned(),
            ));
        }

        for (index, machine) in self.machines.iter().enumerate() {
            let name = machine.display_name(index);
            for iface in &machine.interfaces {
                if !self.networks.contains_key(&iface.network) {
                    return Err(ManifestError::UnknownNetwork {
                        machine: name,
                        network: iface.network.clone(),
                    });
                }
            }
            let device_err = |source| ManifestError::Device {
                machine: name.clone(),
                source,
            };
            machine.disk_devices().map_err(device_err)?;
            machine.firmware_image().map_err(device_err)?;
        }
        Ok(())
    }

    /// Resolve every relative path in the manifest against `base`.
    pub fn resolve_relative_to(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };

        resolve(&mut self.settings.clone_dir);
        for network in self.networks.values_mut() {
            if let Some(ref mut root) = network.netboot_root {
                resolve(root);
            }
        }
        for machine in &mut self.machines {
            if let Some(ref mut hw) = machine.hardware {
                if let Some(ref mut efi) = hw.efi_image {
                    resolve(efi);
                }
            }
            if let Some(ref mut fw) = machine.firmware {
                resolve(&mut fw.image);
            }
            for disk in &mut machine.disks {
                resolve(&mut disk.image);
            }
        }
    }
}

pub fn parse_manifest_str(input: &str) -> Result<LabManifest, ManifestError> {
    let manifest: LabManifest = toml::from_str(input)?;
    manifest.validate()?;
    Ok(manifest)
}

/// Parse a manifest file; relative paths are taken relative to its directory.
pub fn parse_manifest_file(path: impl AsRef<Path>) -> Result<LabManifest, ManifestError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    let mut manifest: LabManifest = toml::from_str(&content)?;
    let base = path.parent().unwrap_or(Path::new("."));
    manifest.resolve_relative_to(&std::path::absolute(base)?);
    manifest.validate()?;
    Ok(manifest)
}
