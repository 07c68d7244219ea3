use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DISK_IMAGE_EXTENSION: &str = "qcow2";
pub const FIRMWARE_IMAGE_EXTENSION: &str = "fd";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskBus {
    Virtio,
    Sata,
}

impl DiskBus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Virtio => "virtio",
            Self::Sata => "sata",
        }
    }

    fn target_prefix(self) -> &'static str {
        match self {
            Self::Virtio => "vd",
            Self::Sata => "sd",
        }
    }
}

impl fmt::Display for DiskBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a device works on a disposable copy of its base image or on the
/// base image itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClonePolicy {
    #[default]
    LinkedClone,
    Live,
}

impl ClonePolicy {
    pub fn is_clone(self) -> bool {
        self == Self::LinkedClone
    }
}

/// Requested virtual size for a disk clone, e.g. `20G`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageSize(String);

impl ImageSize {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ImageSize {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_suffix(['K', 'M', 'G', 'T']).unwrap_or(s);
        if digits.is_empty()
            || !digits.bytes().all(|b| b.is_ascii_digit())
            || digits.bytes().all(|b| b == b'0')
        {
            return Err(SchemaError::InvalidSize(s.to_owned()));
        }
        Ok(Self(s.to_owned()))
    }
}

impl TryFrom<String> for ImageSize {
    type Error = SchemaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ImageSize> for String {
    fn from(value: ImageSize) -> Self {
        value.0
    }
}

fn require_extension(
    path: &Path,
    extension: &str,
    expected: &'static str,
) -> Result<PathBuf, SchemaError> {
    if path.extension().and_then(|e| e.to_str()) != Some(extension) {
        return Err(SchemaError::UnsupportedImageFormat {
            path: path.to_path_buf(),
            expected,
        });
    }
    Ok(std::path::absolute(path)?)
}

/// Storage device backed by a qcow2 image. Linked-cloned unless made live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disk {
    image_path: PathBuf,
    bus: DiskBus,
    clone: ClonePolicy,
    expand: Option<ImageSize>,
    label: Option<String>,
}

impl Disk {
    pub fn new(image_path: impl AsRef<Path>, bus: DiskBus) -> Result<Self, SchemaError> {
        Ok(Self {
            image_path: require_extension(image_path.as_ref(), DISK_IMAGE_EXTENSION, ".qcow2")?,
            bus,
            clone: ClonePolicy::LinkedClone,
            expand: None,
            label: None,
        })
    }

    pub fn virtio(image_path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        Self::new(image_path, DiskBus::Virtio)
    }

    pub fn sata(image_path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        Self::new(image_path, DiskBus::Sata)
    }

    /// Use the base image directly. Guest writes persist and the image is
    /// never deleted on release.
    #[must_use]
    pub fn live(mut self) -> Self {
        self.clone = ClonePolicy::Live;
        self
    }

    pub fn with_expand(mut self, size: &str) -> Result<Self, SchemaError> {
        if !self.clone.is_clone() {
            return Err(SchemaError::ExpandRequiresClone(self.image_path));
        }
        self.expand = Some(size.parse()?);
        Ok(self)
    }

    #[must_use]
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_owned());
        self
    }

    pub fn image_path(&self) -> &Path {
        &self.image_path
    }

    pub fn bus(&self) -> DiskBus {
        self.bus
    }

    pub fn clone_policy(&self) -> ClonePolicy {
        self.clone
    }

    pub fn expand(&self) -> Option<&ImageSize> {
        self.expand.as_ref()
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

impl fmt::Display for Disk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.bus {
            DiskBus::Virtio => "VirtioDisk",
            DiskBus::Sata => "SataDisk",
        };
        match self.clone {
            ClonePolicy::LinkedClone => write!(f, "{kind}(base={})", self.image_path.display()),
            ClonePolicy::Live => write!(f, "{kind}({})", self.image_path.display()),
        }
    }
}

/// UEFI variable store. Copied per machine unless made live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    image_path: PathBuf,
    clone: ClonePolicy,
    label: Option<String>,
}

impl FirmwareImage {
    pub fn new(image_path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        Ok(Self {
            image_path: require_extension(image_path.as_ref(), FIRMWARE_IMAGE_EXTENSION, ".fd")?,
            clone: ClonePolicy::LinkedClone,
            label: None,
        })
    }

    #[must_use]
    pub fn live(mut self) -> Self {
        self.clone = ClonePolicy::Live;
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_owned());
        self
    }

    pub fn image_path(&self) -> &Path {
        &self.image_path
    }

    pub fn clone_policy(&self) -> ClonePolicy {
        self.clone
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

impl fmt::Display for FirmwareImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FirmwareImage({})", self.image_path.display())
    }
}

/// ISA serial port backed by a host PTY.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SerialPort {
    label: Option<String>,
}

impl SerialPort {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_owned());
        self
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

impl fmt::Display for SerialPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "SerialPort({label})"),
            None => f.write_str("SerialPort"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterModel {
    #[default]
    Virtio,
    E1000,
}

impl AdapterModel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Virtio => "virtio",
            Self::E1000 => "e1000",
        }
    }
}

impl fmt::Display for AdapterModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Guest-visible target device for a disk: `vda`, `sdb`, ... `vdz`, `vdaa`.
pub fn disk_target_name(bus: DiskBus, slot: usize) -> String {
    let mut letters = Vec::new();
    let mut n = slot + 1;
    while n > 0 {
        n -= 1;
        letters.push(b'a' + (n % 26) as u8);
        n /= 26;
    }
    letters.reverse();
    let mut name = bus.target_prefix().to_owned();
    name.push_str(&String::from_utf8_lossy(&letters));
    name
}
