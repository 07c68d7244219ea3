use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub const DEFAULT_ARCH: &str = "x86_64";
pub const DEFAULT_CHIPSET: &str = "pc-q35-6.2";
pub const DEFAULT_RAM_MIB: u32 = 256;
pub const DEFAULT_CPU_COUNT: u32 = 1;

/// CPU, chipset, RAM and firmware description of a machine.
///
/// Exactly one profile belongs to every machine. When a caller omits it, the
/// machine synthesizes `HardwareProfile::default()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareProfile {
    pub arch: String,
    pub chipset: String,
    pub ram_mib: u32,
    pub cpu_count: u32,
    /// Read-only UEFI code image loaded as pflash.
    pub efi_image: Option<PathBuf>,
    pub label: Option<String>,
}

impl Default for HardwareProfile {
    fn default() -> Self {
        Self {
            arch: DEFAULT_ARCH.to_owned(),
            chipset: DEFAULT_CHIPSET.to_owned(),
            ram_mib: DEFAULT_RAM_MIB,
            cpu_count: DEFAULT_CPU_COUNT,
            efi_image: None,
            label: None,
        }
    }
}

impl HardwareProfile {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_arch(mut self, arch: &str) -> Self {
        arch.clone_into(&mut self.arch);
        self
    }

    #[must_use]
    pub fn with_chipset(mut self, chipset: &str) -> Self {
        chipset.clone_into(&mut self.chipset);
        self
    }

    #[must_use]
    pub fn with_ram_mib(mut self, ram_mib: u32) -> Self {
        self.ram_mib = ram_mib;
        self
    }

    #[must_use]
    pub fn with_cpu_count(mut self, cpu_count: u32) -> Self {
        self.cpu_count = cpu_count;
        self
    }

    #[must_use]
    pub fn with_efi_image(mut self, path: impl Into<PathBuf>) -> Self {
        self.efi_image = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_owned());
        self
    }
}

impl fmt::Display for HardwareProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HardwareProfile({}, {}, {} MiB, {} cpu)",
            self.arch, self.chipset, self.ram_mib, self.cpu_count
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_profile_values() {
        let p = HardwareProfile::default();
        assert_eq!(p.arch, "x86_64");
        assert_eq!(p.chipset, "pc-q35-6.2");
        assert_eq!(p.ram_mib, 256);
        assert_eq!(p.cpu_count, 1);
        assert!(p.efi_image.is_none());
    }

    #[test]
    fn builder_overrides_fields() {
        let p = HardwareProfile::new()
            .with_ram_mib(1024)
            .with_cpu_count(4)
            .with_efi_image("/usr/share/OVMF/OVMF_CODE.fd")
            .with_label("big");
        assert_eq!(p.ram_mib, 1024);
        assert_eq!(p.cpu_count, 4);
        assert_eq!(p.label.as_deref(), Some("big"));
        assert!(p.to_string().contains("1024 MiB"));
    }
}
