use crate::StoreError;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CLONE_DIR: &str = "/tmp/vmlab/disks";

const DISK_INFIX: &str = "-disk";
const DISK_SUFFIX: &str = ".qcow2";
const NVRAM_SUFFIX: &str = "-nvram.fd";

/// Naming scheme for clone files.
///
/// Disk clones are `<machine>-disk<slot>.qcow2`, firmware copies are
/// `<machine>-nvram.fd`. The owning machine name can be recovered from the
/// file name, which is what stale clone collection relies on.
#[derive(Debug, Clone)]
pub struct CloneLayout {
    root: PathBuf,
}

impl Default for CloneLayout {
    fn default() -> Self {
        Self::new(DEFAULT_CLONE_DIR)
    }
}

impl CloneLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn disk_clone(&self, machine: &str, slot: usize) -> PathBuf {
        self.root.join(format!("{machine}{DISK_INFIX}{slot}{DISK_SUFFIX}"))
    }

    #[inline]
    pub fn nvram_copy(&self, machine: &str) -> PathBuf {
        self.root.join(format!("{machine}{NVRAM_SUFFIX}"))
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.root.join(".lock")
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    /// Machine name encoded in a clone file name, if the name follows the
    /// layout.
    pub fn owner_of(file_name: &str) -> Option<&str> {
        if let Some(machine) = file_name.strip_suffix(NVRAM_SUFFIX) {
            return (!machine.is_empty()).then_some(machine);
        }
        let stem = file_name.strip_suffix(DISK_SUFFIX)?;
        let (machine, slot) = stem.rsplit_once(DISK_INFIX)?;
        if machine.is_empty() || slot.is_empty() || !slot.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(machine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_paths_are_correct() {
        let layout = CloneLayout::new("/tmp/vmlab-test");
        assert_eq!(
            layout.disk_clone("llm_ab", 0),
            PathBuf::from("/tmp/vmlab-test/llm_ab-disk0.qcow2")
        );
        assert_eq!(
            layout.disk_clone("llm_ab", 12),
            PathBuf::from("/tmp/vmlab-test/llm_ab-disk12.qcow2")
        );
        assert_eq!(
            layout.nvram_copy("llm_ab"),
            PathBuf::from("/tmp/vmlab-test/llm_ab-nvram.fd")
        );
        assert_eq!(
            CloneLayout::default().root(),
            Path::new(DEFAULT_CLONE_DIR)
        );
    }

    #[test]
    fn owner_is_recovered_from_file_name() {
        assert_eq!(CloneLayout::owner_of("llm_ab-disk0.qcow2"), Some("llm_ab"));
        assert_eq!(CloneLayout::owner_of("llm_ab-disk17.qcow2"), Some("llm_ab"));
        assert_eq!(CloneLayout::owner_of("llm_ab-nvram.fd"), Some("llm_ab"));
        assert_eq!(CloneLayout::owner_of("my-disk-disk1.qcow2"), Some("my-disk"));
    }

    #[test]
    fn foreign_files_have_no_owner() {
        assert_eq!(CloneLayout::owner_of(".lock"), None);
        assert_eq!(CloneLayout::owner_of("base.qcow2"), None);
        assert_eq!(CloneLayout::owner_of("llm_ab-diskx.qcow2"), None);
        assert_eq!(CloneLayout::owner_of("-disk0.qcow2"), None);
        assert_eq!(CloneLayout::owner_of("-nvram.fd"), None);
    }

    #[test]
    fn initialize_creates_root() {
        let dir = tempfile::tempdir().unwrap();
        let layout = CloneLayout::new(dir.path().join("a").join("b"));
        layout.initialize().unwrap();
        assert!(layout.root().is_dir());
        layout.initialize().unwrap();
    }
}
