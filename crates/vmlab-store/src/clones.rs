use crate::image::{is_qcow2, ImageTool};
use crate::layout::CloneLayout;
use crate::lock::StoreLock;
use crate::StoreError;
use serde::Serialize;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use vmlab_schema::ImageSize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CloneKind {
    Disk,
    Nvram,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloneEntry {
    pub path: PathBuf,
    pub machine: String,
    pub kind: CloneKind,
}

#[derive(Debug, Default, Serialize)]
pub struct GcReport {
    pub orphaned: Vec<PathBuf>,
    pub removed: usize,
}

/// Creates, removes and collects per-machine clones of base images.
pub struct CloneStore {
    layout: CloneLayout,
    tool: Arc<dyn ImageTool>,
}

impl std::fmt::Debug for CloneStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloneStore")
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

fn require_base(base: &Path) -> Result<(), StoreError> {
    if !base.is_file() {
        return Err(StoreError::BaseImageMissing(base.to_path_buf()));
    }
    Ok(())
}

fn require_vacant(target: &Path) -> Result<(), StoreError> {
    if target.try_exists()? {
        return Err(StoreError::CloneExists(target.to_path_buf()));
    }
    Ok(())
}

impl CloneStore {
    pub fn new(layout: CloneLayout, tool: Arc<dyn ImageTool>) -> Self {
        Self { layout, tool }
    }

    pub fn layout(&self) -> &CloneLayout {
        &self.layout
    }

    /// Wait for exclusive use of the store.
    pub fn lock(&self) -> Result<StoreLock, StoreError> {
        StoreLock::acquire(&self.layout)
    }

    pub fn try_lock(&self) -> Result<Option<StoreLock>, StoreError> {
        StoreLock::try_acquire(&self.layout)
    }

    /// Create `<machine>-disk<slot>.qcow2` as a copy-on-write overlay of
    /// `base`.
    ///
    /// Fails without invoking the snapshot utility when the base is missing
    /// or not qcow2, or when the clone already exists.
    pub fn create_disk_clone(
        &self,
        base: &Path,
        machine: &str,
        slot: usize,
        size: Option<&ImageSize>,
    ) -> Result<PathBuf, StoreError> {
        require_base(base)?;
        if !is_qcow2(base)? {
            return Err(StoreError::NotQcow2(base.to_path_buf()));
        }
        let target = self.layout.disk_clone(machine, slot);
        require_vacant(&target)?;
        self.layout.initialize()?;

        if let Err(e) = self.tool.create_overlay(base, &target, size) {
            if let Err(cleanup) = remove_if_present(&target) {
                warn!("failed to remove partial clone {}: {cleanup}", target.display());
            }
            return Err(e);
        }
        info!("created disk clone {} from {}", target.display(), base.display());
        Ok(target)
    }

    /// Copy a firmware variable store to `<machine>-nvram.fd`.
    pub fn create_firmware_copy(&self, base: &Path, machine: &str) -> Result<PathBuf, StoreError> {
        require_base(base)?;
        let target = self.layout.nvram_copy(machine);
        require_vacant(&target)?;
        self.layout.initialize()?;

        let mut dst = match OpenOptions::new().write(true).create_new(true).open(&target) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StoreError::CloneExists(target));
            }
            Err(e) => return Err(e.into()),
        };
        let copied = File::open(base).and_then(|mut src| io::copy(&mut src, &mut dst));
        if let Err(e) = copied {
            drop(dst);
            if let Err(cleanup) = remove_if_present(&target) {
                warn!("failed to remove partial copy {}: {cleanup}", target.display());
            }
            return Err(e.into());
        }
        info!("copied firmware image {} to {}", base.display(), target.display());
        Ok(target)
    }

    /// Delete a clone. Returns `false` when it was already gone.
    pub fn remove(&self, path: &Path) -> Result<bool, StoreError> {
        let removed = remove_if_present(path)?;
        if removed {
            debug!("removed clone {}", path.display());
        }
        Ok(removed)
    }

    /// Every clone file in the store, sorted by path.
    pub fn list(&self) -> Result<Vec<CloneEntry>, StoreError> {
        let entries = match fs::read_dir(self.layout.root()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut clones = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(machine) = CloneLayout::owner_of(name) else {
                continue;
            };
            let kind = if name.ends_with(".fd") {
                CloneKind::Nvram
            } else {
                CloneKind::Disk
            };
            clones.push(CloneEntry {
                path: entry.path(),
                machine: machine.to_owned(),
                kind,
            });
        }
        clones.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(clones)
    }

    pub fn collect(
        &self,
        live_machines: &HashSet<String>,
        dry_run: bool,
    ) -> Result<GcReport, StoreError> {
        self.collect_with_cancel(live_machines, dry_run, || false)
    }

    /// Remove clones whose owning machine is not in `live_machines`.
    ///
    /// Fails with [`StoreError::Locked`] while a machine creation holds the
    /// store.
    pub fn collect_with_cancel(
        &self,
        live_machines: &HashSet<String>,
        dry_run: bool,
        should_stop: impl Fn() -> bool,
    ) -> Result<GcReport, StoreError> {
        let _lock = self
            .try_lock()?
            .ok_or_else(|| StoreError::Locked(self.layout.lock_file()))?;
        let mut report = GcReport::default();
        for entry in self.list()? {
            if !live_machines.contains(&entry.machine) {
                report.orphaned.push(entry.path);
            }
        }

        if !dry_run {
            for path in &report.orphaned {
                if should_stop() {
                    break;
                }
                if self.remove(path)? {
                    report.removed += 1;
                }
            }
        }
        Ok(report)
    }
}

fn remove_if_present(path: &Path) -> Result<bool, io::Error> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
