//! Linked-clone storage for vmlab machines.
//!
//! This crate owns the on-disk side of a machine: `CloneLayout` names the
//! per-machine clone files, `CloneStore` creates copy-on-write disk clones and
//! firmware-state copies, releases them, and garbage-collects clones whose
//! machine is no longer live. `StoreLock` serializes collection with machine
//! creation. `ImageTool` abstracts the disk-snapshot utility (`qemu-img`)
//! behind a trait so tests can record invocations.

pub mod clones;
pub mod image;
pub mod layout;
pub mod lock;

pub use clones::{CloneEntry, CloneKind, CloneStore, GcReport};
pub use image::{is_qcow2, ImageTool, OverlayCall, QemuImg, RecordingImageTool, QCOW2_MAGIC};
pub use layout::{CloneLayout, DEFAULT_CLONE_DIR};
pub use lock::StoreLock;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("clone store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("base image not found: {0}")]
    BaseImageMissing(PathBuf),
    #[error("base image is not a qcow2 container: {0}")]
    NotQcow2(PathBuf),
    #[error("clone already exists: {0}")]
    CloneExists(PathBuf),
    #[error("clone store is in use by another operation: {0}")]
    Locked(PathBuf),
    #[error("{tool} failed for '{target}' (exit {code}): {stderr}")]
    ToolFailed {
        tool: &'static str,
        target: PathBuf,
        code: i32,
        stderr: String,
    },
    #[error("failed to run {tool}: {source}")]
    ToolSpawn {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    /// Precondition failures are caller mistakes and are never retried.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::BaseImageMissing(_) | Self::NotQcow2(_) | Self::CloneExists(_)
        )
    }
}
