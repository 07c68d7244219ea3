use crate::StoreError;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use tracing::debug;
use vmlab_schema::ImageSize;

/// First four bytes of every qcow2 image (`QFI\xfb`).
pub const QCOW2_MAGIC: [u8; 4] = [0x51, 0x46, 0x49, 0xfb];

/// Whether `path` starts with the qcow2 header magic.
pub fn is_qcow2(path: &Path) -> Result<bool, StoreError> {
    let mut file = File::open(path)?;
    let mut magic = [0u8; 4];
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(magic == QCOW2_MAGIC),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Disk-snapshot utility: creates a copy-on-write image backed by `base`.
pub trait ImageTool: Send + Sync {
    fn create_overlay(
        &self,
        base: &Path,
        target: &Path,
        size: Option<&ImageSize>,
    ) -> Result<(), StoreError>;
}

/// `qemu-img create -f qcow2 -F qcow2 -b <base> <target> [size]`.
#[derive(Debug, Clone)]
pub struct QemuImg {
    program: PathBuf,
}

impl Default for QemuImg {
    fn default() -> Self {
        Self {
            program: PathBuf::from("qemu-img"),
        }
    }
}

impl QemuImg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl ImageTool for QemuImg {
    fn create_overlay(
        &self,
        base: &Path,
        target: &Path,
        size: Option<&ImageSize>,
    ) -> Result<(), StoreError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["create", "-f", "qcow2", "-F", "qcow2", "-b"])
            .arg(base)
            .arg(target);
        if let Some(size) = size {
            cmd.arg(size.as_str());
        }
        debug!("running {cmd:?}");

        let output = cmd.output().map_err(|source| StoreError::ToolSpawn {
            tool: "qemu-img",
            source,
        })?;
        if !output.status.success() {
            return Err(StoreError::ToolFailed {
                tool: "qemu-img",
                target: target.to_path_buf(),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Ok(())
    }
}

/// One recorded `create_overlay` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayCall {
    pub base: PathBuf,
    pub target: PathBuf,
    pub size: Option<String>,
}

/// Image tool that writes a bare qcow2 header instead of running `qemu-img`.
///
/// Used by `--backend mock` and by tests; every call is recorded.
#[derive(Debug, Default)]
pub struct RecordingImageTool {
    calls: Mutex<Vec<OverlayCall>>,
    fail: bool,
}

impl RecordingImageTool {
    pub fn new() -> Self {
        Self::default()
    }

    /// A tool whose every invocation exits non-zero.
    pub fn failing() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn calls(&self) -> Vec<OverlayCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or(0)
    }
}

impl ImageTool for RecordingImageTool {
    fn create_overlay(
        &self,
        base: &Path,
        target: &Path,
        size: Option<&ImageSize>,
    ) -> Result<(), StoreError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(OverlayCall {
                base: base.to_path_buf(),
                target: target.to_path_buf(),
                size: size.map(|s| s.as_str().to_owned()),
            });
        }
        if self.fail {
            return Err(StoreError::ToolFailed {
                tool: "qemu-img",
                target: target.to_path_buf(),
                code: 1,
                stderr: "simulated failure".to_owned(),
            });
        }
        fs::write(target, QCOW2_MAGIC)?;
        Ok(())
    }
}
