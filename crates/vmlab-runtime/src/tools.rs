//! Interactive and host tools driven on behalf of machines and networks.
//!
//! Console viewers and capture tools are launched detached and not waited
//! for. The serial terminal takes over the caller's terminal until it exits.
//! Bridge membership changes run to completion.

use crate::RuntimeError;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{debug, info};

pub fn console_viewer(uri: &str, domain_uuid: &str) -> Command {
    let mut cmd = Command::new("virt-manager");
    cmd.args(["--connect", uri, "--show-domain-console", domain_uuid]);
    cmd
}

pub fn serial_terminal(pty: &Path) -> Command {
    let mut cmd = Command::new("picocom");
    cmd.arg(pty);
    cmd
}

pub fn packet_capture(
    bridge: &str,
    capture_filter: Option<&str>,
    display_filter: Option<&str>,
) -> Command {
    let mut cmd = Command::new("wireshark");
    cmd.args(["-n", "-l", "-k", "-i", bridge]);
    if let Some(filter) = capture_filter {
        cmd.args(["-f", filter]);
    }
    if let Some(filter) = display_filter {
        cmd.args(["-Y", filter]);
    }
    cmd
}

pub fn bridge_attach(host_iface: &str, bridge: &str) -> Command {
    let mut cmd = Command::new("ip");
    cmd.args(["link", "set", "dev", host_iface, "master", bridge]);
    cmd
}

fn program_name(cmd: &Command) -> &'static str {
    match cmd.get_program().to_str() {
        Some("virt-manager") => "virt-manager",
        Some("picocom") => "picocom",
        Some("wireshark") => "wireshark",
        Some("ip") => "ip",
        _ => "tool",
    }
}

/// Start `cmd` without waiting for it. Returns the child's pid.
pub fn spawn_detached(mut cmd: Command) -> Result<u32, RuntimeError> {
    let tool = program_name(&cmd);
    debug!("launching {cmd:?}");
    let child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|source| RuntimeError::Spawn { tool, source })?;
    info!("launched {tool} (pid {})", child.id());
    Ok(child.id())
}

/// Run `cmd` attached to the caller's terminal and wait for it to exit.
pub fn run_interactive(mut cmd: Command) -> Result<(), RuntimeError> {
    let tool = program_name(&cmd);
    debug!("attaching {cmd:?}");
    let status = cmd
        .status()
        .map_err(|source| RuntimeError::Spawn { tool, source })?;
    if !status.success() {
        return Err(RuntimeError::ToolFailed {
            tool,
            code: status.code().unwrap_or(-1),
            stderr: String::new(),
        });
    }
    Ok(())
}

/// Run `cmd` to completion; a non-zero exit is an error.
pub fn run_checked(mut cmd: Command) -> Result<(), RuntimeError> {
    let tool = program_name(&cmd);
    debug!("running {cmd:?}");
    let output = cmd
        .output()
        .map_err(|source| RuntimeError::Spawn { tool, source })?;
    if !output.status.success() {
        return Err(RuntimeError::ToolFailed {
            tool,
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });
    }
    Ok(())
}
