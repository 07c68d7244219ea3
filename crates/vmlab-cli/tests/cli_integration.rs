//! CLI subprocess integration tests.
//!
//! These tests invoke the `vmlab` binary against the mock backend and verify
//! exit codes, stdout content, and JSON output.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const QCOW2_MAGIC: [u8; 4] = [0x51, 0x46, 0x49, 0xfb];

fn vmlab_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_vmlab"));
    cmd.env("VMLAB_SKIP_PREREQS", "1");
    cmd.env_remove("VMLAB_URI");
    cmd
}

fn run(args: &[&str]) -> Output {
    vmlab_bin().args(args).output().unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap()
}

/// A lab with two machines sharing a network; the router also has a disk.
fn write_lab(dir: &Path) -> PathBuf {
    std::fs::write(dir.join("router.qcow2"), QCOW2_MAGIC).unwrap();
    let path = dir.join("vmlab.toml");
    std::fs::write(
        &path,
        format!(
            r#"manifest_version = 1

[settings]
clone_dir = "{clones}"

[networks.lan]

[networks.wan]
internet = true

[[machines]]
label = "router"
disks = [{{ image = "router.qcow2" }}]
serial_ports = [{{}}]
interfaces = [{{ network = "wan" }}, {{ network = "lan" }}]

[[machines]]
label = "client"
interfaces = [{{ network = "lan", model = "e1000" }}]
"#,
            clones = dir.join("clones").display()
        ),
    )
    .unwrap();
    path
}

fn clone_files(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir.join("clones")) {
        Ok(entries) => entries
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().is_some_and(|e| e == "qcow2"))
            .collect(),
        Err(_) => Vec::new(),
    }
}

#[test]
fn cli_version_exits_zero() {
    let output = run(&["--version"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("vmlab"));
}

#[test]
fn cli_help_lists_commands() {
    let output = run(&["--help"]);
    assert!(output.status.success());
    let text = stdout(&output);
    for cmd in ["up", "check", "leases", "type", "gc", "doctor"] {
        assert!(text.contains(cmd), "help should mention {cmd}");
    }
}

#[test]
fn cli_check_valid_manifest_json() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write_lab(dir.path());
    let output = run(&["check", path_str(&manifest), "--json"]);
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(json["valid"], true);
    assert_eq!(json["networks"], serde_json::json!(["lan", "wan"]));
    assert_eq!(json["machines"], serde_json::json!(["router", "client"]));
}

#[test]
fn cli_check_unknown_network_exits_2() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = dir.path().join("vmlab.toml");
    std::fs::write(
        &manifest,
        "manifest_version = 1\n[[machines]]\ninterfaces = [{ network = \"nowhere\" }]\n",
    )
    .unwrap();
    let output = run(&["check", path_str(&manifest)]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn cli_check_missing_manifest_exits_2() {
    let dir = tempfile::tempdir().unwrap();
    let output = run(&["check", path_str(&dir.path().join("absent.toml"))]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("manifest error"));
}

#[test]
fn cli_up_mock_reports_and_tears_down() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write_lab(dir.path());
    let output = run(&[
        "--backend",
        "mock",
        "up",
        path_str(&manifest),
        "--timeout",
        "0",
        "--json",
    ]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    let machines = json["machines"].as_array().unwrap();
    assert_eq!(machines.len(), 2);
    assert_eq!(machines[0]["label"], "router");
    assert_eq!(machines[0]["state"], "live");
    assert!(machines[0]["domain"].as_str().unwrap().starts_with("llm_"));
    assert_eq!(machines[0]["interfaces"].as_array().unwrap().len(), 2);
    assert_eq!(machines[0]["serial_ptys"].as_array().unwrap().len(), 1);
    let lan = json["networks"]
        .as_array()
        .unwrap()
        .iter()
        .find(|n| n["label"] == "lan")
        .unwrap();
    assert_eq!(lan["refs"], 2);

    assert!(clone_files(dir.path()).is_empty());
}

#[test]
fn cli_up_missing_base_image_exits_3() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write_lab(dir.path());
    std::fs::remove_file(dir.path().join("router.qcow2")).unwrap();
    let output = run(&[
        "--backend",
        "mock",
        "up",
        path_str(&manifest),
        "--timeout",
        "0",
    ]);
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn cli_gc_removes_orphaned_clones() {
    let dir = tempfile::tempdir().unwrap();
    let clones = dir.path().join("clones");
    std::fs::create_dir_all(&clones).unwrap();
    std::fs::write(clones.join("llm_gone-disk0.qcow2"), QCOW2_MAGIC).unwrap();
    std::fs::write(clones.join("llm_gone-nvram.fd"), b"vars").unwrap();

    let output = run(&[
        "--backend",
        "mock",
        "gc",
        "--clone-dir",
        path_str(&clones),
        "--dry-run",
        "--json",
    ]);
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(json["orphaned"].as_array().unwrap().len(), 2);
    assert_eq!(json["removed"], 0);
    assert!(clones.join("llm_gone-disk0.qcow2").exists());

    let output = run(&[
        "--backend",
        "mock",
        "gc",
        "--clone-dir",
        path_str(&clones),
        "--json",
    ]);
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(json["removed"], 2);
    assert!(!clones.join("llm_gone-disk0.qcow2").exists());
    assert!(!clones.join("llm_gone-nvram.fd").exists());
}

#[test]
fn cli_gc_refuses_a_busy_store() {
    let dir = tempfile::tempdir().unwrap();
    let clones = dir.path().join("clones");
    std::fs::create_dir_all(&clones).unwrap();
    std::fs::write(clones.join("llm_building-disk0.qcow2"), QCOW2_MAGIC).unwrap();

    let layout = vmlab_store::CloneLayout::new(&clones);
    let held = vmlab_store::StoreLock::acquire(&layout).unwrap();
    let output = run(&["--backend", "mock", "gc", "--clone-dir", path_str(&clones)]);
    assert_eq!(output.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&output.stderr).contains("store lock"));
    assert!(clones.join("llm_building-disk0.qcow2").exists());
    drop(held);
}

#[test]
fn cli_leases_unknown_network_fails() {
    let output = run(&["--backend", "mock", "leases", "lln_missing"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn cli_type_unmapped_character_fails() {
    let output = run(&["--backend", "mock", "type", "llm_missing", "hello!"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("no keycode"));
}

#[test]
fn cli_unknown_backend_fails() {
    let output = run(&["--backend", "hyperv", "leases", "lln_x"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn cli_doctor_mock_json() {
    let dir = tempfile::tempdir().unwrap();
    let output = run(&[
        "--backend",
        "mock",
        "doctor",
        "--clone-dir",
        path_str(&dir.path().join("clones")),
        "--json",
    ]);
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(json["healthy"], true);
    assert!(json["checks"]
        .as_array()
        .unwrap()
        .iter()
        .any(|c| c["name"] == "control_plane" && c["status"] == "pass"));
}

#[test]
fn cli_completions_bash() {
    let output = run(&["completions", "bash"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("vmlab"));
}

#[test]
fn cli_man_pages_written() {
    let dir = tempfile::tempdir().unwrap();
    let man = dir.path().join("man");
    let output = run(&["man-pages", path_str(&man)]);
    assert!(output.status.success());
    assert!(man.join("vmlab.1").exists());
    assert!(man.join("vmlab-up.1").exists());
}
