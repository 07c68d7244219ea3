use super::{open_session, settings_for, EXIT_FAILURE, EXIT_SUCCESS};
use serde::Serialize;
use std::path::Path;
use vmlab_core::Session;

pub fn run(backend: &str, uri: Option<&str>, clone_dir: &Path, json_output: bool) -> Result<u8, String> {
    let mut checks: Vec<Check> = Vec::new();
    let mut all_pass = true;

    if backend == "mock" {
        checks.push(Check::info("prereqs", "Mock backend: host tools not required"));
    } else {
        check_prereqs(&mut checks, &mut all_pass);
    }

    let settings = settings_for(uri, Some(clone_dir));
    match open_session(backend, &settings) {
        Ok(session) => {
            check_control_plane(&session, &mut checks, &mut all_pass);
            if clone_dir.exists() {
                check_clone_store(&session, &mut checks, &mut all_pass);
            } else {
                checks.push(Check::info(
                    "clone_dir",
                    &format!(
                        "Clone directory {} not created yet (will be created on first clone)",
                        clone_dir.display()
                    ),
                ));
            }
        }
        Err(e) => {
            all_pass = false;
            checks.push(Check::fail("backend", &e));
        }
    }

    print_results(&checks, all_pass, json_output)
}

fn check_prereqs(checks: &mut Vec<Check>, all_pass: &mut bool) {
    let missing = vmlab_runtime::check_core_prereqs();
    if missing.is_empty() {
        checks.push(Check::pass("core_tools", "virsh, qemu-img and ip are installed"));
    } else {
        *all_pass = false;
        checks.push(Check::fail(
            "core_tools",
            &format!(
                "Missing prerequisites: {}",
                vmlab_runtime::format_missing(&missing)
            ),
        ));
    }

    let missing = vmlab_runtime::check_tool_prereqs();
    if missing.is_empty() {
        checks.push(Check::pass(
            "interactive_tools",
            "Console, serial and capture tools are installed",
        ));
    } else {
        checks.push(Check::warn(
            "interactive_tools",
            &format!(
                "Optional tools missing: {}",
                vmlab_runtime::format_missing(&missing)
            ),
        ));
    }
}

fn check_control_plane(session: &Session, checks: &mut Vec<Check>, all_pass: &mut bool) {
    let uri = session.default_uri();
    let listed = session
        .connect(None)
        .and_then(|cp| cp.list_domains().map_err(Into::into));
    match listed {
        Ok(domains) => {
            let lab = domains
                .iter()
                .filter(|d| d.starts_with(vmlab_core::MACHINE_PREFIX))
                .count();
            checks.push(Check::pass(
                "control_plane",
                &format!(
                    "Connected to {uri} ({} running domains, {lab} from labs)",
                    domains.len()
                ),
            ));
        }
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "control_plane",
                &format!("Cannot reach {uri}: {e}"),
            ));
        }
    }
}

fn check_clone_store(session: &Session, checks: &mut Vec<Check>, all_pass: &mut bool) {
    let clones = session.clones();
    let root = clones.layout().root().display().to_string();
    match clones.list() {
        Ok(entries) => checks.push(Check::info(
            "clone_dir",
            &format!("{root}: {} clones", entries.len()),
        )),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "clone_dir",
                &format!("Cannot list {root}: {e}"),
            ));
        }
    }

    match clones.try_lock() {
        Ok(Some(_)) => checks.push(Check::pass("store_lock", "Clone store lock is free")),
        Ok(None) => checks.push(Check::warn(
            "store_lock",
            "Clone store lock is held by another process",
        )),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "store_lock",
                &format!("Cannot check clone store lock: {e}"),
            ));
        }
    }
}

fn print_results(checks: &[Check], all_pass: bool, json_output: bool) -> Result<u8, String> {
    if json_output {
        let json = serde_json::json!({
            "healthy": all_pass,
            "checks": checks,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&json).map_err(|e| e.to_string())?
        );
    } else {
        println!("vmlab doctor\n");
        for check in checks {
            let icon = match check.status {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

#[derive(Serialize)]
struct Check {
    name: &'static str,
    status: &'static str,
    message: String,
}

impl Check {
    fn new(name: &'static str, status: &'static str, message: &str) -> Self {
        Self {
            name,
            status,
            message: message.to_owned(),
        }
    }

    fn pass(name: &'static str, message: &str) -> Self {
        Self::new(name, "pass", message)
    }

    fn fail(name: &'static str, message: &str) -> Self {
        Self::new(name, "fail", message)
    }

    fn warn(name: &'static str, message: &str) -> Self {
        Self::new(name, "warn", message)
    }

    fn info(name: &'static str, message: &str) -> Self {
        Self::new(name, "info", message)
    }
}
