use super::{json_pretty, open_session, settings_for, EXIT_SUCCESS};
use std::collections::HashSet;
use std::path::Path;
use vmlab_core::{shutdown_requested, CoreError};
use vmlab_store::StoreError;

pub fn run(
    backend: &str,
    uri: Option<&str>,
    clone_dir: &Path,
    dry_run: bool,
    json: bool,
) -> Result<u8, String> {
    let session = open_session(backend, &settings_for(uri, Some(clone_dir)))?;
    let clones = session.clones();

    let live: HashSet<String> = session
        .connect(None)
        .and_then(|cp| cp.list_domains().map_err(CoreError::from))
        .map_err(|e| e.to_string())?
        .into_iter()
        .collect();
    let report = clones
        .collect_with_cancel(&live, dry_run, shutdown_requested)
        .map_err(|e| match e {
            StoreError::Locked(_) => format!("store lock: {e}"),
            e => format!("store error: {e}"),
        })?;

    if json {
        let payload = serde_json::json!({
            "dry_run": dry_run,
            "clone_dir": clone_dir,
            "live_machines": live.len(),
            "orphaned": report.orphaned,
            "removed": report.removed,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        let (prefix, count) = if dry_run {
            ("would remove", report.orphaned.len())
        } else {
            ("removed", report.removed)
        };
        println!("gc: {prefix} {count} clones from {}", clone_dir.display());
        if dry_run {
            for path in &report.orphaned {
                println!("  {}", path.display());
            }
        }
    }
    Ok(EXIT_SUCCESS)
}
