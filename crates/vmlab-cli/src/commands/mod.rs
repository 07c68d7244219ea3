pub mod check;
pub mod completions;
pub mod doctor;
pub mod gc;
pub mod leases;
pub mod man_pages;
pub mod type_text;
pub mod up;

use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use vmlab_core::Session;
use vmlab_schema::{parse_manifest_file, LabManifest, Settings};

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_MANIFEST_ERROR: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        style("{spinner:.cyan} {msg}")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(style("{msg}"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(style("{msg}"));
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_state(state: &str) -> String {
    use console::Style;
    match state {
        "live" => Style::new().green().bold().apply_to(state).to_string(),
        "defined" => Style::new().yellow().apply_to(state).to_string(),
        "torn-down" => Style::new().dim().apply_to(state).to_string(),
        other => other.to_owned(),
    }
}

/// Parse and validate a manifest, applying a `--uri` override.
pub fn load_manifest(path: &Path, uri: Option<&str>) -> Result<LabManifest, String> {
    let mut manifest = parse_manifest_file(path).map_err(|e| format!("manifest error: {e}"))?;
    if let Some(uri) = uri {
        uri.clone_into(&mut manifest.settings.uri);
    }
    Ok(manifest)
}

/// Settings for commands that run without a manifest.
pub fn settings_for(uri: Option<&str>, clone_dir: Option<&Path>) -> Settings {
    let mut settings = Settings::default();
    if let Some(uri) = uri {
        uri.clone_into(&mut settings.uri);
    }
    if let Some(dir) = clone_dir {
        settings.clone_dir = PathBuf::from(dir);
    }
    settings
}

pub fn open_session(backend: &str, settings: &Settings) -> Result<Session, String> {
    Session::new(backend, settings).map_err(|e| e.to_string())
}
