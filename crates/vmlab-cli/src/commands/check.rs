use super::{json_pretty, load_manifest, EXIT_SUCCESS};
use std::path::Path;
use vmlab_core::Lab;

pub fn run(manifest_path: &Path, json: bool) -> Result<u8, String> {
    let manifest = load_manifest(manifest_path, None)?;
    let lab = Lab::from_manifest(&manifest).map_err(|e| e.to_string())?;

    let networks: Vec<&str> = lab.networks().map(|(label, _)| label).collect();
    let machines: Vec<&str> = lab.machines().map(|(label, _)| label).collect();
    if json {
        let payload = serde_json::json!({
            "manifest": manifest_path,
            "valid": true,
            "uri": manifest.settings.uri,
            "clone_dir": manifest.settings.clone_dir,
            "networks": networks,
            "machines": machines,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "{}: {} networks, {} machines",
            manifest_path.display(),
            networks.len(),
            machines.len()
        );
        for (label, machine) in lab.machines() {
            println!("  {label}: {machine}");
        }
    }
    Ok(EXIT_SUCCESS)
}
