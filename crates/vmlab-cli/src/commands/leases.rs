use super::{json_pretty, open_session, settings_for, EXIT_SUCCESS};

pub fn run(backend: &str, uri: Option<&str>, network: &str, json: bool) -> Result<u8, String> {
    let session = open_session(backend, &settings_for(uri, None))?;
    let control_plane = session.connect(None).map_err(|e| e.to_string())?;
    let leases = control_plane
        .network_leases(network)
        .map_err(|e| e.to_string())?;

    if json {
        println!("{}", json_pretty(&leases)?);
    } else if leases.is_empty() {
        println!("no leases on {network}");
    } else {
        println!(
            "{:<20} {:<18} {:<20} HOSTNAME",
            "EXPIRY", "MAC", "ADDRESS"
        );
        for lease in &leases {
            let expiry = lease.expiry.format("%Y-%m-%d %H:%M:%S").to_string();
            let address = format!("{}/{}", lease.ip, lease.prefix);
            println!(
                "{expiry:<20} {:<18} {address:<20} {}",
                lease.mac,
                lease.hostname.as_deref().unwrap_or("-"),
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
