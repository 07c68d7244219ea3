use super::{
    colorize_state, json_pretty, load_manifest, open_session, spin_fail, spin_ok, spinner,
    EXIT_SUCCESS,
};
use std::path::Path;
use std::time::{Duration, Instant};
use vmlab_core::{shutdown_requested, Lab, MachineSummary, NetworkSummary, Session};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub fn run(
    manifest: &Path,
    backend: &str,
    uri: Option<&str>,
    timeout: Option<u64>,
    json: bool,
) -> Result<u8, String> {
    let manifest = load_manifest(manifest, uri)?;
    let session = open_session(backend, &manifest.settings)?;
    let lab = Lab::from_manifest(&manifest).map_err(|e| e.to_string())?;

    let pb = if json {
        None
    } else {
        Some(spinner(&format!(
            "bringing up {} machines...",
            manifest.machines.len()
        )))
    };
    if let Err(e) = lab.up_with_cancel(&session, shutdown_requested) {
        if let Some(ref pb) = pb {
            spin_fail(pb, "lab failed to come up");
        }
        return Err(e.to_string());
    }
    if let Some(ref pb) = pb {
        spin_ok(pb, "lab is up");
    }

    report(&lab, &session, json)?;

    if timeout.is_none() && !json {
        eprintln!("press Ctrl-C to tear the lab down");
    }
    wait_for_shutdown(timeout.map(Duration::from_secs));

    let pb = if json {
        None
    } else {
        Some(spinner("tearing down..."))
    };
    lab.down(&session);
    if let Some(ref pb) = pb {
        spin_ok(pb, "lab torn down");
    }
    Ok(EXIT_SUCCESS)
}

fn wait_for_shutdown(timeout: Option<Duration>) {
    let started = Instant::now();
    while !shutdown_requested() {
        if timeout.is_some_and(|t| started.elapsed() >= t) {
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn report(lab: &Lab, session: &Session, json: bool) -> Result<(), String> {
    let machines = lab.machine_summaries(session);
    let networks = lab.network_summaries();
    if json {
        let payload = serde_json::json!({
            "machines": machines,
            "networks": networks,
        });
        println!("{}", json_pretty(&payload)?);
        return Ok(());
    }

    println!("{:<16} {:<10} {:<16} SUBNET", "NETWORK", "REFS", "BRIDGE");
    for net in &networks {
        print_network(net);
    }
    println!();
    println!("{:<16} {:<10} DOMAIN", "MACHINE", "STATE");
    for machine in &machines {
        print_machine(machine);
    }
    Ok(())
}

fn print_network(net: &NetworkSummary) {
    let subnet = net.subnet.as_deref().unwrap_or("-");
    let nat = if net.internet { " (nat)" } else { "" };
    println!(
        "{:<16} {:<10} {:<16} {subnet}{nat}",
        net.label,
        net.refs,
        net.bridge.as_deref().unwrap_or("-"),
    );
}

fn print_machine(machine: &MachineSummary) {
    println!(
        "{:<16} {:<10} {}",
        machine.label,
        colorize_state(&machine.state),
        machine.domain.as_deref().unwrap_or("-"),
    );
    for iface in &machine.interfaces {
        let ips: Vec<String> = iface.ips.iter().map(ToString::to_string).collect();
        println!(
            "  {} {} {} {}",
            iface.network,
            iface.model,
            iface.mac.as_deref().unwrap_or("-"),
            if ips.is_empty() {
                "(no lease yet)".to_owned()
            } else {
                ips.join(", ")
            },
        );
    }
    for (port, pty) in machine.serial_ptys.iter().enumerate() {
        println!("  serial{port} {}", pty.display());
    }
}
