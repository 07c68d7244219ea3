use crate::RuntimeError;
use serde::Deserialize;
use std::process::Command;
use tracing::debug;
use vmlab_schema::Ipv4Subnet;

/// Source of the host's current routes, consulted before allocating a lab
/// subnet.
pub trait RouteSource: Send + Sync {
    fn routes(&self) -> Result<Vec<Ipv4Subnet>, RuntimeError>;
}

#[derive(Debug, Deserialize)]
struct RouteEntry {
    dst: String,
}

/// Destinations from `ip --json route` output.
///
/// `default` and anything that is not an IPv4 network are skipped; a bare
/// address counts as a `/32`.
pub fn parse_ip_routes(json: &str) -> Result<Vec<Ipv4Subnet>, RuntimeError> {
    let entries: Vec<RouteEntry> = serde_json::from_str(json)?;
    Ok(entries
        .iter()
        .filter(|e| e.dst != "default")
        .filter_map(|e| e.dst.parse().ok())
        .collect())
}

/// Routes read from `ip --json route`.
#[derive(Debug, Default, Clone, Copy)]
pub struct IpRoute;

impl RouteSource for IpRoute {
    fn routes(&self) -> Result<Vec<Ipv4Subnet>, RuntimeError> {
        let output = Command::new("ip")
            .args(["--json", "route"])
            .output()
            .map_err(|source| RuntimeError::Spawn { tool: "ip", source })?;
        if !output.status.success() {
            return Err(RuntimeError::ToolFailed {
                tool: "ip",
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        let routes = parse_ip_routes(&String::from_utf8_lossy(&output.stdout))?;
        debug!("host has {} routes", routes.len());
        Ok(routes)
    }
}

/// Fixed route table.
#[derive(Debug, Default, Clone)]
pub struct StaticRoutes(pub Vec<Ipv4Subnet>);

impl RouteSource for StaticRoutes {
    fn routes(&self) -> Result<Vec<Ipv4Subnet>, RuntimeError> {
        Ok(self.0.clone())
    }
}
