//! DHCP leases as reported by `virsh net-dhcp-leases`.

use crate::RuntimeError;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde::Serialize;
use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaseType {
    Ipv4,
    Ipv6,
}

/// One active lease. Queried live from the network, never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DhcpLease {
    pub iface: String,
    pub expiry: DateTime<Local>,
    pub lease_type: LeaseType,
    pub mac: String,
    pub ip: IpAddr,
    pub prefix: u8,
    pub hostname: Option<String>,
    pub client_id: Option<String>,
    pub iaid: Option<String>,
}

impl DhcpLease {
    pub fn matches_mac(&self, mac: &str) -> bool {
        self.mac.eq_ignore_ascii_case(mac)
    }
}

fn optional(field: &str) -> Option<String> {
    (field != "-" && !field.is_empty()).then(|| field.to_owned())
}

/// Parse the table printed by `virsh net-dhcp-leases <network>`.
///
/// Expiry times are printed in the host's local time zone. `iface` is the
/// network's bridge, which is named after the network.
pub fn parse_lease_table(iface: &str, table: &str) -> Result<Vec<DhcpLease>, RuntimeError> {
    let mut leases = Vec::new();
    for line in table.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("Expiry") || line.starts_with('-') {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 5 {
            return Err(RuntimeError::LeaseParse(format!("short row: {line}")));
        }
        let bad = |what: &str| RuntimeError::LeaseParse(format!("bad {what} in row: {line}"));

        let naive = NaiveDateTime::parse_from_str(
            &format!("{} {}", fields[0], fields[1]),
            "%Y-%m-%d %H:%M:%S",
        )
        .map_err(|_| bad("expiry"))?;
        let expiry = Local
            .from_local_datetime(&naive)
            .earliest()
            .ok_or_else(|| bad("expiry"))?;

        let lease_type = match fields[3] {
            "ipv4" => LeaseType::Ipv4,
            "ipv6" => LeaseType::Ipv6,
            _ => return Err(bad("protocol")),
        };

        let (ip, prefix) = fields[4].split_once('/').ok_or_else(|| bad("address"))?;
        let ip: IpAddr = ip.parse().map_err(|_| bad("address"))?;
        let prefix: u8 = prefix.parse().map_err(|_| bad("prefix"))?;

        leases.push(DhcpLease {
            iface: iface.to_owned(),
            expiry,
            lease_type,
            mac: fields[2].to_ascii_lowercase(),
            ip,
            prefix,
            hostname: fields.get(5).and_then(|f| optional(f)),
            client_id: fields.get(6).and_then(|f| optional(f)),
            iaid: None,
        });
    }
    Ok(leases)
}
