use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// An IPv4 network in CIDR form. A bare address parses as a `/32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Subnet {
    addr: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Subnet {
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self, SchemaError> {
        if prefix > 32 {
            return Err(SchemaError::InvalidSubnet(format!("{addr}/{prefix}")));
        }
        Ok(Self { addr, prefix })
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    fn mask(&self) -> u32 {
        if self.prefix == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(self.prefix))
        }
    }

    /// Inclusive `[first, last]` address range covered by the subnet.
    pub fn range(&self) -> (u32, u32) {
        let ip = u32::from(self.addr);
        let mask = self.mask();
        (ip & mask, ip | !mask)
    }

    /// Two subnets overlap unless one range ends strictly before the other
    /// begins.
    pub fn overlaps(&self, other: &Self) -> bool {
        let (a_first, a_last) = self.range();
        let (b_first, b_last) = other.range();
        a_first <= b_last && a_last >= b_first
    }
}

impl FromStr for Ipv4Subnet {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SchemaError::InvalidSubnet(s.to_owned());
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, prefix.parse::<u8>().map_err(|_| invalid())?),
            None => (s, 32),
        };
        let addr: Ipv4Addr = addr.parse().map_err(|_| invalid())?;
        Self::new(addr, prefix).map_err(|_| invalid())
    }
}

impl fmt::Display for Ipv4Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// A private `10.x.y.0/24` lab subnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabSubnet {
    second: u8,
    third: u8,
}

impl LabSubnet {
    pub fn new(second: u8, third: u8) -> Self {
        Self { second, third }
    }

    pub fn octets(&self) -> (u8, u8) {
        (self.second, self.third)
    }

    fn host(&self, last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, self.second, self.third, last)
    }

    pub fn gateway(&self) -> Ipv4Addr {
        self.host(1)
    }

    pub fn dhcp_start(&self) -> Ipv4Addr {
        self.host(2)
    }

    pub fn dhcp_end(&self) -> Ipv4Addr {
        self.host(254)
    }

    pub fn as_subnet(&self) -> Ipv4Subnet {
        Ipv4Subnet {
            addr: self.host(0),
            prefix: 24,
        }
    }

    pub fn conflicts_with(&self, routes: &[Ipv4Subnet]) -> bool {
        let candidate = self.as_subnet();
        routes.iter().any(|route| route.overlaps(&candidate))
    }
}

impl fmt::Display for LabSubnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "10.{}.{}.0/24", self.second, self.third)
    }
}
