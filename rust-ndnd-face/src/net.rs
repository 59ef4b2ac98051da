//! Network-interface enumeration.
//!
//! Factories receive a read-only snapshot of the host's interfaces once per
//! configuration pass; tests inject synthetic snapshots.

pub mod predicate;

use ipnetwork::IpNetwork;
use pnet::datalink;
use pnet::util::MacAddr;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// A read-only snapshot of one network interface.
#[derive(Debug, Clone)]
pub struct NetworkInterfaceInfo {
    pub index: u32,
    pub name: String,
    pub mac: Option<MacAddr>,
    pub ips: Vec<IpNetwork>,
    pub is_up: bool,
    pub is_loopback: bool,
    pub is_multicast: bool,
    pub is_broadcast: bool,
}

impl NetworkInterfaceInfo {
    pub fn ipv4_addresses(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.ips.iter().filter_map(|net| match net {
            IpNetwork::V4(v4) => Some(v4.ip()),
            IpNetwork::V6(_) => None,
        })
    }

    pub fn ipv6_addresses(&self) -> impl Iterator<Item = Ipv6Addr> + '_ {
        self.ips.iter().filter_map(|net| match net {
            IpNetwork::V4(_) => None,
            IpNetwork::V6(v6) => Some(v6.ip()),
        })
    }

    /// Directed broadcast addresses of the interface's IPv4 subnets.
    pub fn ipv4_broadcast_addresses(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.ips.iter().filter_map(|net| match net {
            IpNetwork::V4(v4) => Some(v4.broadcast()),
            IpNetwork::V6(_) => None,
        })
    }

    pub fn has_ipv4(&self) -> bool {
        self.ipv4_addresses().next().is_some()
    }

    pub fn has_ipv6(&self) -> bool {
        self.ipv6_addresses().next().is_some()
    }

    pub fn first_ipv4(&self) -> Option<Ipv4Addr> {
        self.ipv4_addresses().next()
    }

    pub fn has_address(&self, addr: IpAddr) -> bool {
        self.ips.iter().any(|net| net.ip() == addr)
    }

    /// Whether this interface can carry a multicast face.
    pub fn can_multicast(&self) -> bool {
        self.is_up && !self.is_loopback && self.is_multicast
    }
}

/// Enumerates the host's network interfaces.
pub fn collect_interfaces() -> Vec<NetworkInterfaceInfo> {
    datalink::interfaces()
        .into_iter()
        .map(|iface| NetworkInterfaceInfo {
            index: iface.index,
            name: iface.name.clone(),
            mac: iface.mac,
            ips: iface.ips.clone(),
            is_up: iface.is_up(),
            is_loopback: iface.is_loopback(),
            is_multicast: iface.is_multicast(),
            is_broadcast: iface.is_broadcast(),
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Builds a synthetic interface snapshot for factory tests.
    pub fn fake_netif(
        index: u32,
        name: &str,
        mac: Option<MacAddr>,
        ips: &[&str],
        is_up: bool,
        is_loopback: bool,
    ) -> NetworkInterfaceInfo {
        NetworkInterfaceInfo {
            index,
            name: name.to_string(),
            mac,
            ips: ips.iter().map(|s| s.parse().unwrap()).collect(),
            is_up,
            is_loopback,
            is_multicast: true,
            is_broadcast: !is_loopback,
        }
    }
}
