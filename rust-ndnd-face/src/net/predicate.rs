//! Whitelist/blacklist predicates over network interfaces.
//!
//! A predicate accepts an interface iff it matches the whitelist and does
//! not match the blacklist. The default whitelist matches everything and
//! the default blacklist nothing.

use crate::config::ConfigSection;
use crate::net::NetworkInterfaceInfo;
use ipnetwork::IpNetwork;
use pnet::util::MacAddr;
use rust_ndnd_common::Error;

#[derive(Debug, Clone, PartialEq)]
enum PredicateRule {
    Any,
    Ifname(String),
    Ether(MacAddr),
    Subnet(IpNetwork),
}

impl PredicateRule {
    fn matches(&self, netif: &NetworkInterfaceInfo) -> bool {
        match self {
            PredicateRule::Any => true,
            PredicateRule::Ifname(name) => netif.name == *name,
            PredicateRule::Ether(mac) => netif.mac == Some(*mac),
            PredicateRule::Subnet(subnet) => {
                netif.ips.iter().any(|net| subnet.contains(net.ip()))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NetworkInterfacePredicate {
    whitelist: Vec<PredicateRule>,
    blacklist: Vec<PredicateRule>,
}

impl Default for NetworkInterfacePredicate {
    fn default() -> Self {
        Self {
            whitelist: vec![PredicateRule::Any],
            blacklist: Vec::new(),
        }
    }
}

impl NetworkInterfacePredicate {
    /// Reads optional `whitelist`/`blacklist` subsections of `section`.
    ///
    /// A repeated list is a configuration error.
    pub fn from_section(section: &ConfigSection, scope: &str) -> Result<Self, Error> {
        let mut predicate = Self::default();

        match section.count("whitelist") {
            0 => {}
            1 => {
                let child = section.child("whitelist").unwrap();
                predicate.whitelist = parse_rules(child, &format!("{scope}.whitelist"))?;
            }
            _ => {
                return Err(Error::Config(format!("Duplicate section {scope}.whitelist")));
            }
        }
        match section.count("blacklist") {
            0 => {}
            1 => {
                let child = section.child("blacklist").unwrap();
                predicate.blacklist = parse_rules(child, &format!("{scope}.blacklist"))?;
            }
            _ => {
                return Err(Error::Config(format!("Duplicate section {scope}.blacklist")));
            }
        }

        Ok(predicate)
    }

    pub fn accepts(&self, netif: &NetworkInterfaceInfo) -> bool {
        self.whitelist.iter().any(|rule| rule.matches(netif))
            && !self.blacklist.iter().any(|rule| rule.matches(netif))
    }
}

fn parse_rules(section: &ConfigSection, scope: &str) -> Result<Vec<PredicateRule>, Error> {
    let mut rules = Vec::new();
    for (key, entry) in section.entries() {
        let value = match entry {
            crate::config::ConfigEntry::Value(v) => v.as_str(),
            crate::config::ConfigEntry::Section(_) => {
                return Err(Error::Config(format!("Unexpected subsection {scope}.{key}")));
            }
        };
        let rule = match key {
            "*" => PredicateRule::Any,
            "ifname" => {
                if value.is_empty() {
                    return Err(Error::Config(format!("Empty {scope}.ifname")));
                }
                PredicateRule::Ifname(value.to_string())
            }
            "ether" => PredicateRule::Ether(value.parse::<MacAddr>().map_err(|_| {
                Error::Config(format!("Invalid value for option {scope}.ether: '{value}'"))
            })?),
            "subnet" => PredicateRule::Subnet(value.parse::<IpNetwork>().map_err(|_| {
                Error::Config(format!("Invalid value for option {scope}.subnet: '{value}'"))
            })?),
            _ => {
                return Err(Error::Config(format!("Unrecognized option {scope}.{key}")));
            }
        };
        rules.push(rule);
    }
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::test_support::fake_netif;

    fn eth0() -> NetworkInterfaceInfo {
        fake_netif(
            2,
            "eth0",
            Some("3e:15:c2:8b:65:00".parse().unwrap()),
            &["192.0.2.1/24", "2001:db8::2/64"],
            true,
            false,
        )
    }

    fn eth1() -> NetworkInterfaceInfo {
        fake_netif(
            3,
            "eth1",
            Some("3e:15:c2:8b:65:01".parse().unwrap()),
            &["198.51.100.1/24"],
            true,
            false,
        )
    }

    #[test]
    fn default_accepts_everything() {
        let predicate = NetworkInterfacePredicate::default();
        assert!(predicate.accepts(&eth0()));
        assert!(predicate.accepts(&eth1()));
    }

    #[test]
    fn whitelist_by_ifname() {
        let section = ConfigSection::new().with_section(
            "whitelist",
            ConfigSection::new().with_value("ifname", "eth0"),
        );
        let predicate = NetworkInterfacePredicate::from_section(&section, "test").unwrap();
        assert!(predicate.accepts(&eth0()));
        assert!(!predicate.accepts(&eth1()));
    }

    #[test]
    fn blacklist_by_subnet() {
        let section = ConfigSection::new().with_section(
            "blacklist",
            ConfigSection::new().with_value("subnet", "198.51.100.0/24"),
        );
        let predicate = NetworkInterfacePredicate::from_section(&section, "test").unwrap();
        assert!(predicate.accepts(&eth0()));
        assert!(!predicate.accepts(&eth1()));
    }

    #[test]
    fn whitelist_by_ether() {
        let section = ConfigSection::new().with_section(
            "whitelist",
            ConfigSection::new().with_value("ether", "3e:15:c2:8b:65:01"),
        );
        let predicate = NetworkInterfacePredicate::from_section(&section, "test").unwrap();
        assert!(!predicate.accepts(&eth0()));
        assert!(predicate.accepts(&eth1()));
    }

    #[test]
    fn star_matches_all() {
        let section = ConfigSection::new()
            .with_section("whitelist", ConfigSection::new().with_value("*", ""));
        let predicate = NetworkInterfacePredicate::from_section(&section, "test").unwrap();
        assert!(predicate.accepts(&eth0()));
    }

    #[test]
    fn duplicate_list_rejected() {
        let section = ConfigSection::new()
            .with_section("whitelist", ConfigSection::new())
            .with_section("whitelist", ConfigSection::new());
        let err = NetworkInterfacePredicate::from_section(&section, "test").unwrap_err();
        assert!(err.to_string().contains("Duplicate section"));
    }

    #[test]
    fn malformed_entries_rejected() {
        let section = ConfigSection::new().with_section(
            "whitelist",
            ConfigSection::new().with_value("subnet", "not-a-subnet"),
        );
        assert!(NetworkInterfacePredicate::from_section(&section, "test").is_err());

        let section = ConfigSection::new().with_section(
            "blacklist",
            ConfigSection::new().with_value("bogus", "x"),
        );
        assert!(NetworkInterfacePredicate::from_section(&section, "test").is_err());
    }
}
