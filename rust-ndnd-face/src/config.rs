//! Configuration section model.
//!
//! The configuration file parser lives outside the face system; what arrives
//! here is a parsed hierarchical key/value tree. `ConfigSection` preserves
//! entry order and admits duplicate keys, both of which the face system
//! inspects (duplicate top-level sections are errors, repeated `rule` and
//! predicate entries are lists).

use rust_ndnd_common::Error;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigEntry {
    Value(String),
    Section(ConfigSection),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigSection {
    entries: Vec<(String, ConfigEntry)>,
}

impl ConfigSection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style value entry, mainly for tests and tools.
    pub fn with_value(mut self, key: &str, value: impl ToString) -> Self {
        self.push_value(key, value);
        self
    }

    /// Builder-style subsection entry.
    pub fn with_section(mut self, key: &str, section: ConfigSection) -> Self {
        self.entries
            .push((key.to_string(), ConfigEntry::Section(section)));
        self
    }

    pub fn push_value(&mut self, key: &str, value: impl ToString) {
        self.entries
            .push((key.to_string(), ConfigEntry::Value(value.to_string())));
    }

    pub fn push_section(&mut self, key: &str, section: ConfigSection) {
        self.entries
            .push((key.to_string(), ConfigEntry::Section(section)));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in order, including duplicates.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &ConfigEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Keys of all entries in order, including duplicates.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// The first subsection stored under `key`.
    pub fn child(&self, key: &str) -> Option<&ConfigSection> {
        self.entries.iter().find_map(|(k, v)| match v {
            ConfigEntry::Section(s) if k == key => Some(s),
            _ => None,
        })
    }

    /// All subsections stored under `key`.
    pub fn children<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a ConfigSection> + 'a {
        self.entries.iter().filter_map(move |(k, v)| match v {
            ConfigEntry::Section(s) if k == key => Some(s),
            _ => None,
        })
    }

    /// How many entries carry `key`.
    pub fn count(&self, key: &str) -> usize {
        self.entries.iter().filter(|(k, _)| k == key).count()
    }

    /// The first plain value stored under `key`.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.entries.iter().find_map(|(k, v)| match v {
            ConfigEntry::Value(s) if k == key => Some(s.as_str()),
            _ => None,
        })
    }

    /// All plain values stored under `key`.
    pub fn values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> {
        self.entries.iter().filter_map(move |(k, v)| match v {
            ConfigEntry::Value(s) if k == key => Some(s.as_str()),
            _ => None,
        })
    }

    /// Parses the value under `key`, if present. `scope` qualifies error
    /// messages, e.g. `face_system.udp`.
    pub fn get_parsed<T: FromStr>(&self, key: &str, scope: &str) -> Result<Option<T>, Error> {
        match self.value(key) {
            None => Ok(None),
            Some(raw) => raw.parse::<T>().map(Some).map_err(|_| {
                Error::Config(format!("Invalid value for option {scope}.{key}: '{raw}'"))
            }),
        }
    }

    /// Parses a boolean under `key`. Accepts yes/no, on/off, true/false, 1/0.
    pub fn get_bool(&self, key: &str, scope: &str) -> Result<Option<bool>, Error> {
        match self.value(key) {
            None => Ok(None),
            Some("yes") | Some("on") | Some("true") | Some("1") => Ok(Some(true)),
            Some("no") | Some("off") | Some("false") | Some("0") => Ok(Some(false)),
            Some(raw) => Err(Error::Config(format!(
                "Invalid value for option {scope}.{key}: '{raw}'"
            ))),
        }
    }

    /// Rejects any entry whose key is not in `known`.
    pub fn ensure_known_keys(&self, known: &[&str], scope: &str) -> Result<(), Error> {
        for (key, _) in self.entries() {
            if !known.contains(&key) {
                return Err(Error::Config(format!("Unrecognized option {scope}.{key}")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ConfigSection {
        ConfigSection::new()
            .with_value("port", 6363)
            .with_value("enable_v4", "yes")
            .with_section(
                "whitelist",
                ConfigSection::new().with_value("ifname", "eth0"),
            )
    }

    #[test]
    fn typed_getters() {
        let section = sample();
        assert_eq!(
            section.get_parsed::<u16>("port", "face_system.tcp").unwrap(),
            Some(6363)
        );
        assert_eq!(
            section.get_bool("enable_v4", "face_system.tcp").unwrap(),
            Some(true)
        );
        assert_eq!(
            section.get_parsed::<u16>("missing", "face_system.tcp").unwrap(),
            None
        );
    }

    #[test]
    fn invalid_values_name_the_option() {
        let section = ConfigSection::new().with_value("port", "not-a-port");
        let err = section
            .get_parsed::<u16>("port", "face_system.tcp")
            .unwrap_err();
        assert!(err.to_string().contains("face_system.tcp.port"));
    }

    #[test]
    fn duplicate_keys_are_preserved() {
        let section = ConfigSection::new()
            .with_value("remote", "udp4://192.0.2.1:6363")
            .with_value("remote", "udp4://192.0.2.2:6363");
        assert_eq!(section.count("remote"), 2);
        assert_eq!(section.values("remote").count(), 2);
    }

    #[test]
    fn unknown_keys_detected() {
        let section = sample().with_value("bogus", 1);
        let err = section
            .ensure_known_keys(&["port", "enable_v4", "whitelist"], "face_system.tcp")
            .unwrap_err();
        assert!(err.to_string().contains("face_system.tcp.bogus"));
    }
}
