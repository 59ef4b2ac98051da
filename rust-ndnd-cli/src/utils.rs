//! Configuration file loading.
//!
//! The structured-text file is parsed by the `config` crate; the
//! `face_system` table is converted into the face system's own section tree.

use anyhow::{bail, Context, Result};
use config::{Value, ValueKind};
use rust_ndnd_face::config::ConfigSection;
use std::path::Path;

/// Loads the `face_system` section of a configuration file.
pub fn load_face_system_section(path: &Path) -> Result<ConfigSection> {
    let settings = config::Config::builder()
        .add_source(config::File::from(path))
        .build()
        .with_context(|| format!("Cannot read configuration file {}", path.display()))?;

    let value: Value = settings
        .get("face_system")
        .with_context(|| format!("{} has no face_system section", path.display()))?;

    to_section(&value).with_context(|| format!("Malformed face_system in {}", path.display()))
}

fn to_section(value: &Value) -> Result<ConfigSection> {
    let ValueKind::Table(table) = &value.kind else {
        bail!("expected a table, found {:?}", value.kind);
    };
    let mut section = ConfigSection::new();
    for (key, child) in table {
        push_entry(&mut section, key, child)?;
    }
    Ok(section)
}

fn push_entry(section: &mut ConfigSection, key: &str, value: &Value) -> Result<()> {
    match &value.kind {
        ValueKind::Table(_) => section.push_section(key, to_section(value)?),
        // an array stands for a repeated key, e.g. several `remote` entries
        ValueKind::Array(items) => {
            for item in items {
                push_entry(section, key, item)?;
            }
        }
        ValueKind::String(s) => section.push_value(key, s),
        ValueKind::Boolean(b) => section.push_value(key, if *b { "yes" } else { "no" }),
        ValueKind::I64(i) => section.push_value(key, i),
        ValueKind::I128(i) => section.push_value(key, i),
        ValueKind::U64(u) => section.push_value(key, u),
        ValueKind::U128(u) => section.push_value(key, u),
        ValueKind::Float(f) => section.push_value(key, f),
        ValueKind::Nil => section.push_value(key, ""),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_nested_sections() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
[face_system.tcp]
port = 6363
enable_v6 = false

[face_system.udp.whitelist]
ifname = ["eth0", "eth1"]
"#
        )
        .unwrap();

        let section = load_face_system_section(file.path()).unwrap();
        let tcp = section.child("tcp").unwrap();
        assert_eq!(tcp.value("port"), Some("6363"));
        assert_eq!(tcp.value("enable_v6"), Some("no"));

        let whitelist = section.child("udp").unwrap().child("whitelist").unwrap();
        assert_eq!(whitelist.values("ifname").count(), 2);
    }
}
