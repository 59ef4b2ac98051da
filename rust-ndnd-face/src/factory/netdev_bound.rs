//! Netdev-bound face rules.
//!
//! A rule names one or more remote URIs plus an interface predicate. For
//! each (rule-remote, matching interface) pair one face is created through
//! the factory providing the `scheme+dev` sub-scheme, with the socket bound
//! to the device. Reconfiguration diffs the desired pair set against the
//! live one.

use crate::channel::Channel;
use crate::config::ConfigSection;
use crate::face::Face;
use crate::factory::{
    ConfigContext, FaceCreateRequest, FaceCreationError, ProtocolFactory,
};
use crate::net::predicate::NetworkInterfacePredicate;
use async_trait::async_trait;
use log::{debug, warn};
use rust_ndnd_common::uri::FaceUri;
use rust_ndnd_common::Error;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

const SCOPE: &str = "face_system.netdev_bound";

/// Resolves a URI scheme to the factory providing it.
pub type SchemeLookup =
    Arc<dyn Fn(&str) -> Option<Arc<dyn ProtocolFactory>> + Send + Sync>;

#[derive(Clone, Debug)]
struct Rule {
    remotes: Vec<FaceUri>,
    predicate: NetworkInterfacePredicate,
}

fn parse_rule(index: usize, section: &ConfigSection) -> Result<Rule, Error> {
    let rule_scope = format!("{SCOPE}.rule[{index}]");
    let mut remotes = Vec::new();

    for (key, entry) in section.entries() {
        match (key, entry) {
            ("remote", crate::config::ConfigEntry::Value(raw)) => {
                let uri: FaceUri = raw.parse().map_err(|_| {
                    Error::Config(format!("{rule_scope}: invalid remote FaceUri '{raw}'"))
                })?;
                if !uri.is_canonical() {
                    return Err(Error::Config(format!(
                        "{rule_scope}: remote FaceUri '{raw}' is not canonical"
                    )));
                }
                remotes.push(uri);
            }
            ("whitelist", _) | ("blacklist", _) => {
                // handled below through the shared predicate parser
            }
            _ => {
                return Err(Error::Config(format!(
                    "{rule_scope}: unrecognized option {key}"
                )));
            }
        }
    }

    if remotes.is_empty() {
        return Err(Error::Config(format!(
            "{rule_scope}: remote FaceUri is missing"
        )));
    }

    let predicate = NetworkInterfacePredicate::from_section(section, &rule_scope)?;
    Ok(Rule { remotes, predicate })
}

/// Key of a netdev-bound face: remote URI plus interface name.
type Key = (String, String);

enum Slot {
    /// Creation in flight.
    Pending(JoinHandle<()>),
    Ready(Arc<Face>),
}

#[derive(Default)]
struct Inner {
    rules: Vec<Rule>,
    faces: HashMap<Key, Slot>,
}

pub struct NetdevBound {
    lookup: SchemeLookup,
    inner: Arc<Mutex<Inner>>,
}

impl NetdevBound {
    pub fn new(lookup: SchemeLookup) -> Self {
        Self {
            lookup,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }
}

#[async_trait]
impl ProtocolFactory for NetdevBound {
    fn id(&self) -> &'static str {
        "netdev_bound"
    }

    fn provided_schemes(&self) -> Vec<String> {
        Vec::new()
    }

    fn process_config(
        &self,
        section: Option<&ConfigSection>,
        context: &ConfigContext,
    ) -> Result<(), Error> {
        let mut rules = Vec::new();
        if let Some(section) = section {
            let mut index = 0;
            for (key, entry) in section.entries() {
                match (key, entry) {
                    ("rule", crate::config::ConfigEntry::Section(rule_section)) => {
                        rules.push(parse_rule(index, rule_section)?);
                        index += 1;
                    }
                    _ => {
                        return Err(Error::Config(format!("Unrecognized option {SCOPE}.{key}")));
                    }
                }
            }
        }

        if context.is_dry_run {
            // scheme+dev availability is unknowable here: factories publish
            // their schemes only on commit
            return Ok(());
        }

        for (index, rule) in rules.iter().enumerate() {
            for remote in &rule.remotes {
                let dev_scheme = format!("{}+dev", remote.scheme());
                if (self.lookup)(&dev_scheme).is_none() {
                    return Err(Error::Config(format!(
                        "{SCOPE}.rule[{index}]: scheme '{dev_scheme}' for {remote} is unavailable"
                    )));
                }
            }
        }
        debug!("Processed {} netdev-bound rules", rules.len());

        // desired (remote, ifname) pairs
        let mut desired: HashSet<Key> = HashSet::new();
        let mut remote_by_key: HashMap<Key, FaceUri> = HashMap::new();
        for rule in &rules {
            for netif in &context.netifs {
                if !netif.is_up || netif.is_loopback || !rule.predicate.accepts(netif) {
                    continue;
                }
                for remote in &rule.remotes {
                    let key = (remote.to_string(), netif.name.clone());
                    desired.insert(key.clone());
                    remote_by_key.insert(key, remote.clone());
                }
            }
        }

        let mut inner = self.inner.lock().unwrap();
        inner.rules = rules;

        // retire pairs no longer desired
        let stale: Vec<Key> = inner
            .faces
            .keys()
            .filter(|key| !desired.contains(*key))
            .cloned()
            .collect();
        for key in stale {
            if let Some(slot) = inner.faces.remove(&key) {
                debug!("Retiring netdev-bound face {} on {}", key.0, key.1);
                match slot {
                    Slot::Pending(task) => task.abort(),
                    Slot::Ready(face) => face.close(),
                }
            }
        }

        // create missing pairs; creation is asynchronous, the slot holds the
        // in-flight task until the face materializes
        for key in desired {
            if inner.faces.contains_key(&key) {
                continue;
            }
            let Some(remote) = remote_by_key.get(&key) else {
                continue;
            };
            let task = spawn_creation(
                Arc::clone(&self.inner),
                Arc::clone(&self.lookup),
                context.clone(),
                key.clone(),
                remote.clone(),
            );
            inner.faces.insert(key, Slot::Pending(task));
        }
        Ok(())
    }

    async fn create_face(
        &self,
        _request: FaceCreateRequest,
    ) -> Result<Arc<Face>, FaceCreationError> {
        Err(FaceCreationError::new(
            406,
            "Netdev-bound faces are created from configuration rules",
        ))
    }

    fn channels(&self) -> Vec<Arc<dyn Channel>> {
        Vec::new()
    }
}

fn spawn_creation(
    inner: Arc<Mutex<Inner>>,
    lookup: SchemeLookup,
    context: ConfigContext,
    key: Key,
    remote: FaceUri,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let dev_scheme = format!("{}+dev", remote.scheme());
        let Some(factory) = lookup(&dev_scheme) else {
            warn!("No factory for scheme {dev_scheme}");
            inner.lock().unwrap().faces.remove(&key);
            return;
        };

        let mut request = FaceCreateRequest::new(
            remote.clone(),
            rust_ndnd_common::face::FacePersistency::Persistent,
        );
        request.bound_device = Some(key.1.clone());

        match factory.create_face(request).await {
            Ok(face) => {
                (context.add_face)(Arc::clone(&face));
                let mut guard = inner.lock().unwrap();
                if let Some(slot) = guard.faces.get_mut(&key) {
                    *slot = Slot::Ready(Arc::clone(&face));
                } else {
                    // retired while connecting
                    face.close();
                    return;
                }
                drop(guard);

                let inner = Arc::clone(&inner);
                let closed_key = key.clone();
                face.on_closed(move || {
                    let mut guard = inner.lock().unwrap();
                    if matches!(guard.faces.get(&closed_key), Some(Slot::Ready(_))) {
                        guard.faces.remove(&closed_key);
                    }
                });
            }
            Err(e) => {
                warn!(
                    "Cannot create netdev-bound face to {} on {}: {}",
                    remote, key.1, e
                );
                inner.lock().unwrap().faces.remove(&key);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_requires_remote() {
        let section = ConfigSection::new();
        let err = parse_rule(0, &section).unwrap_err();
        assert!(err.to_string().contains("remote FaceUri is missing"));
    }

    #[test]
    fn rule_rejects_non_canonical_remote() {
        let section = ConfigSection::new().with_value("remote", "udp4://example.net:6363");
        let err = parse_rule(0, &section).unwrap_err();
        assert!(err.to_string().contains("not canonical"));
    }

    #[test]
    fn rule_rejects_unknown_option() {
        let section = ConfigSection::new()
            .with_value("remote", "udp4://192.0.2.1:6363")
            .with_value("bogus", "x");
        let err = parse_rule(0, &section).unwrap_err();
        assert!(err.to_string().contains("unrecognized option bogus"));
    }

    #[test]
    fn rule_accepts_multiple_remotes_and_predicate() {
        let section = ConfigSection::new()
            .with_value("remote", "udp4://192.0.2.1:6363")
            .with_value("remote", "tcp4://192.0.2.2:6363")
            .with_section(
                "whitelist",
                ConfigSection::new().with_value("ifname", "eth0"),
            );
        let rule = parse_rule(0, &section).unwrap();
        assert_eq!(rule.remotes.len(), 2);
    }
}
