//! Ethernet protocol factory: multicast faces over raw frames.

use crate::channel::Channel;
use crate::config::ConfigSection;
use crate::factory::{
    reconcile, ConfigContext, FaceCreateRequest, FaceCreationError, ProtocolFactory,
};
use crate::face::Face;
use crate::net::predicate::NetworkInterfacePredicate;
use crate::net::NetworkInterfaceInfo;
use crate::transport::ethernet::EthernetTransport;
use crate::DEFAULT_ETHER_MCAST_GROUP;
use async_trait::async_trait;
use log::{debug, warn};
use pnet::util::MacAddr;
use rust_ndnd_common::Error;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

const SCOPE: &str = "face_system.ether";

#[derive(Debug)]
struct Settings {
    mcast: bool,
    mcast_group: MacAddr,
    keep_alive: Option<Duration>,
    predicate: NetworkInterfacePredicate,
}

impl Settings {
    fn parse(section: &ConfigSection) -> Result<Self, Error> {
        section.ensure_known_keys(
            &["mcast", "mcast_group", "keep_alive_interval", "whitelist", "blacklist"],
            SCOPE,
        )?;

        let mcast_group: MacAddr = match section.value("mcast_group") {
            Some(raw) => raw.parse().map_err(|_| {
                Error::Config(format!(
                    "Invalid value for option {SCOPE}.mcast_group: '{raw}'"
                ))
            })?,
            None => DEFAULT_ETHER_MCAST_GROUP.parse().expect("default group"),
        };
        // multicast MAC: least-significant bit of the first octet
        if mcast_group.0 & 0x01 == 0 {
            return Err(Error::Config(format!(
                "Invalid value for option {SCOPE}.mcast_group: \
                 '{mcast_group}' is not a multicast address"
            )));
        }

        let keep_alive = section
            .get_parsed::<u64>("keep_alive_interval", SCOPE)?
            .filter(|seconds| *seconds > 0)
            .map(Duration::from_secs);

        Ok(Self {
            mcast: section.get_bool("mcast", SCOPE)?.unwrap_or(true),
            mcast_group,
            keep_alive,
            predicate: NetworkInterfacePredicate::from_section(section, SCOPE)?,
        })
    }
}

/// Interfaces that should carry a multicast Ethernet face.
fn desired_multicast_interfaces(
    netifs: &[NetworkInterfaceInfo],
    predicate: &NetworkInterfacePredicate,
) -> Vec<String> {
    netifs
        .iter()
        .filter(|netif| netif.can_multicast() && netif.mac.is_some() && predicate.accepts(netif))
        .map(|netif| netif.name.clone())
        .collect()
}

/// Key of a multicast face: interface name plus group address.
type McastKey = (String, MacAddr);

#[derive(Default)]
struct Inner {
    mcast_faces: HashMap<McastKey, Arc<Face>>,
    schemes: Vec<String>,
}

#[derive(Default)]
pub struct EthernetFactory {
    inner: Mutex<Inner>,
}

impl EthernetFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current (ifname, group) pairs carrying a face, for status reporting.
    pub fn multicast_keys(&self) -> Vec<(String, MacAddr)> {
        self.inner
            .lock()
            .unwrap()
            .mcast_faces
            .keys()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ProtocolFactory for EthernetFactory {
    fn id(&self) -> &'static str {
        "ether"
    }

    fn provided_schemes(&self) -> Vec<String> {
        self.inner.lock().unwrap().schemes.clone()
    }

    fn process_config(
        &self,
        section: Option<&ConfigSection>,
        context: &ConfigContext,
    ) -> Result<(), Error> {
        let settings = section.map(Settings::parse).transpose()?;

        if context.is_dry_run {
            return Ok(());
        }

        let desired: HashSet<McastKey> = match &settings {
            Some(settings) if settings.mcast => {
                desired_multicast_interfaces(&context.netifs, &settings.predicate)
                    .into_iter()
                    .map(|ifname| (ifname, settings.mcast_group))
                    .collect()
            }
            _ => HashSet::new(),
        };

        let keep_alive = settings.as_ref().and_then(|s| s.keep_alive);
        let add_face = Arc::clone(&context.add_face);

        let mut inner = self.inner.lock().unwrap();
        reconcile(
            &mut inner.mcast_faces,
            &desired,
            |(ifname, group)| {
                let (events_tx, events_rx) = mpsc::unbounded_channel();
                match EthernetTransport::spawn(ifname, *group, keep_alive, events_tx) {
                    Ok(transport) => {
                        let face = Face::new(transport, events_rx, true);
                        add_face(Arc::clone(&face));
                        Some(face)
                    }
                    Err(e) => {
                        warn!("Cannot create Ethernet multicast face on {}: {}", ifname, e);
                        None
                    }
                }
            },
            |(ifname, group), face| {
                debug!("Closing Ethernet multicast face on {} for {}", ifname, group);
                face.close();
            },
        );

        inner.schemes.clear();
        if settings.is_some() {
            inner.schemes.push("ether".into());
        }
        Ok(())
    }

    async fn create_face(
        &self,
        _request: FaceCreateRequest,
    ) -> Result<Arc<Face>, FaceCreationError> {
        Err(FaceCreationError::new(
            406,
            "Unicast Ethernet faces are not supported",
        ))
    }

    fn channels(&self) -> Vec<Arc<dyn Channel>> {
        Vec::new()
    }
}
