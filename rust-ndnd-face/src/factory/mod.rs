//! Protocol factories: per-scheme orchestration and config processing.

pub mod ether;
pub mod netdev_bound;
pub mod tcp;
pub mod udp;
pub mod unix;
pub mod websocket;

use crate::channel::{Channel, FaceCreatedCallback};
use crate::config::ConfigSection;
use crate::face::Face;
use crate::net::NetworkInterfaceInfo;
use async_trait::async_trait;
use log::trace;
use rust_ndnd_common::face::FacePersistency;
use rust_ndnd_common::uri::FaceUri;
use rust_ndnd_common::Error;
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

pub use crate::channel::FaceCreationError;

/// Carried through every factory's `process_config`.
#[derive(Clone)]
pub struct ConfigContext {
    pub is_dry_run: bool,
    /// The sink into the face table.
    pub add_face: FaceCreatedCallback,
    /// Read-only snapshot taken once per config pass.
    pub netifs: Vec<NetworkInterfaceInfo>,
}

/// A face-creation request routed to the factory providing the scheme.
#[derive(Clone)]
pub struct FaceCreateRequest {
    pub remote: FaceUri,
    pub persistency: FacePersistency,
    /// Reserved for local-fields-enabled faces; only valid on local scope.
    pub local_fields: bool,
    /// Bind the face's socket to this device (netdev-bound faces).
    pub bound_device: Option<String>,
}

impl FaceCreateRequest {
    pub fn new(remote: FaceUri, persistency: FacePersistency) -> Self {
        Self {
            remote,
            persistency,
            local_fields: false,
            bound_device: None,
        }
    }
}

/// Provides support for one underlying protocol and owns its channels.
#[async_trait]
pub trait ProtocolFactory: Send + Sync {
    /// The `face_system` subsection this factory processes.
    fn id(&self) -> &'static str;

    /// FaceUri schemes this factory currently provides.
    fn provided_schemes(&self) -> Vec<String>;

    /// Applies a configuration subsection (absent = disable everything).
    ///
    /// A dry run detects every detectable error without mutating state; a
    /// commit reconciles running state with the new configuration.
    fn process_config(
        &self,
        section: Option<&ConfigSection>,
        context: &ConfigContext,
    ) -> Result<(), Error>;

    /// Creates (or reuses) a face for a canonical remote URI.
    async fn create_face(&self, request: FaceCreateRequest) -> Result<Arc<Face>, FaceCreationError>;

    /// Read-only channel enumeration for status reporting.
    fn channels(&self) -> Vec<Arc<dyn Channel>>;
}

/* ---------------------------------------------------------------- *
 * Prohibited endpoints
 * ---------------------------------------------------------------- */

/// Endpoints an IP factory refuses to connect to: its own bind points, and
/// the expansion of wildcard bind points over the interface snapshot.
#[derive(Debug, Default)]
pub(crate) struct ProhibitedEndpoints {
    set: HashSet<SocketAddr>,
}

impl ProhibitedEndpoints {
    pub fn clear(&mut self) {
        self.set.clear();
    }

    pub fn contains(&self, endpoint: &SocketAddr) -> bool {
        self.set.contains(endpoint)
    }

    /// Prohibits `endpoint`; a wildcard address expands to every concrete
    /// address of its family on any interface. `with_broadcast` additionally
    /// covers directed and limited broadcast (datagram factories).
    pub fn prohibit(
        &mut self,
        endpoint: SocketAddr,
        netifs: &[NetworkInterfaceInfo],
        with_broadcast: bool,
    ) {
        let port = endpoint.port();
        match endpoint.ip() {
            IpAddr::V4(addr) if addr == Ipv4Addr::UNSPECIFIED => {
                for netif in netifs {
                    for address in netif.ipv4_addresses() {
                        self.insert(SocketAddr::new(IpAddr::V4(address), port));
                    }
                    if with_broadcast {
                        for broadcast in netif.ipv4_broadcast_addresses() {
                            self.insert(SocketAddr::new(IpAddr::V4(broadcast), port));
                        }
                    }
                }
                if with_broadcast {
                    self.insert(SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), port));
                }
            }
            IpAddr::V6(addr) if addr == Ipv6Addr::UNSPECIFIED => {
                for netif in netifs {
                    for address in netif.ipv6_addresses() {
                        self.insert(SocketAddr::new(IpAddr::V6(address), port));
                    }
                }
            }
            _ => {}
        }
        self.insert(endpoint);
    }

    fn insert(&mut self, endpoint: SocketAddr) {
        if self.set.insert(endpoint) {
            trace!("Prohibiting endpoint {}", endpoint);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.set.len()
    }
}

/* ---------------------------------------------------------------- *
 * Multicast / netdev reconciliation
 * ---------------------------------------------------------------- */

/// Diffs `existing` against `desired`: retires entries no longer desired,
/// creates missing ones, leaves unchanged ones untouched.
///
/// `create` returning None (creation failed, already logged) leaves the key
/// absent; the next reconciliation retries it.
pub(crate) fn reconcile<K, V>(
    existing: &mut HashMap<K, V>,
    desired: &HashSet<K>,
    mut create: impl FnMut(&K) -> Option<V>,
    mut retire: impl FnMut(&K, V),
) where
    K: std::hash::Hash + Eq + Clone,
{
    let stale: Vec<K> = existing
        .keys()
        .filter(|key| !desired.contains(*key))
        .cloned()
        .collect();
    for key in stale {
        if let Some(value) = existing.remove(&key) {
            retire(&key, value);
        }
    }

    for key in desired {
        if !existing.contains_key(key) {
            if let Some(value) = create(key) {
                existing.insert(key.clone(), value);
            }
        }
    }
}
