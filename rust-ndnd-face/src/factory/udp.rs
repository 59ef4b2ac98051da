//! UDP protocol factory: unicast channels and multicast faces.

use crate::channel::udp::UdpChannel;
use crate::channel::Channel;
use crate::config::ConfigSection;
use crate::factory::{
    reconcile, ConfigContext, FaceCreateRequest, FaceCreationError, ProhibitedEndpoints,
    ProtocolFactory,
};
use crate::face::Face;
use crate::net::predicate::NetworkInterfacePredicate;
use crate::net::NetworkInterfaceInfo;
use crate::transport::datagram::UnicastUdpTransport;
use crate::transport::multicast_udp::MulticastUdpTransport;
use crate::{DEFAULT_PORT, DEFAULT_UDP_IDLE_TIMEOUT, DEFAULT_UDP_MCAST_GROUP, DEFAULT_UDP_MCAST_PORT};
use async_trait::async_trait;
use log::{debug, trace, warn};
use rust_ndnd_common::face::{FacePersistency, FaceScope};
use rust_ndnd_common::uri::FaceUri;
use rust_ndnd_common::Error;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

const SCOPE: &str = "face_system.udp";

#[derive(Debug)]
struct Settings {
    port: u16,
    enable_v4: bool,
    enable_v6: bool,
    idle_timeout: Duration,
    mcast: bool,
    mcast_group: Ipv4Addr,
    mcast_port: u16,
    predicate: NetworkInterfacePredicate,
}

impl Settings {
    fn parse(section: &ConfigSection) -> Result<Self, Error> {
        section.ensure_known_keys(
            &[
                "port",
                "enable_v4",
                "enable_v6",
                "idle_timeout",
                "keep_alive_interval",
                "mcast",
                "mcast_group",
                "mcast_port",
                "whitelist",
                "blacklist",
            ],
            SCOPE,
        )?;

        let settings = Self {
            port: section.get_parsed("port", SCOPE)?.unwrap_or(DEFAULT_PORT),
            enable_v4: section.get_bool("enable_v4", SCOPE)?.unwrap_or(true),
            enable_v6: section.get_bool("enable_v6", SCOPE)?.unwrap_or(true),
            idle_timeout: section
                .get_parsed::<u64>("idle_timeout", SCOPE)?
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_UDP_IDLE_TIMEOUT),
            mcast: section.get_bool("mcast", SCOPE)?.unwrap_or(true),
            mcast_group: section
                .get_parsed("mcast_group", SCOPE)?
                .unwrap_or_else(|| DEFAULT_UDP_MCAST_GROUP.parse().expect("default group")),
            mcast_port: section
                .get_parsed("mcast_port", SCOPE)?
                .unwrap_or(DEFAULT_UDP_MCAST_PORT),
            predicate: NetworkInterfacePredicate::from_section(section, SCOPE)?,
        };

        // accepted for compatibility; unicast UDP performs no keep-alive
        let _ = section.get_parsed::<u64>("keep_alive_interval", SCOPE)?;

        if !settings.mcast_group.is_multicast() {
            return Err(Error::Config(format!(
                "Invalid value for option {SCOPE}.mcast_group: '{}' is not a multicast address",
                settings.mcast_group
            )));
        }
        if !settings.enable_v4 && !settings.enable_v6 {
            return Err(Error::Config(
                "IPv4 and IPv6 UDP channels have been disabled. \
                 Remove \"udp\" section to disable UDP channels or enable at least one channel type."
                    .into(),
            ));
        }
        if !settings.enable_v4 && settings.mcast {
            return Err(Error::Config(
                "IPv4 multicast requested, but IPv4 channels have been disabled".into(),
            ));
        }
        Ok(settings)
    }

    fn desired_endpoints(&self) -> HashSet<SocketAddr> {
        let mut endpoints = HashSet::new();
        if self.enable_v4 {
            endpoints.insert(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.port));
        }
        if self.enable_v6 {
            endpoints.insert(SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), self.port));
        }
        endpoints
    }
}

/// Computes the (ifname, local address) pairs that should carry a multicast
/// face under the given predicate.
fn desired_multicast_interfaces(
    netifs: &[NetworkInterfaceInfo],
    predicate: &NetworkInterfacePredicate,
) -> Vec<(String, Ipv4Addr)> {
    netifs
        .iter()
        .filter(|netif| netif.can_multicast() && predicate.accepts(netif))
        .filter_map(|netif| netif.first_ipv4().map(|addr| (netif.name.clone(), addr)))
        .collect()
}

/// Key of a multicast face: interface name plus group endpoint.
type McastKey = (String, SocketAddr);

#[derive(Default)]
struct Inner {
    channels: HashMap<SocketAddr, Arc<UdpChannel>>,
    mcast_faces: HashMap<McastKey, Arc<Face>>,
    prohibited: ProhibitedEndpoints,
    schemes: Vec<String>,
}

#[derive(Default)]
pub struct UdpFactory {
    inner: Mutex<Inner>,
}

impl UdpFactory {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn mcast_keys(&self) -> Vec<McastKey> {
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
impl ProtocolFactory for UdpFactory {
    fn id(&self) -> &'static str {
        "udp"
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

        let desired = settings
            .as_ref()
            .map(Settings::desired_endpoints)
            .unwrap_or_default();

        let mut inner = self.inner.lock().unwrap();

        // unicast channels
        let stale: Vec<SocketAddr> = inner
            .channels
            .keys()
            .filter(|endpoint| !desired.contains(*endpoint))
            .copied()
            .collect();
        for endpoint in stale {
            if let Some(channel) = inner.channels.remove(&endpoint) {
                debug!("Channel [{}] retired", channel.local_uri());
                channel.retire();
            }
        }
        for endpoint in &desired {
            if inner.channels.contains_key(endpoint) {
                continue;
            }
            let idle_timeout = settings
                .as_ref()
                .map(|s| s.idle_timeout)
                .unwrap_or(DEFAULT_UDP_IDLE_TIMEOUT);
            let channel = UdpChannel::new(*endpoint, idle_timeout)?;
            channel.listen(
                Arc::clone(&context.add_face),
                Arc::new(|reason| debug!("UDP receive failed: {}", reason)),
            );
            debug!("Channel [{}] created", channel.local_uri());
            inner.channels.insert(*endpoint, channel);
        }

        // prohibited endpoints: channel bind points with broadcast expansion
        inner.prohibited.clear();
        let endpoints: Vec<SocketAddr> = inner.channels.keys().copied().collect();
        for endpoint in endpoints {
            inner.prohibited.prohibit(endpoint, &context.netifs, true);
        }

        // multicast reconciliation over (ifname, group)
        let desired_mcast: HashSet<McastKey> = match &settings {
            Some(settings) if settings.mcast => {
                let group = SocketAddr::new(IpAddr::V4(settings.mcast_group), settings.mcast_port);
                inner
                    .prohibited
                    .prohibit(group, &context.netifs, false);
                desired_multicast_interfaces(&context.netifs, &settings.predicate)
                    .into_iter()
                    .map(|(ifname, _)| (ifname, group))
                    .collect()
            }
            _ => HashSet::new(),
        };
        let locals: HashMap<String, Ipv4Addr> = settings
            .as_ref()
            .map(|s| {
                desired_multicast_interfaces(&context.netifs, &s.predicate)
                    .into_iter()
                    .collect()
            })
            .unwrap_or_default();

        let add_face = Arc::clone(&context.add_face);
        reconcile(
            &mut inner.mcast_faces,
            &desired_mcast,
            |(ifname, group)| {
                let local_addr = locals.get(ifname)?;
                let SocketAddr::V4(group_v4) = group else {
                    return None;
                };
                let (events_tx, events_rx) = mpsc::unbounded_channel();
                match MulticastUdpTransport::spawn(
                    ifname,
                    *local_addr,
                    *group_v4.ip(),
                    group_v4.port(),
                    events_tx,
                ) {
                    Ok(transport) => {
                        let face = Face::new(transport, events_rx, false);
                        add_face(Arc::clone(&face));
                        Some(face)
                    }
                    Err(e) => {
                        warn!("Cannot create multicast face on {}: {}", ifname, e);
                        None
                    }
                }
            },
            |(ifname, group), face| {
                debug!("Closing multicast face on {} for {}", ifname, group);
                face.close();
            },
        );

        inner.schemes.clear();
        if let Some(settings) = &settings {
            if settings.enable_v4 {
                inner.schemes.push("udp4".into());
                inner.schemes.push("udp4+dev".into());
            }
            if settings.enable_v6 {
                inner.schemes.push("udp6".into());
                inner.schemes.push("udp6+dev".into());
            }
        }
        Ok(())
    }

    async fn create_face(
        &self,
        request: FaceCreateRequest,
    ) -> Result<Arc<Face>, FaceCreationError> {
        if request.persistency == FacePersistency::OnDemand {
            trace!("create_face does not support on-demand persistency");
            return Err(FaceCreationError::new(
                406,
                "Outgoing UDP faces do not support on-demand persistency",
            ));
        }

        let endpoint = request
            .remote
            .to_socket_addr()
            .map_err(|e| FaceCreationError::new(406, e.to_string()))?;

        if endpoint.ip().is_multicast() {
            return Err(FaceCreationError::new(
                406,
                "Cannot create multicast UDP faces with this method",
            ));
        }

        if request.local_fields && !endpoint.ip().is_loopback() {
            return Err(FaceCreationError::new(
                406,
                "Local fields can only be enabled on faces with local scope",
            ));
        }

        {
            let inner = self.inner.lock().unwrap();
            if inner.prohibited.contains(&endpoint) {
                return Err(FaceCreationError::new(406, "Requested endpoint is prohibited"));
            }
        }

        if let Some(device) = &request.bound_device {
            return self.create_bound_face(endpoint, request.persistency, device);
        }

        let channel = {
            let inner = self.inner.lock().unwrap();
            inner
                .channels
                .iter()
                .find(|(local, _)| local.is_ipv4() == endpoint.is_ipv4())
                .map(|(_, channel)| Arc::clone(channel))
        };

        match channel {
            Some(channel) => channel.connect(endpoint, request.persistency),
            None => Err(FaceCreationError::new(504, "No channels available to connect")),
        }
    }

    fn channels(&self) -> Vec<Arc<dyn Channel>> {
        self.inner
            .lock()
            .unwrap()
            .channels
            .values()
            .map(|channel| Arc::clone(channel) as Arc<dyn Channel>)
            .collect()
    }
}

impl UdpFactory {
    /// Creates a face over its own socket bound to `device` (netdev-bound).
    fn create_bound_face(
        &self,
        endpoint: SocketAddr,
        persistency: FacePersistency,
        device: &str,
    ) -> Result<Arc<Face>, FaceCreationError> {
        let socket = (|| -> std::io::Result<tokio::net::UdpSocket> {
            let domain = if endpoint.is_ipv4() {
                Domain::IPV4
            } else {
                Domain::IPV6
            };
            let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
            socket.bind_device(Some(device.as_bytes()))?;
            socket.connect(&endpoint.into())?;
            socket.set_nonblocking(true)?;
            tokio::net::UdpSocket::from_std(socket.into())
        })()
        .map_err(|e| {
            FaceCreationError::new(500, format!("Cannot bind to device {device}: {e}"))
        })?;

        let local = socket
            .local_addr()
            .map_err(|e| FaceCreationError::new(500, e.to_string()))?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = UnicastUdpTransport::new_owned(
            socket,
            FaceUri::from_udp_addr(local),
            FaceUri::from_udp_addr(endpoint),
            FaceScope::NonLocal,
            persistency,
            events_tx,
        );
        Ok(Face::new(transport, events_rx, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face_table::FaceTable;
    use crate::net::test_support::fake_netif;

    fn context(is_dry_run: bool, netifs: Vec<NetworkInterfaceInfo>) -> ConfigContext {
        let table = FaceTable::new();
        ConfigContext {
            is_dry_run,
            add_face: Arc::new(move |face| table.add(face)),
            netifs,
        }
    }

    #[test]
    fn non_multicast_group_rejected() {
        let section = ConfigSection::new().with_value("mcast_group", "192.0.2.1");
        let err = Settings::parse(&section).unwrap_err();
        assert!(err.to_string().contains("mcast_group"));
    }

    #[test]
    fn negative_idle_timeout_rejected() {
        let section = ConfigSection::new().with_value("idle_timeout", "-5");
        assert!(Settings::parse(&section).is_err());
    }

    #[test]
    fn desired_mcast_interfaces_respect_predicate() {
        let netifs = vec![
            fake_netif(1, "lo", None, &["127.0.0.1/8"], true, true),
            fake_netif(2, "eth0", None, &["192.0.2.1/24"], true, false),
            fake_netif(3, "eth1", None, &["198.51.100.1/24"], true, false),
            fake_netif(4, "down0", None, &["203.0.113.1/24"], false, false),
        ];

        let section = ConfigSection::new().with_section(
            "blacklist",
            ConfigSection::new().with_value("ifname", "eth1"),
        );
        let predicate = NetworkInterfacePredicate::from_section(&section, SCOPE).unwrap();

        let desired = desired_multicast_interfaces(&netifs, &predicate);
        assert_eq!(
            desired,
            vec![("eth0".to_string(), "192.0.2.1".parse().unwrap())]
        );
    }

    #[tokio::test]
    async fn dry_run_leaves_no_state() {
        let factory = UdpFactory::new();
        let section = ConfigSection::new().with_value("port", 0);
        factory
            .process_config(Some(&section), &context(true, Vec::new()))
            .unwrap();
        assert!(factory.channels().is_empty());
        assert!(factory.mcast_keys().is_empty());
        assert!(factory.provided_schemes().is_empty());
    }

    #[tokio::test]
    async fn on_demand_create_face_rejected() {
        let factory = UdpFactory::new();
        let request = FaceCreateRequest::new(
            "udp4://127.0.0.1:6363".parse().unwrap(),
            FacePersistency::OnDemand,
        );
        let err = factory.create_face(request).await.unwrap_err();
        assert_eq!(err.status, 406);
    }
}
