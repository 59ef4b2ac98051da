//! TCP protocol factory.

use crate::channel::tcp::TcpChannel;
use crate::channel::Channel;
use crate::config::ConfigSection;
use crate::factory::{
    ConfigContext, FaceCreateRequest, FaceCreationError, ProhibitedEndpoints, ProtocolFactory,
};
use crate::face::Face;
use crate::{DEFAULT_PORT, DEFAULT_TCP_CONNECT_TIMEOUT};
use async_trait::async_trait;
use log::{debug, trace};
use rust_ndnd_common::face::FacePersistency;
use rust_ndnd_common::Error;
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex};

const SCOPE: &str = "face_system.tcp";

struct Settings {
    port: u16,
    enable_v4: bool,
    enable_v6: bool,
}

impl Settings {
    fn parse(section: &ConfigSection) -> Result<Self, Error> {
        section.ensure_known_keys(&["port", "enable_v4", "enable_v6"], SCOPE)?;
        let settings = Self {
            port: section.get_parsed("port", SCOPE)?.unwrap_or(DEFAULT_PORT),
            enable_v4: section.get_bool("enable_v4", SCOPE)?.unwrap_or(true),
            enable_v6: section.get_bool("enable_v6", SCOPE)?.unwrap_or(true),
        };
        if !settings.enable_v4 && !settings.enable_v6 {
            return Err(Error::Config(
                "IPv4 and IPv6 TCP channels have been disabled. \
                 Remove \"tcp\" section to disable TCP channels or enable at least one channel type."
                    .into(),
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

#[derive(Default)]
struct Inner {
    channels: HashMap<SocketAddr, Arc<TcpChannel>>,
    prohibited: ProhibitedEndpoints,
    schemes: Vec<String>,
}

#[derive(Default)]
pub struct TcpFactory {
    inner: Mutex<Inner>,
}

impl TcpFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProtocolFactory for TcpFactory {
    fn id(&self) -> &'static str {
        "tcp"
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

        // retire channels no longer desired
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

        // create and start missing channels
        for endpoint in &desired {
            if inner.channels.contains_key(endpoint) {
                continue;
            }
            let channel = TcpChannel::new(*endpoint);
            channel.listen(
                Arc::clone(&context.add_face),
                Arc::new(|reason| debug!("TCP accept failed: {}", reason)),
            )?;
            debug!("Channel [{}] created", channel.local_uri());
            inner.channels.insert(*endpoint, channel);
        }

        // the prohibited set tracks the current channel set
        inner.prohibited.clear();
        let endpoints: Vec<SocketAddr> = inner.channels.keys().copied().collect();
        for endpoint in endpoints {
            inner.prohibited.prohibit(endpoint, &context.netifs, false);
        }

        inner.schemes.clear();
        if let Some(settings) = &settings {
            if settings.enable_v4 {
                inner.schemes.push("tcp4".into());
                inner.schemes.push("tcp4+dev".into());
            }
            if settings.enable_v6 {
                inner.schemes.push("tcp6".into());
                inner.schemes.push("tcp6+dev".into());
            }
        }
        Ok(())
    }

    async fn create_face(
        &self,
        request: FaceCreateRequest,
    ) -> Result<Arc<Face>, FaceCreationError> {
        if request.persistency != FacePersistency::Persistent {
            trace!("create_face only supports persistent persistency");
            return Err(FaceCreationError::new(
                406,
                "Outgoing TCP faces only support persistent persistency",
            ));
        }

        let endpoint = request
            .remote
            .to_socket_addr()
            .map_err(|e| FaceCreationError::new(406, e.to_string()))?;

        if endpoint.ip().is_multicast() {
            return Err(FaceCreationError::new(406, "Cannot create multicast TCP faces"));
        }

        if request.local_fields && !endpoint.ip().is_loopback() {
            return Err(FaceCreationError::new(
                406,
                "Local fields can only be enabled on faces with local scope",
            ));
        }

        let channel = {
            let inner = self.inner.lock().unwrap();
            if inner.prohibited.contains(&endpoint) {
                return Err(FaceCreationError::new(406, "Requested endpoint is prohibited"));
            }
            inner
                .channels
                .iter()
                .find(|(local, _)| local.is_ipv4() == endpoint.is_ipv4())
                .map(|(_, channel)| Arc::clone(channel))
        };

        match channel {
            Some(channel) => {
                channel
                    .connect(
                        endpoint,
                        request.persistency,
                        DEFAULT_TCP_CONNECT_TIMEOUT,
                        request.bound_device,
                    )
                    .await
            }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face_table::FaceTable;

    fn context(is_dry_run: bool) -> ConfigContext {
        let table = FaceTable::new();
        ConfigContext {
            is_dry_run,
            add_face: Arc::new(move |face| table.add(face)),
            netifs: Vec::new(),
        }
    }

    #[tokio::test]
    async fn dry_run_does_not_create_channels() {
        let factory = TcpFactory::new();
        let section = ConfigSection::new().with_value("port", 0);
        factory
            .process_config(Some(&section), &context(true))
            .unwrap();
        assert!(factory.channels().is_empty());
        assert!(factory.provided_schemes().is_empty());
    }

    #[tokio::test]
    async fn unknown_key_rejected() {
        let factory = TcpFactory::new();
        let section = ConfigSection::new().with_value("bogus", 1);
        let err = factory
            .process_config(Some(&section), &context(true))
            .unwrap_err();
        assert!(err.to_string().contains("face_system.tcp.bogus"));
    }

    #[tokio::test]
    async fn disabling_both_families_rejected() {
        let factory = TcpFactory::new();
        let section = ConfigSection::new()
            .with_value("enable_v4", "no")
            .with_value("enable_v6", "no");
        assert!(factory
            .process_config(Some(&section), &context(true))
            .is_err());
    }

    #[tokio::test]
    async fn permanent_persistency_rejected() {
        let factory = TcpFactory::new();
        let request = FaceCreateRequest::new(
            "tcp4://127.0.0.1:6363".parse().unwrap(),
            FacePersistency::Permanent,
        );
        let err = factory.create_face(request).await.unwrap_err();
        assert_eq!(err.status, 406);
    }

    #[tokio::test]
    async fn no_channel_yields_504() {
        let factory = TcpFactory::new();
        let request = FaceCreateRequest::new(
            "tcp4://127.0.0.1:6363".parse().unwrap(),
            FacePersistency::Persistent,
        );
        let err = factory.create_face(request).await.unwrap_err();
        assert_eq!(err.status, 504);
    }
}
