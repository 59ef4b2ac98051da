//! WebSocket protocol factory.

use crate::channel::websocket::WebSocketChannel;
use crate::channel::Channel;
use crate::config::ConfigSection;
use crate::factory::{ConfigContext, FaceCreateRequest, FaceCreationError, ProtocolFactory};
use crate::face::Face;
use crate::{DEFAULT_WS_PING_INTERVAL, DEFAULT_WS_PONG_TIMEOUT, DEFAULT_WS_PORT};
use async_trait::async_trait;
use log::debug;
use rust_ndnd_common::Error;
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SCOPE: &str = "face_system.websocket";

struct Settings {
    listen: bool,
    port: u16,
    enable_v4: bool,
    enable_v6: bool,
    ping_interval: Duration,
    pong_timeout: Duration,
}

impl Settings {
    fn parse(section: &ConfigSection) -> Result<Self, Error> {
        section.ensure_known_keys(
            &[
                "listen",
                "port",
                "enable_v4",
                "enable_v6",
                "ping_interval",
                "pong_timeout",
            ],
            SCOPE,
        )?;
        let settings = Self {
            listen: section.get_bool("listen", SCOPE)?.unwrap_or(true),
            port: section.get_parsed("port", SCOPE)?.unwrap_or(DEFAULT_WS_PORT),
            enable_v4: section.get_bool("enable_v4", SCOPE)?.unwrap_or(true),
            enable_v6: section.get_bool("enable_v6", SCOPE)?.unwrap_or(true),
            ping_interval: section
                .get_parsed::<u64>("ping_interval", SCOPE)?
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_WS_PING_INTERVAL),
            pong_timeout: section
                .get_parsed::<u64>("pong_timeout", SCOPE)?
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_WS_PONG_TIMEOUT),
        };
        if settings.listen && !settings.enable_v4 && !settings.enable_v6 {
            return Err(Error::Config(
                "IPv4 and IPv6 WebSocket channels have been disabled. \
                 Remove \"websocket\" section to disable WebSocket channels \
                 or enable at least one channel type."
                    .into(),
            ));
        }
        Ok(settings)
    }

    fn desired_endpoints(&self) -> HashSet<SocketAddr> {
        let mut endpoints = HashSet::new();
        if !self.listen {
            return endpoints;
        }
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
    channels: HashMap<SocketAddr, Arc<WebSocketChannel>>,
    schemes: Vec<String>,
}

#[derive(Default)]
pub struct WebSocketFactory {
    inner: Mutex<Inner>,
}

impl WebSocketFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProtocolFactory for WebSocketFactory {
    fn id(&self) -> &'static str {
        "websocket"
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
            let Some(settings) = &settings else { continue };
            // keep-alive parameters are fixed before the channel listens
            let channel =
                WebSocketChannel::new(*endpoint, settings.ping_interval, settings.pong_timeout);
            channel.listen(
                Arc::clone(&context.add_face),
                Arc::new(|reason| debug!("WebSocket accept failed: {}", reason)),
            )?;
            debug!("Channel [{}] created", channel.local_uri());
            inner.channels.insert(*endpoint, channel);
        }

        inner.schemes.clear();
        if settings.is_some() {
            inner.schemes.push("ws".into());
            inner.schemes.push("wsclient".into());
        }
        Ok(())
    }

    async fn create_face(
        &self,
        _request: FaceCreateRequest,
    ) -> Result<Arc<Face>, FaceCreationError> {
        Err(FaceCreationError::new(
            406,
            "Outgoing WebSocket faces are not supported",
        ))
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
    async fn listen_disabled_creates_no_channels() {
        let factory = WebSocketFactory::new();
        let section = ConfigSection::new().with_value("listen", "no");
        factory
            .process_config(Some(&section), &context(false))
            .unwrap();
        assert!(factory.channels().is_empty());
        // the factory still owns its schemes
        assert_eq!(
            factory.provided_schemes(),
            vec!["ws".to_string(), "wsclient".to_string()]
        );
    }

    #[tokio::test]
    async fn outgoing_faces_unsupported() {
        let factory = WebSocketFactory::new();
        let request = FaceCreateRequest::new(
            "wsclient://127.0.0.1:9696".parse().unwrap(),
            rust_ndnd_common::face::FacePersistency::OnDemand,
        );
        assert_eq!(factory.create_face(request).await.unwrap_err().status, 406);
    }
}
