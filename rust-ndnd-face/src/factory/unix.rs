//! Unix stream protocol factory.

use crate::channel::unix::UnixStreamChannel;
use crate::channel::Channel;
use crate::config::ConfigSection;
use crate::factory::{ConfigContext, FaceCreateRequest, FaceCreationError, ProtocolFactory};
use crate::face::Face;
use async_trait::async_trait;
use log::debug;
use rust_ndnd_common::Error;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

const SCOPE: &str = "face_system.unix";

pub const DEFAULT_UNIX_SOCKET_PATH: &str = "/run/ndnd/ndnd.sock";

#[derive(Default)]
struct Inner {
    channel: Option<Arc<UnixStreamChannel>>,
    schemes: Vec<String>,
}

#[derive(Default)]
pub struct UnixStreamFactory {
    inner: Mutex<Inner>,
}

impl UnixStreamFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProtocolFactory for UnixStreamFactory {
    fn id(&self) -> &'static str {
        "unix"
    }

    fn provided_schemes(&self) -> Vec<String> {
        self.inner.lock().unwrap().schemes.clone()
    }

    fn process_config(
        &self,
        section: Option<&ConfigSection>,
        context: &ConfigContext,
    ) -> Result<(), Error> {
        let path = match section {
            Some(section) => {
                section.ensure_known_keys(&["path"], SCOPE)?;
                Some(PathBuf::from(
                    section.value("path").unwrap_or(DEFAULT_UNIX_SOCKET_PATH),
                ))
            }
            None => None,
        };

        if context.is_dry_run {
            return Ok(());
        }

        let mut inner = self.inner.lock().unwrap();

        // a changed path retires the old channel
        if let Some(channel) = &inner.channel {
            if path.as_deref() != Some(channel.path()) {
                debug!("Channel [{}] retired", channel.local_uri());
                channel.retire();
                inner.channel = None;
            }
        }

        if let Some(path) = path {
            if inner.channel.is_none() {
                let channel = UnixStreamChannel::new(&path);
                channel.listen(
                    Arc::clone(&context.add_face),
                    Arc::new(|reason| debug!("Unix accept failed: {}", reason)),
                )?;
                debug!("Channel [{}] created", channel.local_uri());
                inner.channel = Some(channel);
            }
            inner.schemes = vec!["unix".into()];
        } else {
            inner.schemes.clear();
        }
        Ok(())
    }

    async fn create_face(
        &self,
        _request: FaceCreateRequest,
    ) -> Result<Arc<Face>, FaceCreationError> {
        Err(FaceCreationError::new(
            406,
            "Unix stream faces cannot be created with this method",
        ))
    }

    fn channels(&self) -> Vec<Arc<dyn Channel>> {
        self.inner
            .lock()
            .unwrap()
            .channel
            .iter()
            .map(|channel| Arc::clone(channel) as Arc<dyn Channel>)
            .collect()
    }
}
