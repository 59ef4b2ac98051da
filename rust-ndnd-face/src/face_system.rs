//! FaceSystem: entry point that owns the protocol factories.

use crate::config::ConfigSection;
use crate::face::Face;
use crate::face_table::FaceTable;
use crate::factory::ether::EthernetFactory;
use crate::factory::netdev_bound::NetdevBound;
use crate::factory::tcp::TcpFactory;
use crate::factory::udp::UdpFactory;
use crate::factory::unix::UnixStreamFactory;
use crate::factory::websocket::WebSocketFactory;
use crate::factory::{
    ConfigContext, FaceCreateRequest, FaceCreationError, ProtocolFactory,
};
use crate::net::{collect_interfaces, NetworkInterfaceInfo};
use rust_ndnd_common::Error;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};

/// Provides the per-pass network interface snapshot; injectable for tests.
pub type NetifProvider = Box<dyn Fn() -> Vec<NetworkInterfaceInfo> + Send + Sync>;

pub struct FaceSystem {
    inner: Arc<Inner>,
    face_table: Arc<FaceTable>,
    netif_provider: NetifProvider,
}

struct Inner {
    /// Factories in registration order; config sections dispatch by id.
    factories: Vec<Arc<dyn ProtocolFactory>>,
    by_scheme: Mutex<HashMap<String, Arc<dyn ProtocolFactory>>>,
}

impl Inner {
    fn factory_by_scheme(&self, scheme: &str) -> Option<Arc<dyn ProtocolFactory>> {
        self.by_scheme.lock().unwrap().get(scheme).cloned()
    }
}

impl FaceSystem {
    pub fn new(face_table: Arc<FaceTable>) -> Self {
        Self::with_netif_provider(face_table, Box::new(collect_interfaces))
    }

    /// Builds the face system with an injected interface enumerator.
    pub fn with_netif_provider(face_table: Arc<FaceTable>, netif_provider: NetifProvider) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let lookup = {
                let weak = weak.clone();
                Arc::new(move |scheme: &str| {
                    weak.upgrade()
                        .and_then(|inner| inner.factory_by_scheme(scheme))
                })
            };
            Inner {
                factories: vec![
                    Arc::new(EthernetFactory::new()),
                    Arc::new(TcpFactory::new()),
                    Arc::new(UdpFactory::new()),
                    Arc::new(UnixStreamFactory::new()),
                    Arc::new(WebSocketFactory::new()),
                    Arc::new(NetdevBound::new(lookup)),
                ],
                by_scheme: Mutex::new(HashMap::new()),
            }
        });
        Self {
            inner,
            face_table,
            netif_provider,
        }
    }

    pub fn face_table(&self) -> &Arc<FaceTable> {
        &self.face_table
    }

    /// Applies the `face_system` configuration section to every factory.
    ///
    /// On dry run, every detectable error is reported and no state moves;
    /// on commit, the scheme index is rebuilt from the factories' advertised
    /// schemes afterwards.
    pub fn process_config(&self, section: &ConfigSection, is_dry_run: bool) -> Result<(), Error> {
        // unrecognized and duplicate children are errors in both passes
        let ids: HashSet<&str> = self.inner.factories.iter().map(|f| f.id()).collect();
        let mut seen = HashSet::new();
        for key in section.keys() {
            if !seen.insert(key) {
                return Err(Error::Config(format!("Duplicate section face_system.{key}")));
            }
            if !ids.contains(key) {
                return Err(Error::Config(format!("Unrecognized option face_system.{key}")));
            }
        }

        let table = Arc::clone(&self.face_table);
        let context = ConfigContext {
            is_dry_run,
            add_face: Arc::new(move |face| table.add(face)),
            netifs: (self.netif_provider)(),
        };

        // the scheme index is refreshed per factory so that factories
        // processed later (netdev_bound is last) resolve the earlier ones'
        // schemes during their own commit
        for factory in &self.inner.factories {
            let old_schemes: HashSet<String> =
                factory.provided_schemes().into_iter().collect();
            factory.process_config(section.child(factory.id()), &context)?;

            if !is_dry_run {
                let new_schemes = factory.provided_schemes();
                let mut by_scheme = self.inner.by_scheme.lock().unwrap();
                for scheme in &new_schemes {
                    by_scheme.insert(scheme.clone(), Arc::clone(factory));
                }
                for scheme in old_schemes {
                    if !new_schemes.contains(&scheme) {
                        by_scheme.remove(&scheme);
                    }
                }
            }
        }
        Ok(())
    }

    pub fn factory_by_id(&self, id: &str) -> Option<Arc<dyn ProtocolFactory>> {
        self.inner
            .factories
            .iter()
            .find(|factory| factory.id() == id)
            .cloned()
    }

    pub fn factory_by_scheme(&self, scheme: &str) -> Option<Arc<dyn ProtocolFactory>> {
        self.inner.factory_by_scheme(scheme)
    }

    pub fn factory_ids(&self) -> Vec<&'static str> {
        self.inner.factories.iter().map(|f| f.id()).collect()
    }

    /// Routes a face-creation request to the factory providing the scheme.
    pub async fn create_face(
        &self,
        request: FaceCreateRequest,
    ) -> Result<Arc<Face>, FaceCreationError> {
        if !request.remote.is_canonical() {
            return Err(FaceCreationError::new(
                406,
                format!("Non-canonical remote URI {}", request.remote),
            ));
        }
        let factory = self
            .factory_by_scheme(request.remote.scheme())
            .ok_or_else(|| {
                FaceCreationError::new(
                    406,
                    format!("Unsupported protocol {}", request.remote.scheme()),
                )
            })?;
        let face = factory.create_face(request).await?;
        self.face_table.add(Arc::clone(&face));
        Ok(face)
    }
}
