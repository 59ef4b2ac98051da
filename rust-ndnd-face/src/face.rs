//! Face: the uniform surface the forwarding pipeline talks to.
//!
//! A face owns one link service and one transport. A pump task translates
//! transport events into face events: decoded packets and state changes, in
//! order. The forwarding pipeline consumes them through `next_event`.

use crate::link_service::LinkService;
use crate::transport::{Transport, TransportEvent, TransportEventReceiver};
use log::{debug, trace};
use rust_ndnd_common::counters::FaceCounters;
use rust_ndnd_common::face::{FaceId, FacePersistency, FaceScope, LinkType, TransportState};
use rust_ndnd_common::ndn::{Data, Interest, Nack, NetworkPacket};
use rust_ndnd_common::uri::FaceUri;
use rust_ndnd_common::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, Mutex};

/// Events emitted by a Face
#[derive(Debug, Clone)]
pub enum FaceEvent {
    /// An Interest was received
    Interest(Interest),

    /// A Data packet was received
    Data(Data),

    /// A Nack was received
    Nack(Nack),

    /// The transport moved along one edge of its state machine
    StateChange {
        old: TransportState,
        new: TransportState,
    },
}

type ClosedCallback = Box<dyn FnOnce() + Send>;

pub struct Face {
    id: AtomicU64,
    transport: Arc<dyn Transport>,
    link_service: LinkService,
    event_receiver: Mutex<Option<mpsc::UnboundedReceiver<FaceEvent>>>,
    on_closed: StdMutex<Vec<ClosedCallback>>,
}

impl Face {
    /// Wires a transport to a new face and starts the event pump.
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        transport_rx: TransportEventReceiver,
        lp_framing: bool,
    ) -> Arc<Self> {
        let link_service = LinkService::new(transport.counters(), lp_framing);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let face = Arc::new(Self {
            id: AtomicU64::new(FaceId::INVALID.0),
            transport,
            link_service,
            event_receiver: Mutex::new(Some(event_rx)),
            on_closed: StdMutex::new(Vec::new()),
        });

        let pump = Arc::clone(&face);
        tokio::spawn(async move {
            pump.run(transport_rx, event_tx).await;
        });
        face
    }

    async fn run(
        self: Arc<Self>,
        mut transport_rx: TransportEventReceiver,
        event_tx: mpsc::UnboundedSender<FaceEvent>,
    ) {
        while let Some(event) = transport_rx.recv().await {
            match event {
                TransportEvent::Block(block) => {
                    if let Some(packet) = self.link_service.dispatch(block) {
                        trace!("[{}] Received {}", self.remote_uri(), packet.packet_type());
                        let event = match packet {
                            NetworkPacket::Interest(interest) => FaceEvent::Interest(interest),
                            NetworkPacket::Data(data) => FaceEvent::Data(data),
                            NetworkPacket::Nack(nack) => FaceEvent::Nack(nack),
                        };
                        let _ = event_tx.send(event);
                    }
                }
                TransportEvent::StateChange { old, new } => {
                    let _ = event_tx.send(FaceEvent::StateChange { old, new });
                    if new == TransportState::Closed {
                        debug!("[{}] Face closed", self.remote_uri());
                        let callbacks = {
                            let mut slot = self.on_closed.lock().unwrap();
                            std::mem::take(&mut *slot)
                        };
                        for callback in callbacks {
                            callback();
                        }
                        break;
                    }
                }
            }
        }
    }

    /// The face id, 0 until the face table assigns one.
    pub fn id(&self) -> FaceId {
        FaceId(self.id.load(Ordering::Relaxed))
    }

    pub(crate) fn set_id(&self, id: FaceId) {
        self.id.store(id.0, Ordering::Relaxed);
    }

    pub fn send_interest(&self, interest: &Interest) {
        self.link_service.send_interest(interest, &*self.transport);
    }

    pub fn send_data(&self, data: &Data) {
        self.link_service.send_data(data, &*self.transport);
    }

    pub fn send_nack(&self, nack: &Nack) {
        self.link_service.send_nack(nack, &*self.transport);
    }

    /// Requests graceful shutdown; progress is reported via state changes.
    pub fn close(&self) {
        self.transport.close();
    }

    /// The next event from this face.
    pub async fn next_event(&self) -> Option<FaceEvent> {
        let mut receiver_guard = self.event_receiver.lock().await;
        let receiver = receiver_guard.as_mut()?;
        receiver.recv().await
    }

    /// Registers a callback fired exactly once when the face reaches CLOSED.
    ///
    /// If the face is already closed, the callback fires immediately.
    pub fn on_closed(&self, callback: impl FnOnce() + Send + 'static) {
        self.on_closed.lock().unwrap().push(Box::new(callback));
        // the pump drains the list on CLOSED; re-check so a registration
        // racing the final state change is not lost
        if self.state() == TransportState::Closed {
            let callbacks = {
                let mut slot = self.on_closed.lock().unwrap();
                std::mem::take(&mut *slot)
            };
            for callback in callbacks {
                callback();
            }
        }
    }

    pub fn local_uri(&self) -> FaceUri {
        self.transport.local_uri()
    }

    pub fn remote_uri(&self) -> FaceUri {
        self.transport.remote_uri()
    }

    pub fn scope(&self) -> FaceScope {
        self.transport.scope()
    }

    pub fn persistency(&self) -> FacePersistency {
        self.transport.persistency()
    }

    pub fn set_persistency(&self, persistency: FacePersistency) -> Result<(), Error> {
        self.transport.set_persistency(persistency)
    }

    pub fn link_type(&self) -> LinkType {
        self.transport.link_type()
    }

    pub fn mtu(&self) -> Option<usize> {
        self.transport.mtu()
    }

    pub fn state(&self) -> TransportState {
        self.transport.state()
    }

    pub fn counters(&self) -> Arc<FaceCounters> {
        self.transport.counters()
    }
}

impl std::fmt::Debug for Face {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Face")
            .field("id", &self.id())
            .field("local", &self.local_uri().to_string())
            .field("remote", &self.remote_uri().to_string())
            .field("state", &self.state())
            .finish()
    }
}
