//! Transport layer: one connection, framed into TLV blocks.
//!
//! Each transport owns one socket (or a per-peer slice of a shared one),
//! frames bytes into NDN TLV blocks, keeps a FIFO send queue serviced by its
//! own task, and reports state changes edge-by-edge to the owning face.

pub mod datagram;
pub mod ethernet;
pub mod multicast_udp;
pub mod stream;
pub mod websocket;

use bytes::Bytes;
use log::{debug, warn};
use rust_ndnd_common::counters::FaceCounters;
use rust_ndnd_common::face::{FacePersistency, FaceScope, LinkType, TransportState};
use rust_ndnd_common::uri::FaceUri;
use rust_ndnd_common::Error;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// What a transport reports upward to its face.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// One received wire-format TLV block, in arrival order.
    Block(Bytes),
    /// One edge of the transport state machine.
    StateChange {
        old: TransportState,
        new: TransportState,
    },
}

pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;
pub type TransportEventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// The capability surface every transport implements.
///
/// All operations return immediately; delivery is best-effort and failures
/// surface through state changes.
pub trait Transport: Send + Sync {
    /// Enqueues one wire-format TLV block for transmission.
    fn send(&self, block: Bytes);

    /// Initiates graceful shutdown. Idempotent.
    fn close(&self);

    fn state(&self) -> TransportState;
    fn local_uri(&self) -> FaceUri;
    fn remote_uri(&self) -> FaceUri;
    fn scope(&self) -> FaceScope;
    fn persistency(&self) -> FacePersistency;
    fn set_persistency(&self, persistency: FacePersistency) -> Result<(), Error>;
    fn link_type(&self) -> LinkType;
    fn mtu(&self) -> Option<usize>;
    fn counters(&self) -> Arc<FaceCounters>;
}

/// State, identity, and counters shared by every transport implementation.
pub(crate) struct TransportBase {
    pub local_uri: FaceUri,
    pub remote_uri: FaceUri,
    pub scope: FaceScope,
    pub link_type: LinkType,
    pub mtu: Option<usize>,
    pub persistency: Mutex<FacePersistency>,
    state: Mutex<TransportState>,
    pub counters: Arc<FaceCounters>,
    events: TransportEventSender,
}

impl TransportBase {
    pub fn new(
        local_uri: FaceUri,
        remote_uri: FaceUri,
        scope: FaceScope,
        link_type: LinkType,
        mtu: Option<usize>,
        persistency: FacePersistency,
        events: TransportEventSender,
    ) -> Self {
        Self {
            local_uri,
            remote_uri,
            scope,
            link_type,
            mtu,
            persistency: Mutex::new(persistency),
            state: Mutex::new(TransportState::Up),
            counters: Arc::new(FaceCounters::new()),
            events,
        }
    }

    pub fn state(&self) -> TransportState {
        *self.state.lock().unwrap()
    }

    pub fn persistency(&self) -> FacePersistency {
        *self.persistency.lock().unwrap()
    }

    /// Applies one state-machine edge and emits it.
    ///
    /// Returns false if the edge is a no-op or illegal (e.g. any transition
    /// out of CLOSED).
    pub fn set_state(&self, next: TransportState) -> bool {
        let old = {
            let mut state = self.state.lock().unwrap();
            let old = *state;
            if old == next || !old.can_transition_to(next) {
                return false;
            }
            *state = next;
            old
        };
        debug!("[{}] {} -> {}", self.remote_uri, old, next);
        let _ = self
            .events
            .send(TransportEvent::StateChange { old, new: next });
        true
    }

    /// Delivers one received block upward, in arrival order.
    pub fn deliver(&self, block: Bytes) {
        let _ = self.events.send(TransportEvent::Block(block));
    }

    /// Common admission check for `Transport::send`.
    ///
    /// Oversized blocks and blocks sent into a closing transport are dropped
    /// and counted without a state change.
    pub fn admit_send(&self, block: &Bytes) -> bool {
        match self.state() {
            TransportState::Closing | TransportState::Failed | TransportState::Closed => {
                self.counters.n_dropped.increment();
                return false;
            }
            TransportState::Up | TransportState::Down => {}
        }
        if let Some(mtu) = self.mtu {
            if block.len() > mtu {
                warn!(
                    "[{}] Dropped block of {} bytes exceeding MTU {}",
                    self.remote_uri,
                    block.len(),
                    mtu
                );
                self.counters.n_dropped.increment();
                return false;
            }
        }
        true
    }
}

/// Keeps `handle` alive until pending reactor callbacks for the same socket
/// have had a chance to run after close.
pub(crate) fn defer_release<T: Send + Sync + 'static>(handle: Arc<T>) {
    tokio::spawn(async move {
        tokio::task::yield_now().await;
        drop(handle);
    });
}

/// The fatal stream-framing reason, also surfaced to operators.
pub(crate) const PARSE_FATAL_REASON: &str =
    "Failed to parse incoming packet or packet too large to process";
