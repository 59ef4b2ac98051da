//! UDP unicast transport.
//!
//! A unicast transport either shares its channel's socket (the channel
//! demultiplexes incoming datagrams per remote endpoint) or owns a connected
//! socket (netdev-bound faces). Every datagram must hold exactly one TLV
//! block; malformed datagrams are dropped without a state change. On-demand
//! faces are reaped after a quiet interval.

use crate::transport::{defer_release, Transport, TransportBase, TransportEventSender};
use crate::MAX_NDN_PACKET_SIZE;
use bytes::Bytes;
use log::{debug, info, warn};
use rust_ndnd_common::counters::FaceCounters;
use rust_ndnd_common::face::{FacePersistency, FaceScope, LinkType, TransportState};
use rust_ndnd_common::tlv::{peek_block, FrameStatus};
use rust_ndnd_common::uri::FaceUri;
use rust_ndnd_common::Error;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Notify};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Feed handle a channel uses to push demultiplexed datagrams into a face.
pub(crate) type DatagramFeed = mpsc::UnboundedSender<io::Result<Bytes>>;

pub struct UnicastUdpTransport {
    base: Arc<TransportBase>,
    send_tx: mpsc::UnboundedSender<Bytes>,
    close: Arc<Notify>,
}

impl UnicastUdpTransport {
    /// Builds a transport multiplexed over a channel-owned socket.
    ///
    /// Incoming datagrams arrive through the returned feed; `idle_timeout`
    /// arms the reaper for on-demand faces (zero disables it).
    pub(crate) fn new_shared(
        socket: Arc<UdpSocket>,
        peer: SocketAddr,
        local_uri: FaceUri,
        remote_uri: FaceUri,
        scope: FaceScope,
        persistency: FacePersistency,
        idle_timeout: Duration,
        events: TransportEventSender,
    ) -> (Arc<Self>, DatagramFeed) {
        let (feed_tx, feed_rx) = mpsc::unbounded_channel();
        let transport = Self::spawn(
            socket,
            Some(peer),
            feed_rx,
            local_uri,
            remote_uri,
            scope,
            persistency,
            idle_timeout,
            events,
        );
        (transport, feed_tx)
    }

    /// Builds a transport over its own connected socket.
    ///
    /// Used for netdev-bound faces; these are never on-demand, so no idle
    /// reaping is armed.
    pub(crate) fn new_owned(
        socket: UdpSocket,
        local_uri: FaceUri,
        remote_uri: FaceUri,
        scope: FaceScope,
        persistency: FacePersistency,
        events: TransportEventSender,
    ) -> Arc<Self> {
        let socket = Arc::new(socket);
        let (feed_tx, feed_rx) = mpsc::unbounded_channel();

        // reader task: connected socket -> feed
        let reader_socket = Arc::clone(&socket);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 65536];
            loop {
                let item = match reader_socket.recv(&mut buf).await {
                    Ok(n) => Ok(Bytes::copy_from_slice(&buf[..n])),
                    Err(e) => Err(e),
                };
                if feed_tx.send(item).is_err() {
                    break;
                }
            }
        });

        Self::spawn(
            socket,
            None,
            feed_rx,
            local_uri,
            remote_uri,
            scope,
            persistency,
            Duration::ZERO,
            events,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn(
        socket: Arc<UdpSocket>,
        peer: Option<SocketAddr>,
        feed_rx: mpsc::UnboundedReceiver<io::Result<Bytes>>,
        local_uri: FaceUri,
        remote_uri: FaceUri,
        scope: FaceScope,
        persistency: FacePersistency,
        idle_timeout: Duration,
        events: TransportEventSender,
    ) -> Arc<Self> {
        let (send_tx, send_rx) = mpsc::unbounded_channel();
        let base = Arc::new(TransportBase::new(
            local_uri,
            remote_uri,
            scope,
            LinkType::PointToPoint,
            Some(MAX_NDN_PACKET_SIZE),
            persistency,
            events,
        ));
        let close = Arc::new(Notify::new());
        let used_recently = Arc::new(AtomicBool::new(false));
        let transport = Arc::new(Self {
            base: Arc::clone(&base),
            send_tx,
            close: Arc::clone(&close),
        });
        info!("[{}] Creating transport", base.remote_uri);

        let keep_alive = Arc::clone(&transport);
        tokio::spawn(async move {
            run(
                base,
                close,
                socket,
                peer,
                send_rx,
                feed_rx,
                used_recently,
                idle_timeout,
            )
            .await;
            defer_release(keep_alive);
        });
        transport
    }

}

impl Transport for UnicastUdpTransport {
    fn send(&self, block: Bytes) {
        if !self.base.admit_send(&block) {
            return;
        }
        if self.send_tx.send(block).is_err() {
            self.base.counters.n_dropped.increment();
        }
    }

    fn close(&self) {
        match self.base.state() {
            TransportState::Closing | TransportState::Failed | TransportState::Closed => return,
            _ => {}
        }
        info!("[{}] Closing transport", self.base.remote_uri);
        self.base.set_state(TransportState::Closing);
        self.close.notify_one();
    }

    fn state(&self) -> TransportState {
        self.base.state()
    }

    fn local_uri(&self) -> FaceUri {
        self.base.local_uri.clone()
    }

    fn remote_uri(&self) -> FaceUri {
        self.base.remote_uri.clone()
    }

    fn scope(&self) -> FaceScope {
        self.base.scope
    }

    fn persistency(&self) -> FacePersistency {
        self.base.persistency()
    }

    fn set_persistency(&self, persistency: FacePersistency) -> Result<(), Error> {
        // Unicast UDP honours every persistency; channels enforce the
        // monotone upgrade rule.
        *self.base.persistency.lock().unwrap() = persistency;
        Ok(())
    }

    fn link_type(&self) -> LinkType {
        self.base.link_type
    }

    fn mtu(&self) -> Option<usize> {
        self.base.mtu
    }

    fn counters(&self) -> Arc<FaceCounters> {
        Arc::clone(&self.base.counters)
    }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    base: Arc<TransportBase>,
    close: Arc<Notify>,
    socket: Arc<UdpSocket>,
    peer: Option<SocketAddr>,
    mut send_rx: mpsc::UnboundedReceiver<Bytes>,
    mut feed_rx: mpsc::UnboundedReceiver<io::Result<Bytes>>,
    used_recently: Arc<AtomicBool>,
    idle_timeout: Duration,
) {
    // The first idle check is deferred by one full period.
    let mut idle = if idle_timeout > Duration::ZERO {
        let mut timer = interval_at(Instant::now() + idle_timeout, idle_timeout);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Some(timer)
    } else {
        None
    };

    loop {
        tokio::select! {
            _ = close.notified() => {
                base.set_state(TransportState::Closing);
                base.set_state(TransportState::Closed);
                return;
            }
            block = send_rx.recv() => {
                let Some(block) = block else {
                    base.set_state(TransportState::Closing);
                    base.set_state(TransportState::Closed);
                    return;
                };
                let result = match peer {
                    Some(peer) => socket.send_to(&block, peer).await,
                    None => socket.send(&block).await,
                };
                match result {
                    Ok(_) => base.counters.n_out_bytes.add(block.len() as u64),
                    Err(e) => {
                        if base.persistency() == FacePersistency::Permanent {
                            // permanent faces ignore I/O errors and stay UP
                            debug!("[{}] Send failed (ignored): {}", base.remote_uri, e);
                        } else {
                            warn!("[{}] Send failed: {}", base.remote_uri, e);
                            base.set_state(TransportState::Failed);
                            base.set_state(TransportState::Closed);
                            return;
                        }
                    }
                }
            }
            datagram = feed_rx.recv() => {
                match datagram {
                    Some(Ok(datagram)) => {
                        base.counters.n_in_bytes.add(datagram.len() as u64);
                        if let Some(block) = validate_datagram(&base.remote_uri, &datagram) {
                            used_recently.store(true, Ordering::Relaxed);
                            base.deliver(block);
                        }
                    }
                    Some(Err(e)) => {
                        if base.persistency() == FacePersistency::Permanent {
                            debug!("[{}] Receive failed (ignored): {}", base.remote_uri, e);
                        } else {
                            warn!("[{}] Receive failed: {}", base.remote_uri, e);
                            base.set_state(TransportState::Failed);
                            base.set_state(TransportState::Closed);
                            return;
                        }
                    }
                    // channel is gone; nothing more will arrive
                    None => {
                        base.set_state(TransportState::Closing);
                        base.set_state(TransportState::Closed);
                        return;
                    }
                }
            }
            _ = tick(&mut idle) => {
                if base.persistency() == FacePersistency::OnDemand
                    && !used_recently.swap(false, Ordering::Relaxed)
                {
                    info!("[{}] Closing for inactivity", base.remote_uri);
                    base.set_state(TransportState::Closing);
                    base.set_state(TransportState::Closed);
                    return;
                }
            }
        }
    }
}

async fn tick(idle: &mut Option<tokio::time::Interval>) {
    match idle {
        Some(timer) => {
            timer.tick().await;
        }
        None => futures::future::pending::<()>().await,
    }
}

/// A datagram must contain exactly one TLV block.
pub(crate) fn validate_datagram(remote: &FaceUri, datagram: &Bytes) -> Option<Bytes> {
    if datagram.len() > MAX_NDN_PACKET_SIZE {
        warn!("[{}] Dropped oversize datagram of {} bytes", remote, datagram.len());
        return None;
    }
    match peek_block(datagram) {
        FrameStatus::Complete { size, .. } if size == datagram.len() => Some(datagram.clone()),
        FrameStatus::Complete { size, .. } => {
            warn!(
                "[{}] Dropped datagram: TLV length {} differs from datagram length {}",
                remote,
                size,
                datagram.len()
            );
            None
        }
        FrameStatus::Incomplete { .. } | FrameStatus::Malformed => {
            warn!("[{}] Dropped malformed datagram", remote);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportEvent;
    use rust_ndnd_common::ndn::{Interest, Name};
    use tokio::sync::mpsc::unbounded_channel;

    fn uris() -> (FaceUri, FaceUri) {
        (
            "udp4://127.0.0.1:6363".parse().unwrap(),
            "udp4://127.0.0.1:40000".parse().unwrap(),
        )
    }

    async fn shared_pair(
        persistency: FacePersistency,
        idle: Duration,
    ) -> (
        Arc<UnicastUdpTransport>,
        DatagramFeed,
        mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let (events_tx, events_rx) = unbounded_channel();
        let (local, remote) = uris();
        let (transport, feed) = UnicastUdpTransport::new_shared(
            socket,
            "127.0.0.1:40000".parse().unwrap(),
            local,
            remote,
            FaceScope::NonLocal,
            persistency,
            idle,
            events_tx,
        );
        (transport, feed, events_rx)
    }

    #[tokio::test]
    async fn delivers_well_formed_datagrams() {
        let (transport, feed, mut events_rx) =
            shared_pair(FacePersistency::OnDemand, Duration::ZERO).await;

        let wire = Interest::new(Name::from_string("/dg").unwrap()).to_wire();
        feed.send(Ok(wire.clone())).unwrap();

        match events_rx.recv().await.unwrap() {
            TransportEvent::Block(block) => assert_eq!(block, wire),
            other => panic!("expected block, got {:?}", other),
        }
        assert_eq!(transport.counters().n_in_bytes.value(), wire.len() as u64);
    }

    #[tokio::test]
    async fn malformed_datagram_does_not_change_state() {
        let (transport, feed, mut events_rx) =
            shared_pair(FacePersistency::OnDemand, Duration::ZERO).await;

        // one valid block plus trailing garbage: length mismatch
        let mut wire = Interest::new(Name::from_string("/dg").unwrap())
            .to_wire()
            .to_vec();
        wire.push(0xFF);
        feed.send(Ok(Bytes::from(wire))).unwrap();
        feed.send(Ok(Bytes::from_static(&[0x00, 0x01, 0x02])))
            .unwrap();

        // a good datagram after the bad ones still arrives
        let good = Interest::new(Name::from_string("/ok").unwrap()).to_wire();
        feed.send(Ok(good.clone())).unwrap();
        match events_rx.recv().await.unwrap() {
            TransportEvent::Block(block) => assert_eq!(block, good),
            other => panic!("expected block, got {:?}", other),
        }
        assert_eq!(transport.state(), TransportState::Up);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_face_is_reaped() {
        let (transport, feed, mut events_rx) =
            shared_pair(FacePersistency::OnDemand, Duration::from_secs(2)).await;

        // traffic within the first period keeps the face alive
        let wire = Interest::new(Name::from_string("/keep").unwrap()).to_wire();
        feed.send(Ok(wire)).unwrap();
        match events_rx.recv().await.unwrap() {
            TransportEvent::Block(_) => {}
            other => panic!("expected block, got {:?}", other),
        }

        // then silence: two periods later the face must be gone
        let mut states = Vec::new();
        while let Some(event) = events_rx.recv().await {
            if let TransportEvent::StateChange { new, .. } = event {
                states.push(new);
                if new == TransportState::Closed {
                    break;
                }
            }
        }
        assert_eq!(
            states,
            vec![TransportState::Closing, TransportState::Closed]
        );
        assert_eq!(transport.state(), TransportState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_face_is_not_reaped() {
        let (transport, _feed, _events_rx) =
            shared_pair(FacePersistency::Persistent, Duration::from_secs(1)).await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.state(), TransportState::Up);
    }
}
