//! WebSocket transport.
//!
//! Each accepted WebSocket connection backs one on-demand face. Every
//! message is a single binary frame holding exactly one TLV block. The
//! transport pings the client on a fixed interval and fails the face when
//! pongs stop arriving.

use crate::transport::{defer_release, Transport, TransportBase, TransportEventSender};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use rust_ndnd_common::counters::FaceCounters;
use rust_ndnd_common::face::{FacePersistency, FaceScope, LinkType, TransportState};
use rust_ndnd_common::tlv::{peek_block, FrameStatus};
use rust_ndnd_common::uri::FaceUri;
use rust_ndnd_common::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

pub struct WebSocketTransport {
    base: Arc<TransportBase>,
    send_tx: mpsc::UnboundedSender<Bytes>,
    close: Arc<Notify>,
}

impl WebSocketTransport {
    pub(crate) fn spawn(
        stream: WebSocketStream<TcpStream>,
        local: SocketAddr,
        remote: SocketAddr,
        ping_interval: Duration,
        pong_timeout: Duration,
        events: TransportEventSender,
    ) -> Arc<Self> {
        let scope = if local.ip().is_loopback() && remote.ip().is_loopback() {
            FaceScope::Local
        } else {
            FaceScope::NonLocal
        };

        let (send_tx, send_rx) = mpsc::unbounded_channel();
        let base = Arc::new(TransportBase::new(
            FaceUri::from_ws_addr("ws", local),
            FaceUri::from_ws_addr("wsclient", remote),
            scope,
            LinkType::PointToPoint,
            None,
            FacePersistency::OnDemand,
            events,
        ));
        let close = Arc::new(Notify::new());
        let transport = Arc::new(Self {
            base: Arc::clone(&base),
            send_tx,
            close: Arc::clone(&close),
        });
        info!("[{}] Creating transport", base.remote_uri);

        let keep_alive = Arc::clone(&transport);
        tokio::spawn(async move {
            run(base, close, stream, send_rx, ping_interval, pong_timeout).await;
            defer_release(keep_alive);
        });
        transport
    }
}

impl Transport for WebSocketTransport {
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
        if persistency != FacePersistency::OnDemand {
            return Err(Error::UnsupportedPersistency(
                "WebSocket faces are always on-demand".into(),
            ));
        }
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

async fn run(
    base: Arc<TransportBase>,
    close: Arc<Notify>,
    stream: WebSocketStream<TcpStream>,
    mut send_rx: mpsc::UnboundedReceiver<Bytes>,
    ping_interval: Duration,
    pong_timeout: Duration,
) {
    let (mut sink, mut source) = stream.split();
    let mut ping_timer = interval_at(Instant::now() + ping_interval, ping_interval);
    ping_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_pong = Instant::now();

    loop {
        tokio::select! {
            _ = close.notified() => {
                let _ = sink.send(Message::Close(None)).await;
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
                let len = block.len();
                match sink.send(Message::Binary(block.to_vec())).await {
                    Ok(()) => base.counters.n_out_bytes.add(len as u64),
                    Err(e) => {
                        warn!("[{}] Send failed: {}", base.remote_uri, e);
                        base.set_state(TransportState::Failed);
                        base.set_state(TransportState::Closed);
                        return;
                    }
                }
            }
            message = source.next() => {
                match message {
                    Some(Ok(Message::Binary(data))) => {
                        base.counters.n_in_bytes.add(data.len() as u64);
                        let datagram = Bytes::from(data);
                        match peek_block(&datagram) {
                            FrameStatus::Complete { size, .. } if size == datagram.len() => {
                                base.deliver(datagram);
                            }
                            _ => warn!("[{}] Failed to parse message payload", base.remote_uri),
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        base.counters.n_in_pongs.increment();
                        last_pong = Instant::now();
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = sink.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("[{}] Connection closed by peer", base.remote_uri);
                        base.set_state(TransportState::Closing);
                        base.set_state(TransportState::Closed);
                        return;
                    }
                    Some(Ok(_)) => {
                        // text and raw frames are not part of the protocol
                        warn!("[{}] Dropped non-binary message", base.remote_uri);
                    }
                    Some(Err(e)) => {
                        warn!("[{}] Receive failed: {}", base.remote_uri, e);
                        base.set_state(TransportState::Failed);
                        base.set_state(TransportState::Closed);
                        return;
                    }
                }
            }
            _ = ping_timer.tick() => {
                if last_pong.elapsed() > pong_timeout + ping_interval {
                    warn!("[{}] Pong timeout", base.remote_uri);
                    base.set_state(TransportState::Failed);
                    let _ = sink.send(Message::Close(None)).await;
                    base.set_state(TransportState::Closed);
                    return;
                }
                match sink.send(Message::Ping(b"ndnd".to_vec())).await {
                    Ok(()) => base.counters.n_out_pings.increment(),
                    Err(e) => {
                        warn!("[{}] Ping failed: {}", base.remote_uri, e);
                        base.set_state(TransportState::Failed);
                        base.set_state(TransportState::Closed);
                        return;
                    }
                }
            }
        }
    }
}
