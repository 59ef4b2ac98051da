//! Stream transport shared by TCP and Unix faces.
//!
//! One task owns the socket: it services the FIFO send queue, frames the
//! receive stream into TLV blocks, applies the per-persistency error policy,
//! and for permanent transports runs the reconnect backoff loop.

use crate::transport::{
    defer_release, Transport, TransportBase, TransportEventSender, PARSE_FATAL_REASON,
};
use crate::{MAX_NDN_PACKET_SIZE, RECONNECT_INITIAL_DELAY, RECONNECT_MAX_DELAY};
use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use log::{debug, info, warn};
use rust_ndnd_common::counters::FaceCounters;
use rust_ndnd_common::face::{FacePersistency, FaceScope, LinkType, TransportState};
use rust_ndnd_common::tlv::{peek_block, FrameStatus};
use rust_ndnd_common::uri::FaceUri;
use rust_ndnd_common::Error;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Notify};

/// Re-establishes the connection of an outgoing permanent transport.
pub(crate) type Reconnector<S> =
    Box<dyn Fn() -> BoxFuture<'static, io::Result<S>> + Send + Sync>;

pub(crate) struct StreamTransportOptions {
    pub local_uri: FaceUri,
    pub remote_uri: FaceUri,
    pub scope: FaceScope,
    pub persistency: FacePersistency,
    /// Persistencies `set_persistency` may switch to.
    pub allowed_persistencies: Vec<FacePersistency>,
}

pub struct StreamTransport {
    base: Arc<TransportBase>,
    send_tx: mpsc::UnboundedSender<Bytes>,
    close: Arc<Notify>,
    can_reconnect: bool,
    allowed: Vec<FacePersistency>,
}

impl StreamTransport {
    pub(crate) fn spawn<S>(
        socket: S,
        options: StreamTransportOptions,
        reconnect: Option<Reconnector<S>>,
        events: TransportEventSender,
    ) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (send_tx, send_rx) = mpsc::unbounded_channel();
        let base = Arc::new(TransportBase::new(
            options.local_uri,
            options.remote_uri,
            options.scope,
            LinkType::PointToPoint,
            None,
            options.persistency,
            events,
        ));
        let close = Arc::new(Notify::new());
        let transport = Arc::new(Self {
            base: Arc::clone(&base),
            send_tx,
            close: Arc::clone(&close),
            can_reconnect: reconnect.is_some(),
            allowed: options.allowed_persistencies,
        });
        info!("[{}] Creating transport", base.remote_uri);

        let keep_alive = Arc::clone(&transport);
        tokio::spawn(async move {
            run(base, close, socket, send_rx, reconnect).await;
            defer_release(keep_alive);
        });
        transport
    }
}

impl Transport for StreamTransport {
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
        if persistency == self.base.persistency() {
            return Ok(());
        }
        if !self.allowed.contains(&persistency) {
            return Err(Error::UnsupportedPersistency(format!(
                "{} does not support {} persistency",
                self.base.remote_uri, persistency
            )));
        }
        if persistency == FacePersistency::Permanent && !self.can_reconnect {
            return Err(Error::UnsupportedPersistency(format!(
                "{} cannot reconnect and does not support permanent persistency",
                self.base.remote_uri
            )));
        }
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

enum SessionEnd {
    Close,
    Eof,
    Error(io::Error),
    ParseFatal,
}

async fn run<S>(
    base: Arc<TransportBase>,
    close: Arc<Notify>,
    socket: S,
    mut send_rx: mpsc::UnboundedReceiver<Bytes>,
    reconnect: Option<Reconnector<S>>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut input = BytesMut::with_capacity(MAX_NDN_PACKET_SIZE);
    let mut chunk = vec![0u8; MAX_NDN_PACKET_SIZE];
    let mut current = socket;

    'session: loop {
        let (mut rd, mut wr) = tokio::io::split(current);

        let end = loop {
            tokio::select! {
                _ = close.notified() => break SessionEnd::Close,
                block = send_rx.recv() => match block {
                    Some(block) => match wr.write_all(&block).await {
                        Ok(()) => base.counters.n_out_bytes.add(block.len() as u64),
                        Err(e) => break SessionEnd::Error(e),
                    },
                    // the owning transport handle is gone
                    None => break SessionEnd::Close,
                },
                read = rd.read(&mut chunk) => match read {
                    Ok(0) => break SessionEnd::Eof,
                    Ok(n) => {
                        base.counters.n_in_bytes.add(n as u64);
                        input.extend_from_slice(&chunk[..n]);
                        if !drain_input(&base, &mut input) {
                            break SessionEnd::ParseFatal;
                        }
                    }
                    Err(e) => break SessionEnd::Error(e),
                },
            }
        };

        let permanent = base.persistency() == FacePersistency::Permanent;
        match end {
            SessionEnd::Close => {
                base.set_state(TransportState::Closing);
                base.set_state(TransportState::Closed);
                break 'session;
            }
            SessionEnd::ParseFatal => {
                warn!("[{}] {}", base.remote_uri, PARSE_FATAL_REASON);
                base.set_state(TransportState::Failed);
                base.set_state(TransportState::Closed);
                break 'session;
            }
            SessionEnd::Eof | SessionEnd::Error(_) if !permanent || reconnect.is_none() => {
                match end {
                    SessionEnd::Eof => {
                        debug!("[{}] Connection closed by peer", base.remote_uri);
                        base.set_state(TransportState::Closing);
                    }
                    SessionEnd::Error(e) => {
                        warn!("[{}] Send or receive operation failed: {}", base.remote_uri, e);
                        base.set_state(TransportState::Failed);
                    }
                    _ => unreachable!(),
                }
                base.set_state(TransportState::Closed);
                break 'session;
            }
            SessionEnd::Eof | SessionEnd::Error(_) => {
                // permanent: go DOWN and reconnect with exponential backoff
                if let SessionEnd::Error(e) = &end {
                    warn!("[{}] I/O failure on permanent transport: {}", base.remote_uri, e);
                }
                base.set_state(TransportState::Down);
                input.clear();

                let Some(reconnector) = reconnect.as_ref() else {
                    base.set_state(TransportState::Failed);
                    base.set_state(TransportState::Closed);
                    break 'session;
                };
                let mut delay = RECONNECT_INITIAL_DELAY;
                current = loop {
                    tokio::select! {
                        _ = close.notified() => {
                            base.set_state(TransportState::Closing);
                            base.set_state(TransportState::Closed);
                            break 'session;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    let attempt = reconnector();
                    tokio::select! {
                        _ = close.notified() => {
                            base.set_state(TransportState::Closing);
                            base.set_state(TransportState::Closed);
                            break 'session;
                        }
                        result = attempt => match result {
                            Ok(socket) => break socket,
                            Err(e) => {
                                debug!("[{}] Reconnect attempt failed: {}", base.remote_uri, e);
                                delay = std::cmp::min(delay * 2, RECONNECT_MAX_DELAY);
                            }
                        }
                    }
                };
                info!("[{}] Reconnected", base.remote_uri);
                base.set_state(TransportState::Up);
            }
        }
    }
}

/// Frames as many complete blocks as the buffer holds.
///
/// Returns false on the fatal condition: a block whose declared size exceeds
/// MAX_NDN_PACKET_SIZE, or a full buffer that cannot make progress.
fn drain_input(base: &TransportBase, input: &mut BytesMut) -> bool {
    loop {
        match peek_block(input) {
            FrameStatus::Complete { size, .. } => {
                if size > MAX_NDN_PACKET_SIZE {
                    return false;
                }
                let block = input.split_to(size).freeze();
                base.deliver(block);
            }
            FrameStatus::Incomplete { declared: Some(declared) }
                if declared > MAX_NDN_PACKET_SIZE =>
            {
                return false;
            }
            FrameStatus::Incomplete { .. } | FrameStatus::Malformed => {
                return input.len() < MAX_NDN_PACKET_SIZE;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportEvent;
    use rust_ndnd_common::ndn::{Interest, Name};
    use tokio::sync::mpsc::unbounded_channel;

    fn options() -> StreamTransportOptions {
        StreamTransportOptions {
            local_uri: "tcp4://127.0.0.1:6363".parse().unwrap(),
            remote_uri: "tcp4://127.0.0.1:40000".parse().unwrap(),
            scope: FaceScope::Local,
            persistency: FacePersistency::OnDemand,
            allowed_persistencies: vec![
                FacePersistency::OnDemand,
                FacePersistency::Persistent,
            ],
        }
    }

    #[tokio::test]
    async fn frames_concatenated_blocks() {
        let (events_tx, mut events_rx) = unbounded_channel();
        let (mut peer, local) = tokio::io::duplex(16 * 1024);
        let transport = StreamTransport::spawn(local, options(), None, events_tx);

        let a = Interest::new(Name::from_string("/a").unwrap()).to_wire();
        let b = Interest::new(Name::from_string("/b").unwrap()).to_wire();
        let mut wire = a.to_vec();
        wire.extend_from_slice(&b);
        tokio::io::AsyncWriteExt::write_all(&mut peer, &wire)
            .await
            .unwrap();

        let first = events_rx.recv().await.unwrap();
        let second = events_rx.recv().await.unwrap();
        match (first, second) {
            (TransportEvent::Block(x), TransportEvent::Block(y)) => {
                assert_eq!(x, a);
                assert_eq!(y, b);
            }
            other => panic!("expected two blocks, got {:?}", other),
        }
        assert_eq!(
            transport.counters().n_in_bytes.value(),
            (a.len() + b.len()) as u64
        );
        assert_eq!(transport.state(), TransportState::Up);
    }

    #[tokio::test]
    async fn declared_oversize_is_fatal() {
        let (events_tx, mut events_rx) = unbounded_channel();
        let (mut peer, local) = tokio::io::duplex(16 * 1024);
        let _transport = StreamTransport::spawn(local, options(), None, events_tx);

        // Interest TLV declaring a 60000-byte value
        let header = [0x05u8, 253, 0xEA, 0x60];
        tokio::io::AsyncWriteExt::write_all(&mut peer, &header)
            .await
            .unwrap();

        let mut states = Vec::new();
        while let Some(event) = events_rx.recv().await {
            if let TransportEvent::StateChange { new, .. } = event {
                states.push(new);
                if new == TransportState::Closed {
                    break;
                }
            }
        }
        assert_eq!(states, vec![TransportState::Failed, TransportState::Closed]);
    }

    #[tokio::test]
    async fn eof_closes_gracefully() {
        let (events_tx, mut events_rx) = unbounded_channel();
        let (peer, local) = tokio::io::duplex(1024);
        let _transport = StreamTransport::spawn(local, options(), None, events_tx);

        drop(peer);

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
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (events_tx, mut events_rx) = unbounded_channel();
        let (_peer, local) = tokio::io::duplex(1024);
        let transport = StreamTransport::spawn(local, options(), None, events_tx);

        transport.close();
        transport.close();

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
    }
}
