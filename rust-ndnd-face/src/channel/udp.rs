//! UDP unicast channel.
//!
//! One socket serves every peer: a demultiplexing loop routes incoming
//! datagrams to per-peer faces by remote endpoint. The first datagram from
//! an unknown peer creates an on-demand face and is then delivered to it.

use crate::channel::{
    upgrade_persistency, AcceptFailedCallback, Channel, FaceCreatedCallback, FaceCreationError,
};
use crate::face::Face;
use crate::transport::datagram::{DatagramFeed, UnicastUdpTransport};
use bytes::Bytes;
use log::{debug, warn};
use rust_ndnd_common::face::{FacePersistency, FaceScope};
use rust_ndnd_common::uri::FaceUri;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

struct PeerEntry {
    face: Arc<Face>,
    feed: DatagramFeed,
}

#[derive(Default)]
struct Inner {
    faces: HashMap<SocketAddr, PeerEntry>,
    on_face_created: Option<FaceCreatedCallback>,
    on_receive_failed: Option<AcceptFailedCallback>,
}

pub struct UdpChannel {
    weak: Weak<Self>,
    socket: Arc<UdpSocket>,
    local: SocketAddr,
    local_uri: FaceUri,
    idle_timeout: Duration,
    listening: AtomicBool,
    inner: Mutex<Inner>,
    demux_task: Mutex<Option<JoinHandle<()>>>,
}

impl UdpChannel {
    /// Binds the channel socket and starts the demultiplexing loop.
    ///
    /// The loop runs from construction so outgoing faces can receive before
    /// `listen` is called; unknown peers are ignored until then.
    pub fn new(local: SocketAddr, idle_timeout: Duration) -> io::Result<Arc<Self>> {
        let socket = {
            use socket2::{Domain, Protocol, Socket, Type};
            let domain = if local.is_ipv4() {
                Domain::IPV4
            } else {
                Domain::IPV6
            };
            let raw = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
            if local.is_ipv6() {
                raw.set_only_v6(true)?;
            }
            raw.set_reuse_address(true)?;
            raw.bind(&local.into())?;
            raw.set_nonblocking(true)?;
            Arc::new(UdpSocket::from_std(raw.into())?)
        };
        let local = socket.local_addr()?;

        let channel = Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            socket,
            local,
            local_uri: FaceUri::from_udp_addr(local),
            idle_timeout,
            listening: AtomicBool::new(false),
            inner: Mutex::new(Inner::default()),
            demux_task: Mutex::new(None),
        });

        let demux = Arc::clone(&channel);
        let task = tokio::spawn(async move { demux.demux_loop().await });
        *channel.demux_task.lock().unwrap() = Some(task);
        Ok(channel)
    }

    pub fn local_endpoint(&self) -> SocketAddr {
        self.local
    }

    /// Starts creating faces for unknown peers. Idempotent.
    pub fn listen(
        &self,
        on_face_created: FaceCreatedCallback,
        on_receive_failed: AcceptFailedCallback,
    ) {
        if self.listening.swap(true, Ordering::SeqCst) {
            warn!("[{}] Already listening", self.local_uri);
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.on_face_created = Some(on_face_created);
        inner.on_receive_failed = Some(on_receive_failed);
    }

    /// Stops the demultiplexer and closes the channel's faces.
    ///
    /// Faces of a retired UDP channel share its socket and cannot outlive it.
    pub fn retire(&self) {
        if let Some(task) = self.demux_task.lock().unwrap().take() {
            task.abort();
        }
        self.listening.store(false, Ordering::SeqCst);
        let faces: Vec<Arc<Face>> = self
            .inner
            .lock()
            .unwrap()
            .faces
            .values()
            .map(|entry| Arc::clone(&entry.face))
            .collect();
        for face in faces {
            face.close();
        }
    }

    /// Creates or reuses a face for `remote`.
    pub fn connect(
        &self,
        remote: SocketAddr,
        persistency: FacePersistency,
    ) -> Result<Arc<Face>, FaceCreationError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.faces.get(&remote) {
            let face = Arc::clone(&entry.face);
            drop(inner);
            upgrade_persistency(&face, persistency);
            return Ok(face);
        }
        let (face, _feed) = self.make_face(&mut inner, remote, persistency, Duration::ZERO);
        Ok(face)
    }

    async fn demux_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; 65536];
        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((n, peer)) => {
                    let datagram = Bytes::copy_from_slice(&buf[..n]);
                    self.dispatch_datagram(peer, datagram);
                }
                Err(e) => {
                    debug!("[{}] Receive failed: {}", self.local_uri, e);
                    let callback = self.inner.lock().unwrap().on_receive_failed.clone();
                    if let Some(callback) = callback {
                        callback(&e.to_string());
                    }
                }
            }
        }
    }

    fn dispatch_datagram(&self, peer: SocketAddr, datagram: Bytes) {
        let (feed, created) = {
            let mut inner = self.inner.lock().unwrap();
            if let Some(entry) = inner.faces.get(&peer) {
                (entry.feed.clone(), None)
            } else if self.listening.load(Ordering::SeqCst) {
                debug!("[{}] New peer {}", self.local_uri, peer);
                let (face, feed) = self.make_face(
                    &mut inner,
                    peer,
                    FacePersistency::OnDemand,
                    self.idle_timeout,
                );
                let callback = inner.on_face_created.clone();
                (feed, Some((face, callback)))
            } else {
                debug!(
                    "[{}] Dropped datagram from unknown peer {}",
                    self.local_uri, peer
                );
                return;
            }
        };

        if let Some((face, Some(callback))) = created {
            callback(face);
        }
        let _ = feed.send(Ok(datagram));
    }

    fn make_face(
        &self,
        inner: &mut Inner,
        peer: SocketAddr,
        persistency: FacePersistency,
        idle_timeout: Duration,
    ) -> (Arc<Face>, DatagramFeed) {
        let scope = if self.local.ip().is_loopback() && peer.ip().is_loopback() {
            FaceScope::Local
        } else {
            FaceScope::NonLocal
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (transport, feed) = UnicastUdpTransport::new_shared(
            Arc::clone(&self.socket),
            peer,
            self.local_uri.clone(),
            FaceUri::from_udp_addr(peer),
            scope,
            persistency,
            idle_timeout,
            events_tx,
        );
        let face = Face::new(transport, events_rx, false);

        inner.faces.insert(
            peer,
            PeerEntry {
                face: Arc::clone(&face),
                feed: feed.clone(),
            },
        );

        let weak = self.weak.clone();
        face.on_closed(move || {
            if let Some(channel) = weak.upgrade() {
                debug!("Erasing {} from channel face map", peer);
                channel.inner.lock().unwrap().faces.remove(&peer);
            }
        });
        (face, feed)
    }
}

impl Channel for UdpChannel {
    fn local_uri(&self) -> FaceUri {
        self.local_uri.clone()
    }

    fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    fn size(&self) -> usize {
        self.inner.lock().unwrap().faces.len()
    }
}
