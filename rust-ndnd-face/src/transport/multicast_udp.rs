//! UDP multicast transport.
//!
//! One transport per (interface, group) pair, always permanent and
//! multi-access. Send and receive errors never take the face down; multicast
//! membership is released with the socket on close.

use crate::transport::datagram::validate_datagram;
use crate::transport::{defer_release, Transport, TransportBase, TransportEventSender};
use crate::MAX_NDN_PACKET_SIZE;
use bytes::Bytes;
use log::{debug, info, warn};
use rust_ndnd_common::counters::FaceCounters;
use rust_ndnd_common::face::{FacePersistency, FaceScope, LinkType, TransportState};
use rust_ndnd_common::uri::FaceUri;
use rust_ndnd_common::Error;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Notify};

pub struct MulticastUdpTransport {
    base: Arc<TransportBase>,
    send_tx: mpsc::UnboundedSender<Bytes>,
    close: Arc<Notify>,
    ifname: String,
}

impl MulticastUdpTransport {
    /// Joins `group` on the interface holding `local_addr` and spawns the
    /// transport.
    pub(crate) fn spawn(
        ifname: &str,
        local_addr: Ipv4Addr,
        group: Ipv4Addr,
        port: u16,
        events: TransportEventSender,
    ) -> io::Result<Arc<Self>> {
        let socket = multicast_socket(group, port, local_addr)?;
        let group_addr = SocketAddr::V4(SocketAddrV4::new(group, port));

        let (send_tx, send_rx) = mpsc::unbounded_channel();
        let base = Arc::new(TransportBase::new(
            FaceUri::from_udp_addr(SocketAddr::new(IpAddr::V4(local_addr), port)),
            FaceUri::from_udp_addr(group_addr),
            FaceScope::NonLocal,
            LinkType::MultiAccess,
            Some(MAX_NDN_PACKET_SIZE),
            FacePersistency::Permanent,
            events,
        ));
        let close = Arc::new(Notify::new());
        let transport = Arc::new(Self {
            base: Arc::clone(&base),
            send_tx,
            close: Arc::clone(&close),
            ifname: ifname.to_string(),
        });
        info!(
            "[{}] Creating multicast transport on {}",
            base.remote_uri, ifname
        );

        let keep_alive = Arc::clone(&transport);
        tokio::spawn(async move {
            run(base, close, socket, group_addr, send_rx).await;
            defer_release(keep_alive);
        });
        Ok(transport)
    }

    pub fn ifname(&self) -> &str {
        &self.ifname
    }
}

impl Transport for MulticastUdpTransport {
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
        if persistency != FacePersistency::Permanent {
            return Err(Error::UnsupportedPersistency(
                "Multicast faces are always permanent".into(),
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
    socket: UdpSocket,
    group_addr: SocketAddr,
    mut send_rx: mpsc::UnboundedReceiver<Bytes>,
) {
    let mut buf = vec![0u8; 65536];
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
                match socket.send_to(&block, group_addr).await {
                    Ok(_) => base.counters.n_out_bytes.add(block.len() as u64),
                    // multicast faces stay UP through send failures
                    Err(e) => debug!("[{}] Send failed (ignored): {}", base.remote_uri, e),
                }
            }
            received = socket.recv_from(&mut buf) => {
                match received {
                    Ok((n, _source)) => {
                        let datagram = Bytes::copy_from_slice(&buf[..n]);
                        base.counters.n_in_bytes.add(datagram.len() as u64);
                        if let Some(block) = validate_datagram(&base.remote_uri, &datagram) {
                            base.deliver(block);
                        }
                    }
                    Err(e) => {
                        warn!("[{}] Receive failed (ignored): {}", base.remote_uri, e);
                    }
                }
            }
        }
    }
}

/// Binds a reusable socket to the group port and joins the group on the
/// interface holding `local_addr`.
fn multicast_socket(group: Ipv4Addr, port: u16, local_addr: Ipv4Addr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::V4(SocketAddrV4::new(group, port)).into())?;
    socket.join_multicast_v4(&group, &local_addr)?;
    socket.set_multicast_if_v4(&local_addr)?;
    socket.set_multicast_loop_v4(false)?;
    UdpSocket::from_std(socket.into())
}
