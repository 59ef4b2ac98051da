//! Multicast Ethernet transport.
//!
//! One transport per (interface, group) pair, always permanent and
//! multi-access. Frames use the dedicated NDN EtherType and carry an
//! NDNLPv2 link packet whose single fragment is the network packet. The
//! datalink channel is blocking, so receive and transmit run on dedicated
//! threads bridged into the reactor.

use crate::transport::{defer_release, Transport, TransportBase, TransportEventSender};
use crate::NDN_ETHERTYPE;
use bytes::Bytes;
use log::{debug, info, trace, warn};
use pnet::datalink::{self, Channel, Config, NetworkInterface};
use pnet::packet::ethernet::{EtherType, EthernetPacket, MutableEthernetPacket};
use pnet::packet::{MutablePacket, Packet};
use pnet::util::MacAddr;
use rust_ndnd_common::counters::FaceCounters;
use rust_ndnd_common::face::{FacePersistency, FaceScope, LinkType, TransportState};
use rust_ndnd_common::ndn::LpPacket;
use rust_ndnd_common::tlv::{peek_block, FrameStatus};
use rust_ndnd_common::uri::FaceUri;
use rust_ndnd_common::Error;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

const ETHER_HEADER_LEN: usize = 14;
/// Conventional Ethernet payload limit.
const ETHER_MTU: usize = 1500;

pub struct EthernetTransport {
    base: Arc<TransportBase>,
    send_tx: mpsc::UnboundedSender<Bytes>,
    close: Arc<Notify>,
    stop: Arc<AtomicBool>,
    ifname: String,
}

impl EthernetTransport {
    /// Opens a datalink channel on `ifname` and spawns the transport for
    /// multicast `group`.
    pub(crate) fn spawn(
        ifname: &str,
        group: MacAddr,
        keep_alive: Option<Duration>,
        events: TransportEventSender,
    ) -> Result<Arc<Self>, Error> {
        let iface = find_interface(ifname)?;
        let local_mac = iface
            .mac
            .ok_or_else(|| Error::Transport(format!("{ifname} has no MAC address")))?;

        let config = Config {
            read_timeout: Some(Duration::from_millis(100)),
            ..Config::default()
        };
        let (mut link_tx, mut link_rx) = match datalink::channel(&iface, config) {
            Ok(Channel::Ethernet(tx, rx)) => (tx, rx),
            Ok(_) => {
                return Err(Error::Transport(format!(
                    "{ifname}: unsupported datalink channel type"
                )))
            }
            Err(e) => {
                return Err(Error::Transport(format!(
                    "{ifname}: cannot open datalink channel: {e}"
                )))
            }
        };

        let (send_tx, mut send_rx) = mpsc::unbounded_channel::<Bytes>();
        let (feed_tx, mut feed_rx) = mpsc::unbounded_channel::<Bytes>();
        let (frame_tx, frame_rx) = std::sync::mpsc::channel::<Bytes>();

        let base = Arc::new(TransportBase::new(
            FaceUri::from_dev(ifname),
            FaceUri::from_ether(&group.to_string())?,
            FaceScope::NonLocal,
            LinkType::MultiAccess,
            Some(ETHER_MTU),
            FacePersistency::Permanent,
            events,
        ));
        let close = Arc::new(Notify::new());
        let stop = Arc::new(AtomicBool::new(false));
        let transport = Arc::new(Self {
            base: Arc::clone(&base),
            send_tx,
            close: Arc::clone(&close),
            stop: Arc::clone(&stop),
            ifname: ifname.to_string(),
        });
        info!("[{}] Creating transport on {}", base.remote_uri, ifname);

        // receive thread: frames for our EtherType and group
        {
            let stop = Arc::clone(&stop);
            let name = ifname.to_string();
            std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    match link_rx.next() {
                        Ok(frame) => {
                            let Some(packet) = EthernetPacket::new(frame) else {
                                continue;
                            };
                            if packet.get_ethertype() != EtherType(NDN_ETHERTYPE)
                                || packet.get_destination() != group
                                || packet.get_source() == local_mac
                            {
                                continue;
                            }
                            let payload = Bytes::copy_from_slice(packet.payload());
                            if feed_tx.send(payload).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::TimedOut
                            || e.kind() == io::ErrorKind::WouldBlock => {}
                        Err(e) => {
                            debug!("[{}] Datalink receive failed (ignored): {}", name, e);
                        }
                    }
                }
                trace!("[{}] Receive thread stopped", name);
            });
        }

        // transmit thread: builds and sends frames
        {
            let stop = Arc::clone(&stop);
            let name = ifname.to_string();
            std::thread::spawn(move || {
                while let Ok(payload) = frame_rx.recv() {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    let mut buffer = vec![0u8; ETHER_HEADER_LEN + payload.len()];
                    let Some(mut frame) = MutableEthernetPacket::new(&mut buffer) else {
                        continue;
                    };
                    frame.set_destination(group);
                    frame.set_source(local_mac);
                    frame.set_ethertype(EtherType(NDN_ETHERTYPE));
                    frame.payload_mut().copy_from_slice(&payload);
                    match link_tx.send_to(&buffer, None) {
                        Some(Ok(())) => {}
                        Some(Err(e)) => {
                            debug!("[{}] Datalink send failed (ignored): {}", name, e)
                        }
                        None => debug!("[{}] Datalink send not attempted", name),
                    }
                }
                trace!("[{}] Transmit thread stopped", name);
            });
        }

        // reactor-side task: queues, keep-alive, lifecycle
        let task_base = Arc::clone(&base);
        let task_close = Arc::clone(&close);
        let task_stop = Arc::clone(&stop);
        let keep_alive_handle = Arc::clone(&transport);
        tokio::spawn(async move {
            let mut heartbeat = keep_alive.map(|period| {
                let mut timer = interval_at(Instant::now() + period, period);
                timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
                timer
            });
            loop {
                tokio::select! {
                    _ = task_close.notified() => {
                        task_stop.store(true, Ordering::Relaxed);
                        task_base.set_state(TransportState::Closing);
                        task_base.set_state(TransportState::Closed);
                        break;
                    }
                    block = send_rx.recv() => {
                        let Some(block) = block else {
                            task_stop.store(true, Ordering::Relaxed);
                            task_base.set_state(TransportState::Closing);
                            task_base.set_state(TransportState::Closed);
                            break;
                        };
                        task_base
                            .counters
                            .n_out_bytes
                            .add((block.len() + ETHER_HEADER_LEN) as u64);
                        let _ = frame_tx.send(block);
                    }
                    payload = feed_rx.recv() => {
                        let Some(payload) = payload else { continue };
                        task_base
                            .counters
                            .n_in_bytes
                            .add((payload.len() + ETHER_HEADER_LEN) as u64);
                        // frames may carry trailing padding up to the 60-byte
                        // minimum; keep the declared block only
                        match peek_block(&payload) {
                            FrameStatus::Complete { size, .. } => {
                                task_base.deliver(payload.slice(..size));
                            }
                            _ => warn!(
                                "[{}] Dropped malformed frame payload",
                                task_base.remote_uri
                            ),
                        }
                    }
                    _ = heartbeat_tick(&mut heartbeat) => {
                        let idle = LpPacket::idle().to_wire();
                        task_base
                            .counters
                            .n_out_bytes
                            .add((idle.len() + ETHER_HEADER_LEN) as u64);
                        let _ = frame_tx.send(idle);
                        task_base.counters.n_out_pings.increment();
                    }
                }
            }
            defer_release(keep_alive_handle);
        });

        Ok(transport)
    }

    pub fn ifname(&self) -> &str {
        &self.ifname
    }
}

async fn heartbeat_tick(heartbeat: &mut Option<tokio::time::Interval>) {
    match heartbeat {
        Some(timer) => {
            timer.tick().await;
        }
        None => futures::future::pending::<()>().await,
    }
}

fn find_interface(ifname: &str) -> Result<NetworkInterface, Error> {
    datalink::interfaces()
        .into_iter()
        .find(|iface| iface.name == ifname)
        .ok_or_else(|| Error::Transport(format!("No such network interface: {ifname}")))
}

impl Transport for EthernetTransport {
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
        self.stop.store(true, Ordering::Relaxed);
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
