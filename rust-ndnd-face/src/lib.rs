//! Face system for the ndnd forwarder.
//!
//! This crate terminates every wire-level link the forwarder speaks and
//! presents a uniform packet-exchange surface to the forwarding pipeline.
//! The hierarchy is leaf-first: a Transport frames bytes on one connection,
//! a LinkService translates between link blocks and network packets, a Face
//! pairs the two, a Channel produces Faces on accept/connect, a
//! ProtocolFactory owns the Channels of one scheme family, and the
//! FaceSystem dispatches configuration across the factories.

pub mod channel;
pub mod config;
pub mod face;
pub mod face_system;
pub mod face_table;
pub mod factory;
pub mod link_service;
pub mod net;
pub mod transport;

pub use face::{Face, FaceEvent};
pub use face_system::FaceSystem;
pub use face_table::FaceTable;
pub use factory::{ConfigContext, FaceCreateRequest, FaceCreationError, ProtocolFactory};

use std::time::Duration;

/// Maximum size of an NDN packet on any link.
pub const MAX_NDN_PACKET_SIZE: usize = rust_ndnd_common::tlv::MAX_NDN_PACKET_SIZE;

/// Default timeout for outgoing TCP connection attempts.
pub const DEFAULT_TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(4);

/// Default TCP and UDP unicast port.
pub const DEFAULT_PORT: u16 = 6363;

/// Default UDP multicast group and port.
pub const DEFAULT_UDP_MCAST_GROUP: &str = "224.0.23.170";
pub const DEFAULT_UDP_MCAST_PORT: u16 = 56363;

/// Default WebSocket listening port.
pub const DEFAULT_WS_PORT: u16 = 9696;

/// Default idle timeout for on-demand datagram faces.
pub const DEFAULT_UDP_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

/// Default Ethernet multicast group for NDN.
pub const DEFAULT_ETHER_MCAST_GROUP: &str = "01:00:5e:00:17:aa";

/// EtherType for NDN link packets.
pub const NDN_ETHERTYPE: u16 = 0x8624;

/// Reconnect backoff for permanent transports.
pub const RECONNECT_INITIAL_DELAY: Duration = Duration::from_secs(1);
pub const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(300);

/// Default WebSocket keep-alive parameters.
pub const DEFAULT_WS_PING_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_WS_PONG_TIMEOUT: Duration = Duration::from_secs(5);
