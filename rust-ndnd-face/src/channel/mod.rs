//! Channels: bound local endpoints that produce faces on accept/connect.
//!
//! Every channel keeps a map from remote endpoint to the face serving it;
//! an entry disappears when its face reaches CLOSED. `connect` to a mapped
//! remote returns the existing face, applying at most a monotone persistency
//! upgrade.

pub mod tcp;
pub mod udp;
pub mod unix;
pub mod websocket;

use crate::face::Face;
use log::debug;
use rust_ndnd_common::face::FacePersistency;
use rust_ndnd_common::uri::FaceUri;
use std::sync::Arc;

/// Invoked for every face a channel creates.
pub type FaceCreatedCallback = Arc<dyn Fn(Arc<Face>) + Send + Sync>;

/// Invoked when an accept or receive attempt fails; the loop continues.
pub type AcceptFailedCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Face-creation failure carrying a management-protocol status code.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{status}: {reason}")]
pub struct FaceCreationError {
    pub status: u16,
    pub reason: String,
}

impl FaceCreationError {
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }
}

/// Read-only channel surface for status reporting.
pub trait Channel: Send + Sync {
    fn local_uri(&self) -> FaceUri;
    fn is_listening(&self) -> bool;
    fn size(&self) -> usize;
}

/// Binds a TCP listener with reuse-address, and v6-only for IPv6 wildcards
/// so the v4 and v6 channels of one port coexist.
pub(crate) fn bind_tcp_listener(
    local: std::net::SocketAddr,
) -> std::io::Result<tokio::net::TcpListener> {
    use socket2::{Domain, Protocol, Socket, Type};
    let domain = if local.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    if local.is_ipv6() {
        socket.set_only_v6(true)?;
    }
    socket.set_reuse_address(true)?;
    socket.bind(&local.into())?;
    socket.listen(128)?;
    socket.set_nonblocking(true)?;
    tokio::net::TcpListener::from_std(socket.into())
}

/// Applies the requested persistency iff it is a monotone upgrade;
/// anything else is silently ignored.
pub(crate) fn upgrade_persistency(face: &Face, requested: FacePersistency) {
    let current = face.persistency();
    if requested != current && current.can_upgrade_to(requested) {
        if let Err(e) = face.set_persistency(requested) {
            debug!(
                "[{}] Persistency upgrade to {} refused: {}",
                face.remote_uri(),
                requested,
                e
            );
        }
    }
}
