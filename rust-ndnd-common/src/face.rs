//! Face-level enumerations shared across the face system.
//!
//! These types are the vocabulary of the face lifecycle: identity,
//! persistency, scope, link type, and the transport state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a face, assigned by the face table.
///
/// Id 0 is reserved for "invalid": a face carries it until registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FaceId(pub u64);

impl FaceId {
    pub const INVALID: FaceId = FaceId(0);

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for FaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The policy governing a face's survival of idle periods and I/O errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FacePersistency {
    /// Created when a remote peer first contacts us; subject to idle reaping.
    OnDemand,
    /// Created explicitly; closed and re-created on I/O errors.
    Persistent,
    /// Created explicitly; survives all I/O errors.
    Permanent,
}

impl FacePersistency {
    /// Whether changing to `next` is a monotone upgrade.
    ///
    /// Allowed transitions are on-demand -> persistent, on-demand ->
    /// permanent, and persistent -> permanent.
    pub fn can_upgrade_to(self, next: FacePersistency) -> bool {
        next != self
            && (self == FacePersistency::OnDemand || next == FacePersistency::Permanent)
    }
}

impl fmt::Display for FacePersistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FacePersistency::OnDemand => "on-demand",
            FacePersistency::Persistent => "persistent",
            FacePersistency::Permanent => "permanent",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for FacePersistency {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on-demand" => Ok(FacePersistency::OnDemand),
            "persistent" => Ok(FacePersistency::Persistent),
            "permanent" => Ok(FacePersistency::Permanent),
            _ => Err(crate::error::Error::Config(format!(
                "Invalid persistency '{}'",
                s
            ))),
        }
    }
}

/// Whether both endpoints of a face sit on the local host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaceScope {
    Local,
    NonLocal,
}

impl fmt::Display for FaceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FaceScope::Local => "local",
            FaceScope::NonLocal => "non-local",
        };
        write!(f, "{}", s)
    }
}

/// Whether a face reaches one peer or a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkType {
    PointToPoint,
    MultiAccess,
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkType::PointToPoint => "point-to-point",
            LinkType::MultiAccess => "multi-access",
        };
        write!(f, "{}", s)
    }
}

/// Connection state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportState {
    Up,
    Down,
    Closing,
    Failed,
    Closed,
}

impl TransportState {
    /// Whether the state machine permits moving to `next`.
    pub fn can_transition_to(self, next: TransportState) -> bool {
        use TransportState::*;
        matches!(
            (self, next),
            (Up, Down)
                | (Down, Up)
                | (Up, Closing)
                | (Down, Closing)
                | (Up, Failed)
                | (Down, Failed)
                | (Closing, Closed)
                | (Failed, Closed)
        )
    }

    /// Terminal state check: no transitions leave Closed.
    pub fn is_terminal(self) -> bool {
        self == TransportState::Closed
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportState::Up => "UP",
            TransportState::Down => "DOWN",
            TransportState::Closing => "CLOSING",
            TransportState::Failed => "FAILED",
            TransportState::Closed => "CLOSED",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistency_upgrade_rules() {
        use FacePersistency::*;
        assert!(OnDemand.can_upgrade_to(Persistent));
        assert!(OnDemand.can_upgrade_to(Permanent));
        assert!(Persistent.can_upgrade_to(Permanent));

        assert!(!Persistent.can_upgrade_to(OnDemand));
        assert!(!Permanent.can_upgrade_to(Persistent));
        assert!(!Permanent.can_upgrade_to(OnDemand));
        assert!(!OnDemand.can_upgrade_to(OnDemand));
    }

    #[test]
    fn state_machine_edges() {
        use TransportState::*;
        assert!(Up.can_transition_to(Down));
        assert!(Down.can_transition_to(Up));
        assert!(Up.can_transition_to(Closing));
        assert!(Down.can_transition_to(Failed));
        assert!(Closing.can_transition_to(Closed));
        assert!(Failed.can_transition_to(Closed));

        assert!(!Up.can_transition_to(Closed));
        assert!(!Closed.can_transition_to(Up));
        assert!(!Closing.can_transition_to(Up));
        assert!(!Failed.can_transition_to(Up));
        assert!(Closed.is_terminal());
    }
}
