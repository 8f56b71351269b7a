//! Connection state of the single device link.

/// Connection state of the link.
///
/// Exactly one of these is current per [`LinkManager`](crate::LinkManager).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// No operation running and no device connected.
    #[default]
    Idle,
    /// A discovery pass is running.
    Discovering,
    /// Bonding with an unpaired device.
    Pairing,
    /// Opening the serial session.
    Connecting,
    /// A session is open and streaming.
    Connected,
    /// Closing the session on request.
    Disconnecting,
    /// The session died without being asked to.
    Lost,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if a connect attempt is in flight.
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Pairing | Self::Connecting)
    }

    /// Check if in a transitional state.
    pub fn is_transitioning(&self) -> bool {
        matches!(
            self,
            Self::Discovering | Self::Pairing | Self::Connecting | Self::Disconnecting
        )
    }

    /// Check if a new discovery or connect request may start from here.
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Idle | Self::Lost)
    }

    /// Whether the transition `self -> next` is part of the lifecycle.
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (Idle | Lost, Discovering)
                | (Discovering, Idle)
                | (Idle | Lost, Pairing)
                | (Idle | Lost, Connecting)
                | (Pairing, Connecting)
                | (Pairing | Connecting, Idle)
                | (Connecting, Connected)
                | (Connected, Lost)
                | (Connected, Disconnecting)
                | (Disconnecting, Idle)
                | (Lost, Idle)
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Discovering => write!(f, "Discovering"),
            Self::Pairing => write!(f, "Pairing"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnecting => write!(f, "Disconnecting"),
            Self::Lost => write!(f, "Lost"),
        }
    }
}
