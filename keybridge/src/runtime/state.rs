use std::fmt;

use serde::Serialize;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub enum MidiInputState {
    #[default]
    Closed,
    Open,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub enum MidiOutputState {
    #[default]
    Closed,
    Open,
}

/// Lifecycle of one WebSocket port.
///
/// ```text
/// Connecting --open--> Connected --close--> Closed
///     |                    |
///     +------error---------+--> Error
/// any live state --explicit close--> Closing (record detached)
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub enum PortState {
    #[default]
    Connecting,
    Connected,
    Closing,
    Error,
    Closed,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PortEvent {
    TransportOpen,
    TransportError,
    TransportClose,
    CloseRequested,
}

impl PortState {
    /// The state after `event`, or `None` when the event is not legal here
    /// and should be ignored.
    pub fn next(self, event: PortEvent) -> Option<PortState> {
        use PortEvent::*;
        use PortState::*;

        match (self, event) {
            (Connecting, TransportOpen) => Some(Connected),
            (Connecting | Connected, TransportError) => Some(Error),
            (Connecting | Connected, TransportClose) => Some(Closed),
            (Closing, _) => None,
            (_, CloseRequested) => Some(Closing),
            _ => None,
        }
    }

    pub fn can_send(self) -> bool {
        self == PortState::Connected
    }

    /// Frames are only accepted while the transport can still produce them
    /// for this record.
    pub fn accepts_frames(self) -> bool {
        matches!(self, PortState::Connecting | PortState::Connected)
    }

    /// Numeric codes used by the host library: 0 is reserved for "no such
    /// port".
    pub fn code(self) -> i32 {
        match self {
            PortState::Connecting => 1,
            PortState::Connected => 2,
            PortState::Closing => 3,
            PortState::Closed => 4,
            PortState::Error => 5,
        }
    }
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortState::Connecting => write!(f, "connecting"),
            PortState::Connected => write!(f, "connected"),
            PortState::Closing => write!(f, "closing"),
            PortState::Error => write!(f, "error"),
            PortState::Closed => write!(f, "closed"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub enum PubSubState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PubSubEvent {
    ConnectRequested,
    TransportReady,
    TransportFailed,
    TransportClosed,
    CloseRequested,
}

impl PubSubState {
    pub fn next(self, event: PubSubEvent) -> Option<PubSubState> {
        use PubSubEvent::*;
        use PubSubState::*;

        match (self, event) {
            (Disconnected, ConnectRequested) => Some(Connecting),
            (Connecting, TransportReady) => Some(Connected),
            (Connecting, TransportFailed) => Some(Disconnected),
            (Connecting | Connected, TransportClosed | CloseRequested) => {
                Some(Disconnected)
            }
            _ => None,
        }
    }

    pub fn can_publish(self) -> bool {
        self == PubSubState::Connected
    }
}

impl fmt::Display for PubSubState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PubSubState::Disconnected => write!(f, "disconnected"),
            PubSubState::Connecting => write!(f, "connecting"),
            PubSubState::Connected => write!(f, "connected"),
        }
    }
}
