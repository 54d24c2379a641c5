use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle of the update channel's connection to the relay.
///
/// The machine moves `Connecting → Open → Closed → Reconnecting → Connecting
/// → …` and terminates in [`ConnectionState::Abandoned`] once the retry
/// budget is spent.  The attempt counter carried by `Reconnecting` is
/// monotonically increasing across consecutive failures and resets to zero on
/// every successful open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// A connection attempt is in flight.
    Connecting,
    /// The WebSocket is established and frames are being consumed.
    Open,
    /// The transport dropped (remote close or I/O error).
    Closed,
    /// A reconnect is scheduled; `attempt` counts consecutive failures.
    Reconnecting { attempt: u32 },
    /// The retry budget is exhausted.  Terminal: the channel will not
    /// reconnect on its own and the hosting application should alert an
    /// operator.
    Abandoned { attempts: u32 },
}

impl ConnectionState {
    /// Whether the channel has given up and requires outside intervention.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Abandoned { .. })
    }
}

/// A structured update frame as it appears on the wire.
///
/// `location` carries 3 components (a delta triple) or 4 (legacy senders
/// append a rotation-magnitude element that is ignored on receipt).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateFrame {
    pub name: String,
    pub location: Vec<f64>,
}

/// A structured selection frame: the remote operator picked an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectFrame {
    pub select: String,
}

/// Error taxonomy for the twin engine.
///
/// All variants are recovered locally by the component that detects them;
/// only [`TwinError::ReconnectExhausted`] escalates into an observable
/// terminal state.  Nothing here is allowed to crash the process.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TwinError {
    #[error("malformed wire frame: {0}")]
    Decode(String),

    #[error("no entity named '{0}' in the registry")]
    EntityNotFound(String),

    #[error("entity registry has not been populated yet")]
    RegistryUnavailable,

    #[error("scene backend error: {0}")]
    Scene(String),

    #[error("invalid delta: {0}")]
    InvalidDelta(String),

    #[error("transport failure: {0}")]
    Connection(String),

    #[error("gave up reconnecting after {attempts} failed attempts")]
    ReconnectExhausted { attempts: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_frame_roundtrip() {
        let frame = UpdateFrame {
            name: "part_3".to_string(),
            location: vec![1.0, -2.5, 0.0],
        };
        let json = serde_json::to_string(&frame).unwrap();
        let back: UpdateFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(frame, back);
    }

    #[test]
    fn select_frame_decodes_from_wire_shape() {
        let frame: SelectFrame = serde_json::from_str(r#"{"select":"part_7"}"#).unwrap();
        assert_eq!(frame.select, "part_7");
    }

    #[test]
    fn connection_state_roundtrip() {
        let state = ConnectionState::Reconnecting { attempt: 3 };
        let json = serde_json::to_string(&state).unwrap();
        let back: ConnectionState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, back);
    }

    #[test]
    fn only_abandoned_is_terminal() {
        assert!(ConnectionState::Abandoned { attempts: 5 }.is_terminal());
        assert!(!ConnectionState::Open.is_terminal());
        assert!(!ConnectionState::Reconnecting { attempt: 4 }.is_terminal());
    }

    #[test]
    fn error_display() {
        let err = TwinError::EntityNotFound("part_9".to_string());
        assert!(err.to_string().contains("part_9"));

        let err2 = TwinError::ReconnectExhausted { attempts: 5 };
        assert!(err2.to_string().contains("5"));
    }
}
