//! The update channel: a persistent WebSocket connection to the relay that
//! feeds controller samples and remote selections into the twin session.
//!
//! * [`protocol`] – wire frame decoding/encoding (JSON + legacy text).
//! * [`backoff`] – the reconnect policy with its exhaustion budget.
//! * [`pending`] – bounded holding area for updates that arrive before the
//!   registry is populated.
//! * [`channel`] – the connection state machine itself.

pub mod backoff;
pub mod channel;
pub mod pending;
pub mod protocol;

pub use backoff::ReconnectPolicy;
pub use channel::{ChannelConfig, ChannelHealth, UpdateChannel};
pub use pending::{PendingQueue, PendingUpdate};
pub use protocol::{ChannelMessage, WireKind};
