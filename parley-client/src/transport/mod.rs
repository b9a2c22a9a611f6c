//! Media transports
//!
//! One outbound transport carries the local publication; a pool of inbound
//! transports carries remote publications. Each transport is a small state
//! machine whose transitions are driven by the session controller after the
//! matching signaling round-trip succeeds.

mod pool;
mod recv;
mod send;

pub use pool::InboundTransportPool;
pub use recv::{Consumer, InboundTransport};
pub use send::{OutboundTransport, Producer};

/// Lifecycle state of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// No transport exists yet
    Uninitialized,
    /// Instantiated from server parameters, not yet connected
    Created,
    /// Server acknowledged our network parameters
    Connected,
    /// Outbound only: the local producer is active
    Producing,
    /// Torn down; terminal
    Closed,
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransportState::Uninitialized => "uninitialized",
            TransportState::Created => "created",
            TransportState::Connected => "connected",
            TransportState::Producing => "producing",
            TransportState::Closed => "closed",
        };
        f.write_str(name)
    }
}
