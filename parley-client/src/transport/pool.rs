//! Pool of inbound transports keyed by server transport id

use std::collections::BTreeMap;

use tracing::warn;

use super::{Consumer, InboundTransport, TransportState};

/// Every inbound transport of the current session
#[derive(Debug, Default)]
pub struct InboundTransportPool {
    transports: BTreeMap<String, InboundTransport>,
}

impl InboundTransportPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a transport; a duplicate id keeps the existing one
    ///
    /// Returns `false` when the id was already present.
    pub fn insert(&mut self, transport: InboundTransport) -> bool {
        let id = transport.id().to_string();
        if self.transports.contains_key(&id) {
            warn!(transport = %id, "duplicate inbound transport params ignored");
            return false;
        }
        self.transports.insert(id, transport);
        true
    }

    pub fn get(&self, id: &str) -> Option<&InboundTransport> {
        self.transports.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut InboundTransport> {
        self.transports.get_mut(id)
    }

    /// Transport a new consumer should use
    ///
    /// Prefers an already connected transport so its connect sub-flow is
    /// not repeated.
    pub fn candidate(&self) -> Option<&InboundTransport> {
        let usable = || {
            self.transports
                .values()
                .filter(|t| t.state() != TransportState::Closed)
        };
        usable()
            .find(|t| t.is_connected())
            .or_else(|| usable().next())
    }

    /// Remove and close a transport, returning its closed consumers
    pub fn remove(&mut self, id: &str) -> Vec<Consumer> {
        self.transports
            .remove(id)
            .map(|mut t| t.close())
            .unwrap_or_default()
    }

    /// Close and drop every transport
    pub fn close_all(&mut self) -> Vec<Consumer> {
        std::mem::take(&mut self.transports)
            .into_values()
            .flat_map(|mut t| t.close())
            .collect()
    }

    pub fn consumers(&self) -> impl Iterator<Item = &Consumer> {
        self.transports.values().flat_map(|t| t.consumers())
    }

    pub fn len(&self) -> usize {
        self.transports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }
}
