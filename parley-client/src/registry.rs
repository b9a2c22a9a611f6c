//! Producer/consumer registry
//!
//! Lookups by identifier for the local publication and every active
//! consumer. The registry never owns media objects: producers live on the
//! outbound transport and consumers on their inbound transport. Every
//! mutation reports presence in the same call, so the registry and the
//! presence store never disagree between two lookups.

use std::collections::BTreeMap;

use tracing::debug;

use crate::presence::PresenceStore;

/// Where an active consumer lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub transport_id: String,
    pub consumer_id: String,
    pub participant_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LocalPublication {
    producer_id: String,
    participant_id: String,
}

/// Index of the session's producer and consumers
#[derive(Debug, Default)]
pub struct Registry {
    local: Option<LocalPublication>,
    /// Keyed by remote producer id
    consumers: BTreeMap<String, RegistryEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the activated local producer and mark its participant online
    pub fn register_producer(
        &mut self,
        producer_id: &str,
        participant_id: &str,
        presence: &dyn PresenceStore,
    ) {
        self.local = Some(LocalPublication {
            producer_id: producer_id.to_string(),
            participant_id: participant_id.to_string(),
        });
        presence.set_participant_status(participant_id, true, true);
        debug!(producer = %producer_id, "local producer registered");
    }

    pub fn local_producer(&self) -> Option<&str> {
        self.local.as_ref().map(|l| l.producer_id.as_str())
    }

    /// Record a new consumer and mark its participant online
    pub fn insert_consumer(
        &mut self,
        producer_id: &str,
        entry: RegistryEntry,
        presence: &dyn PresenceStore,
    ) {
        presence.set_participant_status(&entry.participant_id, true, true);
        debug!(producer = %producer_id, consumer = %entry.consumer_id, "consumer registered");
        self.consumers.insert(producer_id.to_string(), entry);
    }

    /// Forget a consumer
    ///
    /// Its participant is marked offline only once none of their other
    /// publications is still consumed.
    pub fn remove_consumer(
        &mut self,
        producer_id: &str,
        presence: &dyn PresenceStore,
    ) -> Option<RegistryEntry> {
        let entry = self.consumers.remove(producer_id)?;
        if self.has_participant(&entry.participant_id) {
            debug!(
                producer = %producer_id,
                participant = %entry.participant_id,
                "consumer unregistered, participant still heard"
            );
        } else {
            presence.set_participant_status(&entry.participant_id, false, false);
            debug!(producer = %producer_id, "consumer unregistered");
        }
        Some(entry)
    }

    /// Whether any remaining consumer belongs to `participant_id`
    fn has_participant(&self, participant_id: &str) -> bool {
        self.consumers
            .values()
            .any(|entry| entry.participant_id == participant_id)
    }

    pub fn entry(&self, producer_id: &str) -> Option<&RegistryEntry> {
        self.consumers.get(producer_id)
    }

    pub fn contains(&self, producer_id: &str) -> bool {
        self.consumers.contains_key(producer_id)
    }

    /// Producer ids of every active consumer, sorted
    pub fn consumer_producer_ids(&self) -> Vec<String> {
        self.consumers.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.local.is_none() && self.consumers.is_empty()
    }

    /// Forget everything, marking every known participant offline
    pub fn clear(&mut self, presence: &dyn PresenceStore) {
        for entry in std::mem::take(&mut self.consumers).into_values() {
            presence.set_participant_status(&entry.participant_id, false, false);
        }
        if let Some(local) = self.local.take() {
            presence.set_participant_status(&local.participant_id, false, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::PresenceMap;

    fn entry(participant: &str) -> RegistryEntry {
        RegistryEntry {
            transport_id: "recv-1".to_string(),
            consumer_id: format!("cons-{participant}"),
            participant_id: participant.to_string(),
        }
    }

    #[test]
    fn test_insert_and_remove_update_presence() {
        let presence = PresenceMap::new();
        let mut registry = Registry::new();

        registry.insert_consumer("prod-7", entry("bob"), &presence);
        assert!(registry.contains("prod-7"));
        assert!(presence.status("bob").unwrap().online);

        let removed = registry.remove_consumer("prod-7", &presence).unwrap();
        assert_eq!(removed.participant_id, "bob");
        assert!(!registry.contains("prod-7"));
        assert!(!presence.status("bob").unwrap().online);

        assert!(registry.remove_consumer("prod-7", &presence).is_none());
    }

    #[test]
    fn test_clear_marks_everyone_offline() {
        let presence = PresenceMap::new();
        let mut registry = Registry::new();
        registry.register_producer("prod-42", "alice", &presence);
        registry.insert_consumer("prod-7", entry("bob"), &presence);
        registry.insert_consumer("prod-8", entry("carol"), &presence);
        assert_eq!(registry.local_producer(), Some("prod-42"));
        assert_eq!(registry.consumer_producer_ids(), vec!["prod-7", "prod-8"]);

        registry.clear(&presence);
        assert!(registry.is_empty());
        assert!(presence.online().is_empty());
    }

    #[test]
    fn test_participant_with_two_publications_stays_online() {
        let presence = PresenceMap::new();
        let mut registry = Registry::new();
        registry.insert_consumer("prod-7", entry("bob"), &presence);
        registry.insert_consumer("prod-9", entry("bob"), &presence);

        registry.remove_consumer("prod-7", &presence).unwrap();
        assert!(presence.status("bob").unwrap().online);

        registry.remove_consumer("prod-9", &presence).unwrap();
        assert!(!presence.status("bob").unwrap().online);
    }
}
