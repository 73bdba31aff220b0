//! Controllable subscription registry

use dashmap::DashMap;
use session_core::{Batch, ControllableId, ExchangeId};
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{BroadcastError, BroadcastResult};

struct Subscriber {
    exchanges: BTreeSet<ExchangeId>,
    sender: mpsc::Sender<Batch>,
}

/// Live consumers of the broadcaster, keyed by controllable
pub struct SubscriptionRegistry {
    subscribers: DashMap<ControllableId, Subscriber>,
    queue_capacity: usize,
}

impl SubscriptionRegistry {
    pub fn new(queue_capacity: usize) -> Arc<Self> {
        Arc::new(Self { subscribers: DashMap::new(), queue_capacity: queue_capacity.max(1) })
    }

    /// Register `id` for the batch stream.
    ///
    /// The exchange set is kept for bookkeeping; every consumer receives every batch.
    pub fn register(
        self: &Arc<Self>,
        id: ControllableId,
        exchanges: BTreeSet<ExchangeId>,
    ) -> BroadcastResult<Subscription> {
        if exchanges.is_empty() {
            return Err(BroadcastError::EmptySubscription(id));
        }

        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        match self.subscribers.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(BroadcastError::AlreadyRegistered(id))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Subscriber { exchanges: exchanges.clone(), sender });
            }
        }

        info!("Registered controllable {} for {} exchange(s)", id, exchanges.len());
        Ok(Subscription { id, exchanges, receiver, registry: Arc::downgrade(self) })
    }

    /// Remove `id`. Returns whether it was registered; repeated calls are harmless.
    pub fn deregister(&self, id: &ControllableId) -> bool {
        let removed = self.subscribers.remove(id).is_some();
        if removed {
            info!("Deregistered controllable {}", id);
        } else {
            debug!("Controllable {} was not registered", id);
        }
        removed
    }

    pub fn is_registered(&self, id: &ControllableId) -> bool {
        self.subscribers.contains_key(id)
    }

    pub fn exchanges_of(&self, id: &ControllableId) -> Option<BTreeSet<ExchangeId>> {
        self.subscribers.get(id).map(|s| s.exchanges.clone())
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Every exchange some consumer subscribed to
    pub fn subscribed_exchanges(&self) -> BTreeSet<ExchangeId> {
        self.subscribers
            .iter()
            .flat_map(|entry| entry.exchanges.iter().cloned().collect::<Vec<_>>())
            .collect()
    }

    /// Snapshot of the current senders, sorted by controllable for stable delivery order
    pub(crate) fn senders(&self) -> Vec<(ControllableId, mpsc::Sender<Batch>)> {
        let mut senders: Vec<_> = self
            .subscribers
            .iter()
            .map(|entry| (entry.key().clone(), entry.sender.clone()))
            .collect();
        senders.sort_by(|a, b| a.0.cmp(&b.0));
        senders
    }
}

/// Receiving end handed to a controllable. Dropping it deregisters the controllable.
pub struct Subscription {
    id: ControllableId,
    exchanges: BTreeSet<ExchangeId>,
    receiver: mpsc::Receiver<Batch>,
    registry: Weak<SubscriptionRegistry>,
}

impl Subscription {
    pub fn id(&self) -> &ControllableId {
        &self.id
    }

    pub fn exchanges(&self) -> &BTreeSet<ExchangeId> {
        &self.exchanges
    }

    /// Next batch; None once the broadcaster is gone or dropped this consumer
    pub async fn recv(&mut self) -> Option<Batch> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Batch> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.deregister(&self.id);
        }
    }
}
