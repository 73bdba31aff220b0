//! Controllable runner: one subscription, one aggregator, one strategy

use session_core::{ControllableId, Event, ExchangeId};
use signal_broadcaster::{Subscription, SubscriptionRegistry};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::aggregator::SessionAggregator;
use crate::config::AggregatorConfig;
use crate::error::AggregateResult;
use crate::hooks::{dispatch, StrategyHooks};
use crate::state::AggregatorState;

/// Why a controllable stopped consuming
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllableExit {
    Cancelled,
    /// The broadcaster finished or dropped this consumer
    Disconnected,
}

#[derive(Debug)]
pub struct ControllableSummary<H> {
    pub hooks: H,
    pub batches: u64,
    pub updates: u64,
    pub sessions_closed: u64,
    pub final_state: AggregatorState,
    pub exit: ControllableExit,
}

pub struct Controllable<H> {
    aggregator: SessionAggregator,
    hooks: H,
}

impl<H: StrategyHooks> Controllable<H> {
    pub fn new(
        id: ControllableId,
        exchanges: impl IntoIterator<Item = ExchangeId>,
        config: AggregatorConfig,
        hooks: H,
    ) -> AggregateResult<Self> {
        Ok(Self { aggregator: SessionAggregator::new(id, exchanges, config)?, hooks })
    }

    pub fn id(&self) -> &ControllableId {
        self.aggregator.id()
    }

    pub fn exchanges(&self) -> &BTreeSet<ExchangeId> {
        self.aggregator.exchanges()
    }

    pub fn aggregator(&self) -> &SessionAggregator {
        &self.aggregator
    }

    /// Register this controllable's exchange set with the broadcaster
    pub fn subscribe(&self, registry: &Arc<SubscriptionRegistry>) -> AggregateResult<Subscription> {
        Ok(registry.register(self.id().clone(), self.exchanges().clone())?)
    }

    /// Consume batches until cancelled or disconnected.
    ///
    /// The subscription is released on every exit path, which deregisters it from the
    /// broadcaster without touching other consumers.
    pub async fn run(
        mut self,
        mut subscription: Subscription,
        cancel: CancellationToken,
    ) -> AggregateResult<ControllableSummary<H>> {
        info!("Controllable {} running on {:?}", self.id(), self.exchanges());
        self.aggregator.start();

        let mut batches = 0u64;
        let mut updates = 0u64;
        let mut sessions_closed = 0u64;

        let exit = loop {
            let batch = tokio::select! {
                biased;
                _ = cancel.cancelled() => break ControllableExit::Cancelled,
                batch = subscription.recv() => batch,
            };

            let Some(batch) = batch else {
                warn!("Controllable {} lost its delivery queue", self.id());
                break ControllableExit::Disconnected;
            };
            batches += 1;

            let update = match self.aggregator.aggregate(&batch) {
                Ok(update) => update,
                Err(err) => {
                    error!("Controllable {} stopped: {}", self.id(), err);
                    drop(subscription);
                    return Err(err);
                }
            };

            if let Some(update) = update {
                updates += 1;
                if update.event == Event::SessionEnd && update.signals.is_empty() {
                    sessions_closed += 1;
                }
                dispatch(&mut self.hooks, &update).await;
            }
        };

        drop(subscription);
        info!(
            "Controllable {} exited ({:?}) after {} batches, {} updates, {} sessions",
            self.id(),
            exit,
            batches,
            updates,
            sessions_closed
        );

        Ok(ControllableSummary {
            final_state: self.aggregator.state(),
            hooks: self.hooks,
            batches,
            updates,
            sessions_closed,
            exit,
        })
    }
}
