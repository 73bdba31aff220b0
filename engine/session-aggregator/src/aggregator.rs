//! Per-controllable session aggregation

use session_core::{Batch, ControllableId, ExchangeId, RawBatch};
use std::collections::BTreeSet;
use tracing::{debug, error};

use crate::config::AggregatorConfig;
use crate::error::{AggregateError, AggregateResult};
use crate::hooks::SessionUpdate;
use crate::state::{AggregatorState, Scope};

/// Filters batches down to one controllable's exchanges and tracks its session.
///
/// Only the owning controllable's task calls `aggregate`, so no locking is done here.
#[derive(Debug, Clone)]
pub struct SessionAggregator {
    id: ControllableId,
    exchanges: BTreeSet<ExchangeId>,
    config: AggregatorConfig,
    state: AggregatorState,
}

impl SessionAggregator {
    pub fn new(
        id: ControllableId,
        exchanges: impl IntoIterator<Item = ExchangeId>,
        config: AggregatorConfig,
    ) -> AggregateResult<Self> {
        let exchanges: BTreeSet<ExchangeId> = exchanges.into_iter().collect();
        if exchanges.is_empty() {
            return Err(AggregateError::NoExchanges(id));
        }
        Ok(Self { id, exchanges, config, state: AggregatorState::Dormant })
    }

    pub fn id(&self) -> &ControllableId {
        &self.id
    }

    pub fn exchanges(&self) -> &BTreeSet<ExchangeId> {
        &self.exchanges
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn state(&self) -> AggregatorState {
        self.state
    }

    /// Subscribed exchanges that have closed in the current session
    pub fn close_count(&self) -> usize {
        match self.state {
            AggregatorState::Trading { closed } => closed,
            _ => 0,
        }
    }

    /// Leave DORMANT. Has no effect once started.
    pub fn start(&mut self) {
        if self.state == AggregatorState::Dormant {
            debug!("Aggregator for {} started", self.id);
            self.state = AggregatorState::Closed;
        }
    }

    /// Process one batch, returning the update to hand to the strategy, if any.
    pub fn aggregate(&mut self, batch: &Batch) -> AggregateResult<Option<SessionUpdate>> {
        if self.state == AggregatorState::Faulted {
            return Err(AggregateError::Faulted);
        }

        let scope = Scope { exchanges: &self.exchanges, entry: self.config.trading_entry };
        let previous = self.state;
        let (next, update) = previous.on_batch(&scope, batch);
        if next != previous {
            debug!("Controllable {}: {} -> {} at {}", self.id, previous, next, batch.timestamp());
        }
        self.state = next;
        Ok(update)
    }

    /// Decode a wire batch and process it.
    ///
    /// A batch that fails to decode faults this aggregator for good.
    pub fn aggregate_raw(&mut self, raw: RawBatch) -> AggregateResult<Option<SessionUpdate>> {
        if self.state == AggregatorState::Faulted {
            return Err(AggregateError::Faulted);
        }

        match Batch::try_from(raw) {
            Ok(batch) => self.aggregate(&batch),
            Err(err) => {
                error!("Controllable {} rejected batch: {}", self.id, err);
                self.state = AggregatorState::Faulted;
                Err(err.into())
            }
        }
    }
}
