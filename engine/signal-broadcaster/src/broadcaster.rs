//! The live broadcaster: paced producers in, bounded consumer queues out

use futures::future::join_all;
use futures::stream::{self, select_all, StreamExt};
use session_core::{Batch, ExchangeId, Signal, TimeSource, Timestamp};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coalesce::Coalescer;
use crate::config::BroadcasterConfig;
use crate::error::BroadcastError;
use crate::metrics::BroadcasterMetrics;
use crate::registry::SubscriptionRegistry;

/// Summary returned when the broadcaster stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub signals_received: u64,
    pub batches_delivered: u64,
    pub faults: Vec<BroadcastError>,
    pub cancelled: bool,
}

enum Input {
    Signal(usize, Signal),
    Closed(usize),
}

/// Earliest instant an unseen signal could still carry
enum Horizon {
    /// Some open producer has not sent anything yet
    Blocked,
    At(Timestamp),
    /// Every producer has closed
    Unbounded,
}

/// Collects producers before the broadcaster starts
pub struct BroadcasterBuilder {
    config: BroadcasterConfig,
    clock: Arc<dyn TimeSource>,
    registry: Arc<SubscriptionRegistry>,
    producers: Vec<(ExchangeId, mpsc::Receiver<Signal>)>,
}

impl BroadcasterBuilder {
    pub fn new(config: BroadcasterConfig, clock: Arc<dyn TimeSource>) -> Self {
        let registry = SubscriptionRegistry::new(config.queue_capacity);
        Self { config, clock, registry, producers: Vec::new() }
    }

    pub fn registry(&self) -> Arc<SubscriptionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Input channel for one exchange's paced signals
    pub fn add_producer(&mut self, exchange: impl Into<ExchangeId>) -> mpsc::Sender<Signal> {
        let (tx, rx) = mpsc::channel(self.config.producer_capacity.max(1));
        self.producers.push((exchange.into(), rx));
        tx
    }

    pub fn build(self) -> SignalBroadcaster {
        SignalBroadcaster {
            config: self.config,
            clock: self.clock,
            registry: self.registry,
            producers: self.producers,
            metrics: Arc::new(BroadcasterMetrics::new()),
        }
    }
}

pub struct SignalBroadcaster {
    config: BroadcasterConfig,
    clock: Arc<dyn TimeSource>,
    registry: Arc<SubscriptionRegistry>,
    producers: Vec<(ExchangeId, mpsc::Receiver<Signal>)>,
    metrics: Arc<BroadcasterMetrics>,
}

impl SignalBroadcaster {
    pub fn registry(&self) -> Arc<SubscriptionRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn metrics(&self) -> Arc<BroadcasterMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Merge and deliver until every producer closes or `cancel` fires
    pub async fn run(mut self, cancel: CancellationToken) -> BroadcastReport {
        let producers = std::mem::take(&mut self.producers);
        let exchanges: Vec<ExchangeId> =
            producers.iter().map(|(exchange, _)| exchange.clone()).collect();
        info!("Broadcaster started with {} producer(s)", exchanges.len());

        let mut watermarks: Vec<Option<Timestamp>> = vec![None; producers.len()];
        let mut open = vec![true; producers.len()];
        let mut inputs = select_all(producers.into_iter().enumerate().map(|(idx, (_, rx))| {
            stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|signal| (signal, rx)) })
                .map(move |signal| Input::Signal(idx, signal))
                .chain(stream::once(async move { Input::Closed(idx) }))
                .boxed()
        }));

        let mut coalescer = Coalescer::new(self.config.coalesce_window());
        let mut report = BroadcastReport::default();

        loop {
            let straggler_deadline = self.straggler_deadline(&coalescer);
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Broadcaster cancelled with {} signal(s) held", coalescer.pending());
                    report.cancelled = true;
                    break;
                }
                input = inputs.next() => match input {
                    Some(Input::Signal(idx, signal)) => {
                        self.metrics.record_signal();
                        report.signals_received += 1;
                        let mark = watermarks[idx].get_or_insert(signal.timestamp);
                        if signal.timestamp < *mark {
                            warn!(
                                "{} sent {} at {} behind its watermark {}",
                                exchanges[idx], signal.event, signal.timestamp, mark
                            );
                        } else {
                            *mark = signal.timestamp;
                        }
                        coalescer.push_received(signal, Instant::now());
                    }
                    Some(Input::Closed(idx)) => {
                        debug!("Producer {} closed", exchanges[idx]);
                        open[idx] = false;
                    }
                    None => {
                        for batch in coalescer.flush() {
                            self.deliver(batch, &mut report).await;
                        }
                        break;
                    }
                },
                _ = tokio::time::sleep_until(straggler_deadline.unwrap_or_else(Instant::now)),
                    if straggler_deadline.is_some() => {}
            }

            let horizon = Self::horizon(&watermarks, &open);
            let window = self.config.coalesce_window();
            // Held past the straggler timeout since arrival: release through its timestamp
            let overdue = self
                .config
                .straggler_timeout()
                .and_then(|timeout| Instant::now().checked_sub(timeout))
                .and_then(|cutoff| coalescer.received_through(cutoff));
            let released = coalescer.release(|s| {
                let by_watermark = match horizon {
                    Horizon::Blocked => false,
                    Horizon::At(h) => s.timestamp + window < h,
                    Horizon::Unbounded => true,
                };
                by_watermark || overdue.map_or(false, |through| s.timestamp <= through + window)
            });
            for batch in released {
                self.deliver(batch, &mut report).await;
            }
        }

        self.metrics.set_late_batches(coalescer.clamped());
        info!(
            "Broadcaster stopped: {} signal(s) in, {} batch(es) out, {} fault(s)",
            report.signals_received,
            report.batches_delivered,
            report.faults.len()
        );
        report
    }

    fn horizon(watermarks: &[Option<Timestamp>], open: &[bool]) -> Horizon {
        let mut horizon = Horizon::Unbounded;
        for (mark, _) in watermarks.iter().zip(open).filter(|(_, open)| **open) {
            match mark {
                None => return Horizon::Blocked,
                Some(mark) => {
                    horizon = match horizon {
                        Horizon::At(h) if h <= *mark => Horizon::At(h),
                        _ => Horizon::At(*mark),
                    };
                }
            }
        }
        horizon
    }

    /// When the longest-held signal passes the straggler timeout
    fn straggler_deadline(&self, coalescer: &Coalescer) -> Option<Instant> {
        let timeout = self.config.straggler_timeout()?;
        Some(coalescer.earliest_received()? + timeout)
    }

    /// Send one batch to every consumer concurrently
    async fn deliver(&self, batch: Batch, report: &mut BroadcastReport) {
        let consumers = self.registry.senders();
        let timeout = self.config.backpressure_timeout();
        debug!(
            "Delivering {} batch at {} to {} consumer(s)",
            batch.event(),
            batch.timestamp(),
            consumers.len()
        );
        self.metrics.record_delivery_lag(self.clock.now() - batch.timestamp());

        let sends = consumers.into_iter().map(|(id, sender)| {
            let batch = batch.clone();
            async move {
                let outcome = tokio::time::timeout(timeout, sender.send(batch)).await;
                (id, outcome)
            }
        });
        let outcomes = join_all(sends).await;
        let delivered_to = outcomes.len();

        for (id, outcome) in outcomes {
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    debug!("Consumer {} went away", id);
                    self.registry.deregister(&id);
                }
                Err(_) => {
                    self.metrics.record_backpressure();
                    let fault = BroadcastError::BackpressureTimeout {
                        controllable: id.clone(),
                        waited: timeout,
                    };
                    warn!("{}", fault);
                    // Dropped so its queue closes instead of silently missing this batch
                    if self.registry.deregister(&id) {
                        self.metrics.record_dropped_consumer();
                    }
                    report.faults.push(fault);
                }
            }
        }

        self.metrics.record_batch(delivered_to);
        report.batches_delivered += 1;
    }
}
