//! Service state management and component wiring

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ServiceConfig;
use crate::signals::join_with_timeout;
use clock_sync::{ClockAuthority, ClockEstimate, ClockSynchronizer, TimeAuthority, WsAuthority};
use session_aggregator::{
    AggregatorConfig, Controllable, ControllableExit, SessionUpdate, StrategyHooks,
};
use session_core::{ExchangeId, SystemClock, TimeSource};
use signal_broadcaster::{BroadcastReport, BroadcasterBuilder};
use trading_calendar::{CalendarProvider, EventPacer, PacerReport, StaticCalendarProvider};

pub type Synchronizer = ClockSynchronizer<Arc<dyn ClockAuthority>>;

/// Synchronized clock plus reference data, ready to run sessions
pub struct ServiceState {
    /// Service configuration
    pub config: ServiceConfig,

    /// Clock synchronizer, already holding a first estimate
    pub synchronizer: Arc<Synchronizer>,

    /// Adjusted clock every component paces against
    pub clock: Arc<dyn TimeSource>,

    /// Calendars for every configured exchange
    pub provider: Arc<StaticCalendarProvider>,

    /// Fires on shutdown
    pub shutdown: CancellationToken,
}

/// What one `run` did
#[derive(Debug, Default)]
pub struct RunReport {
    pub pacers: Vec<(ExchangeId, PacerReport)>,
    pub broadcast: BroadcastReport,
    pub controllables: Vec<ControllableReport>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllableReport {
    pub id: String,
    pub updates: u64,
    pub sessions_closed: u64,
    pub exit: Option<ControllableExit>,
    pub error: Option<String>,
}

/// Service health status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceHealth {
    Healthy,
    Unsynchronized,
    ShuttingDown,
}

impl ServiceHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ServiceHealth::Healthy)
    }
}

impl ServiceState {
    /// Connect to the configured authority and take a first clock estimate
    pub async fn new(config: ServiceConfig, shutdown: CancellationToken) -> Result<Self> {
        let local: Arc<dyn TimeSource> = Arc::new(SystemClock);
        let authority: Arc<dyn ClockAuthority> = match &config.authority.url {
            Some(url) => {
                info!("Using clock authority at {}", url);
                Arc::new(WsAuthority::new(url.clone()))
            }
            None => {
                warn!("No clock authority configured, the local clock is authoritative");
                Arc::new(TimeAuthority::new(Arc::clone(&local)))
            }
        };
        Self::with_authority(config, authority, local, shutdown).await
    }

    pub async fn with_authority(
        config: ServiceConfig,
        authority: Arc<dyn ClockAuthority>,
        local: Arc<dyn TimeSource>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        info!("Initializing service components...");

        let synchronizer = Arc::new(ClockSynchronizer::new(authority, local, config.sync.clone()));
        synchronize_with_retries(&synchronizer).await?;
        let clock: Arc<dyn TimeSource> = Arc::new(synchronizer.time_source()?);

        let provider = Arc::new(build_provider(&config)?);
        info!("Loaded calendars for {:?}", provider.exchanges());

        Ok(Self { config, synchronizer, clock, provider, shutdown })
    }

    /// Every exchange some controllable subscribes to
    pub fn exchanges(&self) -> BTreeSet<ExchangeId> {
        self.config
            .controllables
            .iter()
            .flat_map(|c| c.exchanges.iter().map(|x| ExchangeId::from(x.as_str())))
            .collect()
    }

    /// Inclusive date range to generate
    pub fn schedule(&self) -> (NaiveDate, NaiveDate) {
        let start = self
            .config
            .schedule
            .start_date
            .unwrap_or_else(|| self.clock.now().date_naive() - Duration::days(1));
        let end = start + Duration::days(i64::from(self.config.schedule.days.max(1)) - 1);
        (start, end)
    }

    pub fn health_check(&self) -> ServiceHealth {
        if self.shutdown.is_cancelled() {
            ServiceHealth::ShuttingDown
        } else if self.synchronizer.estimate().is_none() {
            ServiceHealth::Unsynchronized
        } else {
            ServiceHealth::Healthy
        }
    }

    /// Periodically refresh the clock estimate until shutdown
    pub fn spawn_resync(&self) -> Option<JoinHandle<()>> {
        let interval = self.config.sync.resync_interval()?;
        let synchronizer = Arc::clone(&self.synchronizer);
        let shutdown = self.shutdown.clone();

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = synchronizer.synchronize().await {
                            metrics::increment_counter!("control_plane_resync_failures_total");
                            warn!("Periodic resynchronization failed: {}", e);
                        }
                    }
                }
            }
            debug!("Resync task stopped");
        }))
    }

    /// Run every configured controllable over the scheduled sessions.
    ///
    /// Returns once every session has been delivered, or after shutdown.
    pub async fn run(&self) -> Result<RunReport> {
        let (start, end) = self.schedule();
        info!("Running sessions from {} to {}", start, end);

        let limit = self.config.service.shutdown_timeout();
        let mut builder =
            BroadcasterBuilder::new(self.config.broadcaster.clone(), Arc::clone(&self.clock));
        let registry = builder.registry();

        // Subscribe before any producer starts so no batch is missed
        let mut controllable_tasks = Vec::with_capacity(self.config.controllables.len());
        for entry in &self.config.controllables {
            let controllable = Controllable::new(
                entry.id.as_str().into(),
                entry.exchanges.iter().map(|x| ExchangeId::from(x.as_str())),
                AggregatorConfig { trading_entry: entry.trading_entry },
                LoggingHooks::new(&entry.id),
            )?;
            let subscription = controllable.subscribe(&registry)?;
            let task = tokio::spawn(controllable.run(subscription, self.shutdown.child_token()));
            controllable_tasks.push((entry.id.clone(), task));
        }
        drop(registry);
        metrics::gauge!("control_plane_controllables", controllable_tasks.len() as f64);

        let mut pacer_tasks = Vec::new();
        for exchange in self.exchanges() {
            let calendar = self.provider.calendar(&exchange)?;
            let events = self
                .config
                .generator
                .generate(&calendar, start, end)
                .with_context(|| format!("Failed to generate sessions for {}", exchange))?;
            let output = builder.add_producer(exchange.clone());
            let pacer =
                EventPacer::new(events, Arc::clone(&self.clock), output, self.config.pacer.clone());
            pacer_tasks.push((exchange, tokio::spawn(pacer.run(self.shutdown.child_token()))));
        }

        let mut broadcast_task = tokio::spawn(builder.build().run(self.shutdown.child_token()));
        let resync_task = self.spawn_resync();

        let broadcast = tokio::select! {
            joined = &mut broadcast_task => joined.context("Broadcaster task failed")?,
            _ = self.shutdown.cancelled() => {
                info!("Shutdown requested, stopping components...");
                join_with_timeout("Broadcaster", &mut broadcast_task, limit)
                    .await
                    .unwrap_or_default()
            }
        };
        // Pacers are done once the broadcaster is, and controllables drain their queues
        let mut report = RunReport { broadcast, ..RunReport::default() };

        for (exchange, mut task) in pacer_tasks {
            match join_with_timeout(&format!("Pacer {}", exchange), &mut task, limit).await {
                Some(pacer) => report.pacers.push((exchange, pacer)),
                None => task.abort(),
            }
        }

        for (id, mut task) in controllable_tasks {
            let joined = join_with_timeout(&format!("Controllable {}", id), &mut task, limit).await;
            let entry = match joined {
                Some(Ok(summary)) => ControllableReport {
                    id,
                    updates: summary.updates,
                    sessions_closed: summary.sessions_closed,
                    exit: Some(summary.exit),
                    error: None,
                },
                Some(Err(e)) => {
                    error!("Controllable {} failed: {}", id, e);
                    ControllableReport {
                        id,
                        updates: 0,
                        sessions_closed: 0,
                        exit: None,
                        error: Some(e.to_string()),
                    }
                }
                None => {
                    task.abort();
                    ControllableReport {
                        id,
                        updates: 0,
                        sessions_closed: 0,
                        exit: None,
                        error: Some("did not stop in time".to_string()),
                    }
                }
            };
            report.controllables.push(entry);
        }

        self.shutdown.cancel();
        if let Some(mut task) = resync_task {
            if join_with_timeout("Resync", &mut task, limit).await.is_none() {
                task.abort();
            }
        }

        info!(
            "Run finished: {} signals, {} batches, {} faults",
            report.broadcast.signals_received,
            report.broadcast.batches_delivered,
            report.broadcast.faults.len()
        );
        Ok(report)
    }
}

/// First estimate, retried as configured. Never falls back to a zero correction.
pub async fn synchronize_with_retries<A: ClockAuthority>(
    synchronizer: &ClockSynchronizer<A>,
) -> Result<ClockEstimate> {
    let attempts = synchronizer.config().max_attempts.max(1);
    let backoff = synchronizer.config().retry_backoff();

    for attempt in 1..=attempts {
        match synchronizer.synchronize().await {
            Ok(estimate) => return Ok(estimate),
            Err(e) if attempt < attempts => {
                warn!("Clock sync attempt {}/{} failed: {}", attempt, attempts, e);
                tokio::time::sleep(backoff * attempt).await;
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Clock sync failed after {} attempts", attempts));
            }
        }
    }
    Err(anyhow!("Clock sync was not attempted"))
}

/// Built-in calendars plus configured ones, checked against the subscriptions
pub fn build_provider(config: &ServiceConfig) -> Result<StaticCalendarProvider> {
    let mut provider =
        StaticCalendarProvider::with_builtins().context("Failed to build built-in calendars")?;
    for spec in &config.calendars {
        provider.load(spec).with_context(|| format!("Invalid calendar for {}", spec.exchange))?;
    }

    for entry in &config.controllables {
        for exchange in &entry.exchanges {
            provider
                .calendar(&ExchangeId::from(exchange.as_str()))
                .with_context(|| format!("Controllable {} subscribes to {}", entry.id, exchange))?;
        }
    }
    Ok(provider)
}

/// Strategy hooks that only log what a controllable sees
#[derive(Debug, Default)]
pub struct LoggingHooks {
    id: String,
    bars: u64,
}

impl LoggingHooks {
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string(), bars: 0 }
    }

    pub fn bars(&self) -> u64 {
        self.bars
    }
}

#[async_trait]
impl StrategyHooks for LoggingHooks {
    async fn on_session_start(&mut self, update: &SessionUpdate) {
        info!(
            "[{}] session start at {} ({} exchange(s))",
            self.id,
            update.timestamp,
            update.signals.len()
        );
    }

    async fn on_before_trading_start(&mut self, update: &SessionUpdate) {
        info!("[{}] before trading start at {}", self.id, update.timestamp);
    }

    async fn on_bar(&mut self, update: &SessionUpdate) {
        self.bars += 1;
        debug!("[{}] bar at {} {:?}", self.id, update.timestamp, update.signals);
    }

    async fn on_session_end(&mut self, update: &SessionUpdate) {
        info!("[{}] session end at {} after {} bars", self.id, update.timestamp, self.bars);
        self.bars = 0;
    }
}
