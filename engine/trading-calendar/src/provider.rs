use session_core::ExchangeId;
use std::collections::HashMap;
use std::sync::Arc;

use crate::builtin;
use crate::calendar::TradingCalendar;
use crate::error::{CalendarError, CalendarResult};
use crate::spec::CalendarSpec;

/// Source of trading calendars by exchange
pub trait CalendarProvider: Send + Sync {
    fn calendar(&self, exchange: &ExchangeId) -> CalendarResult<Arc<TradingCalendar>>;

    fn exchanges(&self) -> Vec<ExchangeId>;
}

/// Fixed set of calendars loaded at startup
#[derive(Debug, Clone, Default)]
pub struct StaticCalendarProvider {
    calendars: HashMap<ExchangeId, Arc<TradingCalendar>>,
}

impl StaticCalendarProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider preloaded with `NYSE` and `24/7`
    pub fn with_builtins() -> CalendarResult<Self> {
        let mut provider = Self::new();
        provider.insert(builtin::nyse()?);
        provider.insert(builtin::always_open()?);
        Ok(provider)
    }

    /// Add or replace the calendar for its exchange
    pub fn insert(&mut self, calendar: TradingCalendar) {
        self.calendars.insert(calendar.exchange().clone(), Arc::new(calendar));
    }

    pub fn load(&mut self, spec: &CalendarSpec) -> CalendarResult<()> {
        self.insert(spec.build()?);
        Ok(())
    }
}

impl CalendarProvider for StaticCalendarProvider {
    fn calendar(&self, exchange: &ExchangeId) -> CalendarResult<Arc<TradingCalendar>> {
        self.calendars
            .get(exchange)
            .cloned()
            .ok_or_else(|| CalendarError::UnknownExchange(exchange.clone()))
    }

    fn exchanges(&self) -> Vec<ExchangeId> {
        let mut exchanges: Vec<_> = self.calendars.keys().cloned().collect();
        exchanges.sort();
        exchanges
    }
}
