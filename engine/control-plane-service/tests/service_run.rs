//! End-to-end run of the service wiring against an in-process authority

use chrono::{NaiveDate, TimeZone, Utc};
use clock_sync::{ClockAuthority, TimeAuthority};
use control_plane_service::config::{validate_config, ControllableConfig};
use control_plane_service::{ServiceConfig, ServiceHealth, ServiceState};
use session_aggregator::{ControllableExit, TradingEntry};
use session_core::{ManualClock, TimeSource};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use trading_calendar::{CalendarSpec, PacerExit};

fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.calendars.push(
        CalendarSpec::from_toml_str(
            r#"
exchange = "XTST"
timezone = "UTC"
open = "14:00:00"
close = "14:05:00"
"#,
        )
        .unwrap(),
    );
    config.controllables = vec![ControllableConfig {
        id: "tester".to_string(),
        exchanges: vec!["XTST".to_string()],
        trading_entry: TradingEntry::AfterBeforeTradingStart,
    }];
    config.schedule.start_date = NaiveDate::from_ymd_opt(2024, 3, 4);
    config.schedule.days = 1;
    config.sync.resync_interval_secs = 0;
    config.pacer.skip_completed_sessions = false;
    config.broadcaster.straggler_timeout_ms = None;
    validate_config(&config).unwrap();
    config
}

/// Local clock and authority both parked after the test session closed
async fn state_with(config: ServiceConfig) -> anyhow::Result<ServiceState> {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 4, 15, 0, 0).unwrap());
    let local: Arc<dyn TimeSource> = Arc::new(clock.clone());
    let authority: Arc<dyn ClockAuthority> = Arc::new(TimeAuthority::new(Arc::new(clock)));
    ServiceState::with_authority(config, authority, local, CancellationToken::new()).await
}

#[tokio::test]
async fn test_run_drives_controllable_through_session() {
    let state = tokio_test::assert_ok!(state_with(test_config()).await);
    assert_eq!(state.health_check(), ServiceHealth::Healthy);
    assert_eq!(
        state.schedule(),
        (NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(), NaiveDate::from_ymd_opt(2024, 3, 4).unwrap())
    );

    let report = state.run().await.unwrap();

    assert!(report.broadcast.faults.is_empty());
    assert!(!report.broadcast.cancelled);
    assert_eq!(report.pacers.len(), 1);
    assert_eq!(report.pacers[0].1.exit, PacerExit::Completed);

    assert_eq!(report.controllables.len(), 1);
    let tester = &report.controllables[0];
    assert_eq!(tester.id, "tester");
    assert_eq!(tester.error, None);
    assert_eq!(tester.exit, Some(ControllableExit::Disconnected));
    assert_eq!(tester.sessions_closed, 1);
    // start, pre-market, at least one bar, end
    assert!(tester.updates >= 4);

    assert_eq!(state.health_check(), ServiceHealth::ShuttingDown);
}

#[tokio::test]
async fn test_cancelled_run_stops_early() {
    let mut config = test_config();
    // Session far in the future of the parked clock
    config.schedule.start_date = NaiveDate::from_ymd_opt(2024, 3, 11);
    let state = state_with(config).await.unwrap();
    state.shutdown.cancel();

    let report = state.run().await.unwrap();
    assert_eq!(report.controllables[0].sessions_closed, 0);
    assert!(report.pacers.iter().all(|(_, pacer)| pacer.exit != PacerExit::Completed));
}

#[tokio::test]
async fn test_unknown_exchange_is_rejected() {
    let mut config = test_config();
    config.controllables[0].exchanges.push("NOWHERE".to_string());
    assert!(state_with(config).await.is_err());
}

#[tokio::test]
async fn test_unreachable_authority_fails_startup() {
    let mut config = test_config();
    config.authority.url = Some("ws://127.0.0.1:1".to_string());
    config.sync.max_attempts = 2;
    config.sync.retry_backoff_ms = 10;
    config.sync.call_timeout_ms = 500;

    let result = ServiceState::new(config, CancellationToken::new()).await;
    assert!(result.is_err());
}
