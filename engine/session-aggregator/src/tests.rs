use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use session_core::{
    Batch, ControllableId, Event, ExchangeId, RawBatch, RawSignal, Signal, Timestamp,
};

use crate::{
    AggregateError, AggregatorConfig, AggregatorState, SessionAggregator, SessionUpdate,
    TradingEntry,
};

fn at(minute: u32) -> Timestamp {
    Utc.with_ymd_and_hms(2024, 3, 4, 14, minute, 0).unwrap()
}

fn batch(minute: u32, signals: &[(Event, &str)]) -> Batch {
    let signals: Vec<Signal> =
        signals.iter().map(|(e, x)| Signal::new(at(minute), *e, *x)).collect();
    Batch::from_signals(signals).unwrap()
}

fn aggregator(exchanges: &[&str], entry: TradingEntry) -> SessionAggregator {
    let mut agg = SessionAggregator::new(
        ControllableId::from("ctl-1"),
        exchanges.iter().map(|x| ExchangeId::from(*x)),
        AggregatorConfig { trading_entry: entry },
    )
    .unwrap();
    agg.start();
    agg
}

fn pairs(update: &SessionUpdate) -> Vec<(Event, &str)> {
    update.signals.iter().map(|(e, x)| (*e, x.as_str())).collect()
}

/// Aggregator on {A, B} driven to TRADING
fn trading_ab() -> SessionAggregator {
    let mut agg = aggregator(&["A", "B"], TradingEntry::AfterBeforeTradingStart);
    agg.aggregate(&batch(0, &[(Event::SessionStart, "A")])).unwrap();
    agg.aggregate(&batch(1, &[(Event::BeforeTradingStart, "A")])).unwrap();
    assert_eq!(agg.state(), AggregatorState::Trading { closed: 0 });
    agg
}

#[test]
fn test_new_aggregator_is_dormant() {
    let mut agg = SessionAggregator::new(
        ControllableId::from("c"),
        [ExchangeId::from("A")],
        AggregatorConfig::default(),
    )
    .unwrap();
    assert_eq!(agg.state(), AggregatorState::Dormant);

    let out = agg.aggregate(&batch(0, &[(Event::SessionStart, "A")])).unwrap();
    assert!(out.is_none());
    assert_eq!(agg.state(), AggregatorState::Dormant);

    agg.start();
    agg.start();
    assert_eq!(agg.state(), AggregatorState::Closed);
}

#[test]
fn test_empty_exchange_set_rejected() {
    let err = SessionAggregator::new(
        ControllableId::from("c"),
        Vec::<ExchangeId>::new(),
        AggregatorConfig::default(),
    )
    .unwrap_err();
    assert_eq!(err, AggregateError::NoExchanges(ControllableId::from("c")));
}

#[test]
fn test_first_matching_start_opens_session() {
    let mut agg = aggregator(&["A", "B"], TradingEntry::AfterBeforeTradingStart);

    let out = agg.aggregate(&batch(0, &[(Event::SessionStart, "A")])).unwrap().unwrap();
    assert_eq!(out.event, Event::SessionStart);
    assert_eq!(out.timestamp, at(0));
    assert_eq!(pairs(&out), vec![(Event::SessionStart, "A")]);
    assert_eq!(agg.state(), AggregatorState::PreMarket);

    let out = agg.aggregate(&batch(0, &[(Event::SessionStart, "B")])).unwrap();
    assert!(out.is_none());
    assert_eq!(agg.state(), AggregatorState::PreMarket);
}

#[test]
fn test_foreign_start_goes_pending() {
    let mut agg = aggregator(&["A"], TradingEntry::AfterBeforeTradingStart);

    assert!(agg.aggregate(&batch(0, &[(Event::SessionStart, "Z")])).unwrap().is_none());
    assert_eq!(agg.state(), AggregatorState::PendingOpen);

    assert!(agg.aggregate(&batch(1, &[(Event::Bar, "Z")])).unwrap().is_none());
    assert_eq!(agg.state(), AggregatorState::PendingOpen);

    let out = agg.aggregate(&batch(2, &[(Event::SessionStart, "A")])).unwrap().unwrap();
    assert_eq!(out.event, Event::SessionStart);
    assert_eq!(agg.state(), AggregatorState::PreMarket);
}

#[test]
fn test_closed_ignores_non_start_batches() {
    let mut agg = aggregator(&["A"], TradingEntry::AfterBeforeTradingStart);
    assert!(agg.aggregate(&batch(0, &[(Event::Bar, "A")])).unwrap().is_none());
    assert!(agg.aggregate(&batch(0, &[(Event::SessionEnd, "A")])).unwrap().is_none());
    assert_eq!(agg.state(), AggregatorState::Closed);
}

#[test]
fn test_closed_requires_start_as_representative() {
    let mut agg = aggregator(&["A"], TradingEntry::AfterBeforeTradingStart);
    let mixed = Batch::new(
        at(0),
        Event::Bar,
        vec![Signal::new(at(0), Event::Bar, "Z"), Signal::new(at(0), Event::SessionStart, "A")],
    )
    .unwrap();
    assert!(agg.aggregate(&mixed).unwrap().is_none());
    assert_eq!(agg.state(), AggregatorState::Closed);
}

#[test]
fn test_before_trading_start_enters_trading_by_default() {
    let mut agg = aggregator(&["A", "B"], TradingEntry::AfterBeforeTradingStart);
    agg.aggregate(&batch(0, &[(Event::SessionStart, "A")])).unwrap();

    let out = agg
        .aggregate(&batch(1, &[(Event::BeforeTradingStart, "A"), (Event::BeforeTradingStart, "Z")]))
        .unwrap()
        .unwrap();
    assert_eq!(out.event, Event::BeforeTradingStart);
    assert_eq!(pairs(&out), vec![(Event::BeforeTradingStart, "A")]);
    assert_eq!(agg.state(), AggregatorState::Trading { closed: 0 });
}

#[test]
fn test_forwards_subscribed_minutes_only() {
    let mut agg = trading_ab();

    let signals =
        [(Event::Bar, "A"), (Event::Bar, "B"), (Event::Bar, "Z"), (Event::MinuteEnd, "A")];
    let out = agg.aggregate(&batch(2, &signals)).unwrap().unwrap();
    assert_eq!(out.event, Event::Bar);
    assert_eq!(pairs(&out), vec![(Event::Bar, "A"), (Event::Bar, "B")]);

    assert!(agg.aggregate(&batch(3, &[(Event::MinuteEnd, "A")])).unwrap().is_none());
    assert!(agg.aggregate(&batch(3, &[(Event::Bar, "Z")])).unwrap().is_none());
}

#[test]
fn test_close_after_every_exchange_ends() {
    let mut agg = trading_ab();

    assert!(agg.aggregate(&batch(10, &[(Event::SessionEnd, "A")])).unwrap().is_none());
    assert_eq!(agg.close_count(), 1);
    assert_eq!(agg.state(), AggregatorState::Trading { closed: 1 });

    let out = agg.aggregate(&batch(11, &[(Event::SessionEnd, "B")])).unwrap().unwrap();
    assert_eq!(out, SessionUpdate::new(at(11), Event::SessionEnd, Vec::new()));
    assert_eq!(agg.state(), AggregatorState::Closed);
    assert_eq!(agg.close_count(), 0);
}

#[test]
fn test_close_stops_processing_rest_of_batch() {
    let mut agg = trading_ab();
    agg.aggregate(&batch(10, &[(Event::SessionEnd, "A")])).unwrap();

    let last = batch(11, &[(Event::TradeEnd, "A"), (Event::SessionEnd, "B"), (Event::Bar, "A")]);
    let out = agg.aggregate(&last).unwrap().unwrap();
    assert_eq!(out.event, Event::SessionEnd);
    assert!(out.signals.is_empty());
    assert_eq!(agg.state(), AggregatorState::Closed);
}

#[test]
fn test_minutes_forwarded_alongside_partial_close() {
    let mut agg = trading_ab();
    let partial = batch(10, &[(Event::TradeEnd, "B"), (Event::SessionEnd, "A")]);
    let out = agg.aggregate(&partial).unwrap().unwrap();
    assert_eq!(out.event, Event::TradeEnd);
    assert_eq!(pairs(&out), vec![(Event::TradeEnd, "B")]);
    assert_eq!(agg.close_count(), 1);
}

#[test]
fn test_foreign_session_end_never_counts() {
    let mut agg = trading_ab();
    assert!(agg.aggregate(&batch(10, &[(Event::SessionEnd, "Z")])).unwrap().is_none());
    assert_eq!(agg.close_count(), 0);
}

#[test]
fn test_next_session_reopens() {
    let mut agg = aggregator(&["A"], TradingEntry::AfterBeforeTradingStart);
    for day in 0..2 {
        let base = day * 10;
        assert!(agg.aggregate(&batch(base, &[(Event::SessionStart, "A")])).unwrap().is_some());
        let marker = batch(base + 1, &[(Event::BeforeTradingStart, "A")]);
        assert!(agg.aggregate(&marker).unwrap().is_some());
        assert!(agg.aggregate(&batch(base + 2, &[(Event::Bar, "A")])).unwrap().is_some());
        let out = agg.aggregate(&batch(base + 3, &[(Event::SessionEnd, "A")])).unwrap().unwrap();
        assert_eq!(out.event, Event::SessionEnd);
        assert_eq!(agg.state(), AggregatorState::Closed);
    }
}

#[test]
fn test_on_first_minute_waits_for_minute() {
    let mut agg = aggregator(&["A"], TradingEntry::OnFirstMinute);
    agg.aggregate(&batch(0, &[(Event::SessionStart, "A")])).unwrap();

    let out = agg.aggregate(&batch(1, &[(Event::BeforeTradingStart, "A")])).unwrap().unwrap();
    assert_eq!(out.event, Event::BeforeTradingStart);
    assert_eq!(agg.state(), AggregatorState::PreMarket);

    let out = agg.aggregate(&batch(2, &[(Event::Bar, "A")])).unwrap().unwrap();
    assert_eq!(out.event, Event::Bar);
    assert_eq!(agg.state(), AggregatorState::Trading { closed: 0 });
}

#[test]
fn test_suppressed_marker_still_trades() {
    let mut agg = aggregator(&["A"], TradingEntry::AfterBeforeTradingStart);
    agg.aggregate(&batch(0, &[(Event::SessionStart, "A")])).unwrap();

    let out = agg.aggregate(&batch(1, &[(Event::Bar, "A")])).unwrap().unwrap();
    assert_eq!(pairs(&out), vec![(Event::Bar, "A")]);

    let out = agg.aggregate(&batch(2, &[(Event::SessionEnd, "A")])).unwrap().unwrap();
    assert_eq!(out.event, Event::SessionEnd);
    assert_eq!(agg.state(), AggregatorState::Closed);
}

#[test]
fn test_never_policy_stays_pre_market() {
    let mut agg = aggregator(&["A"], TradingEntry::Never);
    agg.aggregate(&batch(0, &[(Event::SessionStart, "A")])).unwrap();
    assert!(agg.aggregate(&batch(1, &[(Event::BeforeTradingStart, "A")])).unwrap().is_some());
    assert!(agg.aggregate(&batch(2, &[(Event::Bar, "A")])).unwrap().is_none());
    assert!(agg.aggregate(&batch(3, &[(Event::SessionEnd, "A")])).unwrap().is_none());
    assert_eq!(agg.state(), AggregatorState::PreMarket);
}

#[test]
fn test_unknown_event_faults_aggregator() {
    let mut agg = aggregator(&["A"], TradingEntry::AfterBeforeTradingStart);
    let raw = RawBatch {
        timestamp: at(0),
        event: "LUNCH_BREAK".to_string(),
        signals: vec![RawSignal {
            timestamp: at(0),
            event: "LUNCH_BREAK".to_string(),
            exchange: "A".to_string(),
        }],
    };

    let err = agg.aggregate_raw(raw).unwrap_err();
    assert!(matches!(err, AggregateError::UnknownEvent(_)));
    assert_eq!(agg.state(), AggregatorState::Faulted);

    let err = agg.aggregate(&batch(1, &[(Event::SessionStart, "A")])).unwrap_err();
    assert_eq!(err, AggregateError::Faulted);
}

#[test]
fn test_fault_does_not_touch_other_aggregators() {
    let mut faulty = aggregator(&["A"], TradingEntry::AfterBeforeTradingStart);
    let mut healthy = aggregator(&["A"], TradingEntry::AfterBeforeTradingStart);
    let raw = RawBatch { timestamp: at(0), event: "NOPE".to_string(), signals: Vec::new() };

    assert!(faulty.aggregate_raw(raw).is_err());
    assert!(healthy.aggregate(&batch(0, &[(Event::SessionStart, "A")])).unwrap().is_some());
}

#[test]
fn test_raw_batch_round_trips_into_aggregate() {
    let mut agg = aggregator(&["A"], TradingEntry::AfterBeforeTradingStart);
    let json = RawBatch::from(&batch(0, &[(Event::SessionStart, "A")])).to_json().unwrap();
    let out = agg.aggregate_raw(RawBatch::from_json(&json).unwrap()).unwrap().unwrap();
    assert_eq!(out.event, Event::SessionStart);
}

fn trace_strategy() -> impl Strategy<Value = Vec<Vec<(Event, &'static str)>>> {
    let signal = (
        prop::sample::select(Event::ALL.to_vec()),
        prop::sample::select(vec!["A", "B", "Z"]),
    );
    prop::collection::vec(prop::collection::btree_set(signal, 1..5), 0..60)
        .prop_map(|batches| batches.into_iter().map(|set| set.into_iter().collect()).collect())
}

proptest! {
    #[test]
    fn prop_replay_is_deterministic(trace in trace_strategy()) {
        let mut first = aggregator(&["A", "B"], TradingEntry::AfterBeforeTradingStart);
        let mut second = aggregator(&["A", "B"], TradingEntry::AfterBeforeTradingStart);

        for (minute, signals) in trace.iter().enumerate() {
            let b = batch(minute as u32 % 60, signals);
            prop_assert_eq!(first.aggregate(&b).unwrap(), second.aggregate(&b).unwrap());
            prop_assert_eq!(first.state(), second.state());
        }
    }

    #[test]
    fn prop_foreign_signals_are_invisible(trace in trace_strategy()) {
        let mut plain = aggregator(&["A", "B"], TradingEntry::AfterBeforeTradingStart);
        let mut noisy = aggregator(&["A", "B"], TradingEntry::AfterBeforeTradingStart);

        for (minute, signals) in trace.iter().enumerate() {
            let ours: Vec<_> = signals.iter().copied().filter(|(_, x)| *x != "Z").collect();
            if ours.is_empty() {
                continue;
            }
            let clean = batch(minute as u32 % 60, &ours);

            // same subscribed signals plus foreign noise, with the same representative event
            let mut with_noise: Vec<Signal> = clean.signals().to_vec();
            let noise = signals.iter().filter(|(_, x)| *x == "Z");
            with_noise.extend(noise.map(|(e, x)| Signal::new(clean.timestamp(), *e, *x)));
            let noisy_batch = Batch::new(clean.timestamp(), clean.event(), with_noise).unwrap();

            prop_assert_eq!(
                plain.aggregate(&clean).unwrap(),
                noisy.aggregate(&noisy_batch).unwrap()
            );
            prop_assert_eq!(plain.close_count(), noisy.close_count());
        }
    }

    #[test]
    fn prop_close_counter_stays_bounded(trace in trace_strategy()) {
        let mut agg = aggregator(&["A", "B"], TradingEntry::OnFirstMinute);
        for (minute, signals) in trace.iter().enumerate() {
            agg.aggregate(&batch(minute as u32 % 60, signals)).unwrap();
            prop_assert!(agg.close_count() < 2);
        }
    }
}
