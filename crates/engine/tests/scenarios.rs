//! End-to-end coverage of the decision loop: a synthetic tick stream drives
//! a real `Coordinator` wired to `PaperBroker` and a tempfile-backed
//! `FileJournal`, and assertions read back the journal the way an operator
//! replaying a warm restart would.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, TimeZone};
use chrono_tz::Asia::Kolkata;
use swingshort_broker::{Broker, PaperBroker};
use swingshort_common::config::EngineConfig;
use swingshort_common::{OptionType, Symbol, Tick, TickSource, Underlying};
use swingshort_engine::{Coordinator, LoopEvent, TimerKind};
use swingshort_journal::{FileJournal, NullNotifier, SharedJournal};
use swingshort_risk::HaltReason;
use tokio::sync::mpsc;
use tokio::time::sleep;

fn ist(h: u32, m: u32, s: u32) -> i64 {
    Kolkata.with_ymd_and_hms(2026, 2, 6, h, m, s).unwrap().timestamp_millis()
}

fn ce_symbol() -> Symbol {
    Symbol::new(Underlying::Nifty, NaiveDate::from_ymd_opt(2026, 2, 6).unwrap(), 24200, OptionType::Ce)
}

fn tick(ts_ms: i64, price: f64, cum_volume: i64) -> Tick {
    Tick { symbol: ce_symbol(), ts_ms, last_price: swingshort_common::Px::from_rupees(price), cum_volume, source: TickSource::Primary }
}

/// Relaxed filter thresholds for the placement scenario: the static
/// VWAP-premium gate is exercised in `filter`'s own unit tests, so here it
/// is pinned open to isolate the coordinator's bar-close -> gate ->
/// dynamic-evaluate -> order -> fill -> arm wiring.
fn placement_config() -> EngineConfig {
    let mut cfg = EngineConfig::default();
    cfg.filter.min_vwap_premium = -1.0;
    cfg
}

/// Feeds a five-tick bar through the channel, one tick at a time, waiting
/// for the coordinator to drain each before sending the next.
async fn send_bar(tx: &mpsc::Sender<LoopEvent>, minute: (u32, u32), prices: [f64; 5], vol_start: i64) {
    for (i, price) in prices.into_iter().enumerate() {
        let ts = ist(minute.0, minute.1, i as u32);
        let t = tick(ts, price, vol_start + i as i64 * 100);
        tx.send(LoopEvent::Tick(t, ts)).await.unwrap();
    }
}

#[tokio::test]
async fn scenario_place_and_fill_on_breakdown() {
    let dir = tempfile::tempdir().unwrap();
    let journal_path = dir.path().join("journal.ndjson");
    let journal: SharedJournal = Arc::new(FileJournal::new(&journal_path));

    let paper = Arc::new(PaperBroker::new());
    let broker: Arc<dyn Broker> = paper.clone();

    let mut coordinator = Coordinator::new(placement_config(), broker, journal, Arc::new(NullNotifier));
    let (tx, rx) = mpsc::channel(256);
    let handle = tokio::spawn(async move {
        coordinator.run(rx).await;
        coordinator
    });

    // Bar 09:15 - the eventual anchor: high 136, low 130, close 132.
    send_bar(&tx, (9, 15), [135.0, 136.0, 130.0, 131.0, 132.0], 100).await;
    // Bar 09:16 - one watch increment (higher high, higher close).
    send_bar(&tx, (9, 16), [133.0, 138.0, 131.0, 133.0, 134.0], 600).await;
    // Bar 09:17 - second watch increment confirms the low at 130.00.
    send_bar(&tx, (9, 17), [134.0, 140.0, 133.0, 135.0, 136.0], 1100).await;

    // First tick of the new minute closes bar 09:17, confirms the swing,
    // gates it, and (same cycle) places the entry one tick below 130.00.
    let place_ts = ist(9, 18, 0);
    tx.send(LoopEvent::Tick(tick(place_ts, 130.0, 1600), place_ts)).await.unwrap();

    let mut waited = 0;
    loop {
        let open = paper.orderbook().await.unwrap();
        if !open.is_empty() {
            break;
        }
        waited += 1;
        assert!(waited < 200, "entry order was never placed");
        sleep(Duration::from_millis(10)).await;
    }

    let book = paper.orderbook().await.unwrap();
    assert_eq!(book.len(), 1);
    assert_eq!(book[0].symbol, ce_symbol());

    // A second tick, within the same still-open bar, breaks below the
    // resting limit (129.95) and fills it in the simulated broker.
    let fill_ts = ist(9, 18, 5);
    let fill_tick = tick(fill_ts, 129.90, 1700);
    tx.send(LoopEvent::Tick(fill_tick, fill_ts)).await.unwrap();
    let filled = paper.ingest_tick(&fill_tick);
    assert_eq!(filled.len(), 1, "breakdown tick must fill the resting entry");

    // Drive reconciliation so the coordinator notices the fill and arms
    // the protective stop within the same poll cycle.
    tx.send(LoopEvent::Timer(TimerKind::OrderbookPoll, fill_ts)).await.unwrap();

    let mut waited = 0;
    loop {
        let open = paper.orderbook().await.unwrap();
        if open.len() >= 2 {
            break;
        }
        waited += 1;
        assert!(waited < 200, "protective stop was never armed after fill");
        sleep(Duration::from_millis(10)).await;
    }

    tx.send(LoopEvent::Shutdown).await.unwrap();
    let coordinator = handle.await.unwrap();
    assert!(coordinator.halt_reason().is_none());
    drop(tx);

    let contents = tokio::fs::read_to_string(&journal_path).await.unwrap();
    for expected in ["swing_confirmed", "candidate_gated", "order_filled", "position_opened"] {
        assert!(contents.contains(expected), "journal missing `{expected}`:\n{contents}");
    }
    assert_eq!(contents.matches("order_placed").count(), 2, "expected an entry and an exit stop placement:\n{contents}");
}

#[tokio::test]
async fn scenario_force_exit_flattens_and_halts() {
    let dir = tempfile::tempdir().unwrap();
    let journal_path = dir.path().join("journal.ndjson");
    let journal: SharedJournal = Arc::new(FileJournal::new(&journal_path));

    let paper = Arc::new(PaperBroker::new());
    let broker: Arc<dyn Broker> = paper.clone();
    let mut coordinator = Coordinator::new(EngineConfig::default(), broker, journal, Arc::new(NullNotifier));

    let (tx, rx) = mpsc::channel(8);
    let past_cutoff = ist(15, 15, 1);
    tx.send(LoopEvent::Timer(TimerKind::RiskCheck, past_cutoff)).await.unwrap();
    drop(tx);

    coordinator.run(rx).await;

    assert_eq!(coordinator.halt_reason(), Some(HaltReason::ForceExitTime));

    let contents = tokio::fs::read_to_string(&journal_path).await.unwrap();
    assert!(contents.contains("risk_halt"));
    assert!(contents.contains("session_summary"));
}

/// A `RiskCheck` timer that lands before the force-exit cutoff must not
/// halt the loop — only a daily R breach or the cutoff itself should, and
/// neither is reached here. This isolates `flatten_all` from `shutting_down`
/// (§4.6): a mid-session cause should leave the loop free to keep gating
/// and placing candidates, while only the cutoff (and the other
/// session-ending reasons) stop it.
#[tokio::test]
async fn scenario_below_cutoff_risk_check_does_not_halt_the_loop() {
    let journal: SharedJournal = Arc::new(swingshort_journal::NullJournal);
    let paper = Arc::new(PaperBroker::new());
    let broker: Arc<dyn Broker> = paper.clone();
    let mut cfg = EngineConfig::default();
    cfg.filter.min_vwap_premium = -1.0;
    let mut coordinator = Coordinator::new(cfg, broker, journal, Arc::new(NullNotifier));

    let (tx, rx) = mpsc::channel(256);
    let handle = tokio::spawn(async move {
        coordinator.run(rx).await;
        coordinator
    });

    let early = ist(10, 0, 0);
    tx.send(LoopEvent::Timer(TimerKind::RiskCheck, early)).await.unwrap();

    send_bar(&tx, (9, 15), [135.0, 136.0, 130.0, 131.0, 132.0], 100).await;
    send_bar(&tx, (9, 16), [133.0, 138.0, 131.0, 133.0, 134.0], 600).await;
    send_bar(&tx, (9, 17), [134.0, 140.0, 133.0, 135.0, 136.0], 1100).await;
    let place_ts = ist(9, 18, 0);
    tx.send(LoopEvent::Tick(tick(place_ts, 130.0, 1600), place_ts)).await.unwrap();

    let mut waited = 0;
    loop {
        let open = paper.orderbook().await.unwrap();
        if !open.is_empty() {
            break;
        }
        waited += 1;
        assert!(waited < 200, "loop stopped processing ticks after a below-cutoff RiskCheck timer");
        sleep(Duration::from_millis(10)).await;
    }

    tx.send(LoopEvent::Shutdown).await.unwrap();
    let coordinator = handle.await.unwrap();
    assert!(coordinator.halt_reason().is_none());
}
