//! BarAggregator: folds a per-symbol tick stream into one-minute OHLCV bars
//! with a running session VWAP (§4.1).

use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use swingshort_common::{config::BarConfig, Bar, Px, SessionClock, Symbol, Tick};
use thiserror::Error;
use tracing::debug;

/// A tick the aggregator refused to fold into a bar.
#[derive(Debug, Error, PartialEq)]
pub enum BarError {
    #[error("non-positive price {0}")]
    NonPositivePrice(i64),
    #[error("timestamp jumped by {delta_ms}ms, exceeding the session-length guard")]
    NonMonotonicTimestamp { delta_ms: i64 },
}

/// Result of feeding one tick to the aggregator.
#[derive(Debug)]
pub enum TickOutcome {
    /// Folded into the live bar; no bar closed.
    Accepted,
    /// The live bar closed (≥ `min_ticks_per_bar` ticks) and a new one started.
    BarClosed(Bar),
    /// Tick was malformed and discarded; no state changed.
    Dropped(BarError),
}

/// Maximum plausible timestamp jump between consecutive ticks of one symbol,
/// beyond which the tick is treated as corrupted rather than a real gap.
/// Calibrated to one full NIFTY cash-market session (09:15-15:30 IST).
const SESSION_SPAN_MS: i64 = 6 * 60 * 60 * 1000 + 15 * 60 * 1000;

#[derive(Debug, Clone)]
struct LiveBar {
    minute: i64,
    open: Px,
    high: Px,
    low: Px,
    close: Px,
    volume: i64,
    ticks: u32,
    last_cum_volume: i64,
}

impl LiveBar {
    fn start(minute: i64, tick: &Tick, prev_cum_volume: Option<i64>) -> Self {
        let delta_vol = prev_cum_volume.map_or(0, |prev| (tick.cum_volume - prev).max(0));
        Self {
            minute,
            open: tick.last_price,
            high: tick.last_price,
            low: tick.last_price,
            close: tick.last_price,
            volume: delta_vol,
            ticks: 1,
            last_cum_volume: tick.cum_volume,
        }
    }

    fn fold(&mut self, tick: &Tick) {
        self.high = self.high.max(tick.last_price);
        self.low = self.low.min(tick.last_price);
        self.close = tick.last_price;
        self.volume += (tick.cum_volume - self.last_cum_volume).max(0);
        self.last_cum_volume = tick.cum_volume;
        self.ticks += 1;
    }

    fn into_bar(self, symbol: Symbol, vwap_at_close: f64) -> Bar {
        Bar {
            symbol,
            minute_start_ts: self.minute * 60_000,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            vwap_at_close,
            tick_count: self.ticks,
        }
    }

    fn typical_price(&self) -> f64 {
        (self.high.as_rupees() + self.low.as_rupees() + self.close.as_rupees()) / 3.0
    }
}

#[derive(Debug, Default)]
struct VwapAccumulator {
    cum_tp_vol: f64,
    cum_vol: i64,
    vwap: f64,
}

impl VwapAccumulator {
    fn update(&mut self, tp: f64, vol: i64) {
        self.cum_tp_vol += tp * vol as f64;
        self.cum_vol += vol;
        if self.cum_vol > 0 {
            self.vwap = self.cum_tp_vol / self.cum_vol as f64;
        }
    }
}

struct SymbolState {
    live: Option<LiveBar>,
    vwap: VwapAccumulator,
    last_ts_ms: Option<i64>,
    history: VecDeque<Bar>,
}

impl SymbolState {
    fn new() -> Self {
        Self { live: None, vwap: VwapAccumulator::default(), last_ts_ms: None, history: VecDeque::new() }
    }
}

/// Folds ticks into bars and maintains the session-cumulative VWAP, one
/// instance shared across all subscribed symbols.
pub struct BarAggregator {
    clock: SessionClock,
    cfg: BarConfig,
    states: FxHashMap<Symbol, SymbolState>,
    dropped_count: u64,
}

impl BarAggregator {
    #[must_use]
    pub fn new(clock: SessionClock, cfg: BarConfig) -> Self {
        Self { clock, cfg, states: FxHashMap::default(), dropped_count: 0 }
    }

    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count
    }

    /// Feed one tick. See `TickOutcome` for the three possible results.
    pub fn on_tick(&mut self, tick: &Tick) -> TickOutcome {
        if tick.last_price.scaled() <= 0 {
            self.dropped_count += 1;
            return TickOutcome::Dropped(BarError::NonPositivePrice(tick.last_price.scaled()));
        }

        let state = self.states.entry(tick.symbol).or_insert_with(SymbolState::new);
        if let Some(last_ts) = state.last_ts_ms {
            let delta = tick.ts_ms - last_ts;
            if delta.abs() > SESSION_SPAN_MS {
                self.dropped_count += 1;
                return TickOutcome::Dropped(BarError::NonMonotonicTimestamp { delta_ms: delta });
            }
        }
        state.last_ts_ms = Some(tick.ts_ms);

        let minute = self.clock.minute_index(tick.ts_ms);
        let mut closed_bar = None;

        match &mut state.live {
            None => {
                state.live = Some(LiveBar::start(minute, tick, None));
            }
            Some(live) if live.minute == minute => {
                live.fold(tick);
            }
            Some(live) => {
                let prev_cum_volume = live.last_cum_volume;
                let finished = state.live.take().unwrap();
                if finished.ticks >= self.cfg.min_ticks_per_bar {
                    let tp = finished.typical_price();
                    let vol = finished.volume;
                    state.vwap.update(tp, vol);
                    let bar = finished.into_bar(tick.symbol, state.vwap.vwap);
                    state.history.push_back(bar);
                    while state.history.len() > self.cfg.max_retained_bars {
                        state.history.pop_front();
                    }
                    closed_bar = Some(bar);
                } else {
                    debug!(symbol = %tick.symbol, ticks = finished.ticks, "discarding partial bar at minute rollover");
                }
                state.live = Some(LiveBar::start(minute, tick, Some(prev_cum_volume)));
            }
        }

        match closed_bar {
            Some(bar) => TickOutcome::BarClosed(bar),
            None => TickOutcome::Accepted,
        }
    }

    /// The live (still-accumulating) high for `symbol`, used by the
    /// dynamic stop-distance gate to react within the current minute.
    #[must_use]
    pub fn current_live_high(&self, symbol: Symbol) -> Option<Px> {
        self.states.get(&symbol).and_then(|s| s.live.as_ref()).map(|l| l.high)
    }

    /// Closed bars for `symbol`, oldest first, bounded to
    /// `BarConfig::max_retained_bars`.
    #[must_use]
    pub fn bar_history(&self, symbol: Symbol) -> Vec<Bar> {
        self.states.get(&symbol).map_or_else(Vec::new, |s| s.history.iter().copied().collect())
    }

    #[must_use]
    pub fn session_vwap(&self, symbol: Symbol) -> Option<f64> {
        self.states.get(&symbol).filter(|s| s.vwap.cum_vol > 0).map(|s| s.vwap.vwap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use swingshort_common::{OptionType, TickSource, Underlying};

    fn sym() -> Symbol {
        Symbol::new(Underlying::Nifty, NaiveDate::from_ymd_opt(2026, 2, 6).unwrap(), 24200, OptionType::Ce)
    }

    fn tick(ts_ms: i64, price: f64, cum_vol: i64) -> Tick {
        Tick { symbol: sym(), ts_ms, last_price: Px::from_rupees(price), cum_volume: cum_vol, source: TickSource::Primary }
    }

    fn agg() -> BarAggregator {
        BarAggregator::new(SessionClock::default(), BarConfig::default())
    }

    #[test]
    fn bar_emitted_only_with_five_or_more_ticks() {
        let mut a = agg();
        let base = 1_000_000_000_000i64; // arbitrary ms, aligned by minute math only
        for i in 0..4 {
            let r = a.on_tick(&tick(base + i * 1000, 100.0 + i as f64, (i + 1) * 10));
            assert!(matches!(r, TickOutcome::Accepted));
        }
        // Roll to next minute with only 4 prior ticks -> discarded silently.
        let r = a.on_tick(&tick(base + 61_000, 105.0, 50));
        assert!(matches!(r, TickOutcome::Accepted));
        assert!(a.bar_history(sym()).is_empty());
    }

    #[test]
    fn bar_emitted_with_five_ticks_and_vwap_updates() {
        let mut a = agg();
        let base = 1_000_000_000_000i64;
        for i in 0..5 {
            a.on_tick(&tick(base + i * 1000, 100.0 + i as f64, (i as i64 + 1) * 10));
        }
        let outcome = a.on_tick(&tick(base + 61_000, 110.0, 100));
        match outcome {
            TickOutcome::BarClosed(bar) => {
                assert_eq!(bar.tick_count, 5);
                assert_eq!(bar.open, Px::from_rupees(100.0));
                assert_eq!(bar.high, Px::from_rupees(104.0));
                assert_eq!(bar.close, Px::from_rupees(104.0));
            }
            other => panic!("expected BarClosed, got {other:?}"),
        }
        assert!(a.session_vwap(sym()).is_some());
    }

    #[test]
    fn non_positive_price_dropped() {
        let mut a = agg();
        let r = a.on_tick(&tick(1_000, 0.0, 10));
        assert!(matches!(r, TickOutcome::Dropped(BarError::NonPositivePrice(_))));
        assert_eq!(a.dropped_count(), 1);
    }

    #[test]
    fn non_monotonic_timestamp_dropped() {
        let mut a = agg();
        a.on_tick(&tick(10_000_000, 100.0, 10));
        let r = a.on_tick(&tick(10_000_000 - SESSION_SPAN_MS - 1, 101.0, 20));
        assert!(matches!(r, TickOutcome::Dropped(BarError::NonMonotonicTimestamp { .. })));
    }

    #[test]
    fn live_high_tracks_within_minute() {
        let mut a = agg();
        let base = 2_000_000_000_000i64;
        a.on_tick(&tick(base, 100.0, 10));
        a.on_tick(&tick(base + 1000, 140.0, 20));
        assert_eq!(a.current_live_high(sym()), Some(Px::from_rupees(140.0)));
    }
}
