//! SwingDetector: watch-based confirmation of swing highs/lows per §4.3,
//! one [`SymbolSwingDetector`] per symbol, wrapped by [`SwingDetectorRegistry`]
//! for convenient per-symbol dispatch from the Coordinator.

use rustc_hash::FxHashMap;
use swingshort_common::{Bar, Swing, SwingKind, Symbol};
use tracing::info;

/// A confirmation/update/break event emitted by a closed bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SwingEvent {
    NewSwing(Swing),
    SwingUpdated(Swing),
    SwingBroken { kind: SwingKind, symbol: Symbol, breaking_bar: Bar },
}

#[derive(Debug, Clone, Copy)]
struct CandidateAnchor {
    bar_index: u64,
    bar: Bar,
}

#[derive(Debug, Default)]
struct Track {
    candidate: Option<CandidateAnchor>,
    watch: u32,
}

/// Per-symbol swing-detection state machine. See §4.3 for the algorithm.
pub struct SymbolSwingDetector {
    symbol: Symbol,
    confirmation_threshold: u32,
    bar_index: u64,
    low_track: Track,
    high_track: Track,
    last_confirmed_kind: Option<SwingKind>,
    active_low: Option<Swing>,
    active_high: Option<Swing>,
}

impl SymbolSwingDetector {
    #[must_use]
    pub fn new(symbol: Symbol, confirmation_threshold: u32) -> Self {
        Self {
            symbol,
            confirmation_threshold,
            bar_index: 0,
            low_track: Track::default(),
            high_track: Track::default(),
            last_confirmed_kind: None,
            active_low: None,
            active_high: None,
        }
    }

    #[must_use]
    pub fn active_low(&self) -> Option<Swing> {
        self.active_low
    }

    #[must_use]
    pub fn active_high(&self) -> Option<Swing> {
        self.active_high
    }

    /// Feed one newly closed bar, returning any resulting events in the
    /// spec-mandated order: updates, then new swings of the opposite kind,
    /// then breaks.
    pub fn on_bar_close(&mut self, bar: Bar) -> Vec<SwingEvent> {
        self.bar_index += 1;
        let idx = self.bar_index;

        Self::update_watch_low(&mut self.low_track, &bar);
        Self::reanchor_low(&mut self.low_track, idx, &bar);
        Self::update_watch_high(&mut self.high_track, &bar);
        Self::reanchor_high(&mut self.high_track, idx, &bar);

        let mut updates = Vec::new();
        let mut news = Vec::new();

        if self.low_track.watch >= self.confirmation_threshold {
            if let Some(anchor) = self.low_track.candidate {
                self.confirm_or_update_low(anchor, &mut updates, &mut news);
            }
        }
        if self.high_track.watch >= self.confirmation_threshold {
            if let Some(anchor) = self.high_track.candidate {
                self.confirm_or_update_high(anchor, &mut updates, &mut news);
            }
        }

        let mut breaks = Vec::new();
        if let Some(active) = self.active_low {
            if bar.low <= active.price {
                info!(symbol = %self.symbol, price = %active.price, "[SWING] swing low broken");
                breaks.push(SwingEvent::SwingBroken { kind: SwingKind::Low, symbol: self.symbol, breaking_bar: bar });
            }
        }
        if let Some(active) = self.active_high {
            if bar.high >= active.price {
                info!(symbol = %self.symbol, price = %active.price, "[SWING] swing high broken");
                breaks.push(SwingEvent::SwingBroken { kind: SwingKind::High, symbol: self.symbol, breaking_bar: bar });
            }
        }

        updates.into_iter().chain(news).chain(breaks).collect()
    }

    fn update_watch_low(track: &mut Track, bar: &Bar) {
        if let Some(anchor) = track.candidate {
            if bar.high > anchor.bar.high && bar.close > anchor.bar.close {
                track.watch += 1;
            }
        }
    }

    fn reanchor_low(track: &mut Track, idx: u64, bar: &Bar) {
        let should_reanchor = match track.candidate {
            None => true,
            Some(anchor) => bar.low < anchor.bar.low,
        };
        if should_reanchor {
            track.candidate = Some(CandidateAnchor { bar_index: idx, bar: *bar });
            track.watch = 0;
        }
    }

    fn update_watch_high(track: &mut Track, bar: &Bar) {
        if let Some(anchor) = track.candidate {
            if bar.low < anchor.bar.low && bar.close < anchor.bar.close {
                track.watch += 1;
            }
        }
    }

    fn reanchor_high(track: &mut Track, idx: u64, bar: &Bar) {
        let should_reanchor = match track.candidate {
            None => true,
            Some(anchor) => bar.high > anchor.bar.high,
        };
        if should_reanchor {
            track.candidate = Some(CandidateAnchor { bar_index: idx, bar: *bar });
            track.watch = 0;
        }
    }

    fn confirm_or_update_low(&mut self, anchor: CandidateAnchor, updates: &mut Vec<SwingEvent>, news: &mut Vec<SwingEvent>) {
        let price = anchor.bar.low;
        if self.last_confirmed_kind != Some(SwingKind::Low) {
            let swing = Swing {
                symbol: self.symbol,
                kind: SwingKind::Low,
                price,
                formed_at_bar_index: anchor.bar_index,
                vwap_at_formation: anchor.bar.vwap_at_close,
            };
            self.active_low = Some(swing);
            self.last_confirmed_kind = Some(SwingKind::Low);
            info!(symbol = %self.symbol, price = %price, "[SWING] new swing low confirmed");
            news.push(SwingEvent::NewSwing(swing));
            // Start pursuing the opposite kind from the confirming bar.
            self.high_track = Track { candidate: Some(anchor), watch: 0 };
        } else if let Some(active) = self.active_low {
            let updated = Swing { price, formed_at_bar_index: anchor.bar_index, ..active };
            self.active_low = Some(updated);
            info!(symbol = %self.symbol, price = %price, "[SWING] swing low updated in place");
            updates.push(SwingEvent::SwingUpdated(updated));
        }
        // Re-arm at the same extreme so a future, even-more-extreme bar can
        // trigger another update.
        self.low_track = Track { candidate: Some(anchor), watch: 0 };
    }

    fn confirm_or_update_high(&mut self, anchor: CandidateAnchor, updates: &mut Vec<SwingEvent>, news: &mut Vec<SwingEvent>) {
        let price = anchor.bar.high;
        if self.last_confirmed_kind != Some(SwingKind::High) {
            let swing = Swing {
                symbol: self.symbol,
                kind: SwingKind::High,
                price,
                formed_at_bar_index: anchor.bar_index,
                vwap_at_formation: anchor.bar.vwap_at_close,
            };
            self.active_high = Some(swing);
            self.last_confirmed_kind = Some(SwingKind::High);
            info!(symbol = %self.symbol, price = %price, "[SWING] new swing high confirmed");
            news.push(SwingEvent::NewSwing(swing));
            self.low_track = Track { candidate: Some(anchor), watch: 0 };
        } else if let Some(active) = self.active_high {
            let updated = Swing { price, formed_at_bar_index: anchor.bar_index, ..active };
            self.active_high = Some(updated);
            info!(symbol = %self.symbol, price = %price, "[SWING] swing high updated in place");
            updates.push(SwingEvent::SwingUpdated(updated));
        }
        self.high_track = Track { candidate: Some(anchor), watch: 0 };
    }
}

/// Owns one [`SymbolSwingDetector`] per subscribed symbol.
#[derive(Default)]
pub struct SwingDetectorRegistry {
    confirmation_threshold: u32,
    detectors: FxHashMap<Symbol, SymbolSwingDetector>,
}

impl SwingDetectorRegistry {
    #[must_use]
    pub fn new(confirmation_threshold: u32) -> Self {
        Self { confirmation_threshold, detectors: FxHashMap::default() }
    }

    pub fn on_bar_close(&mut self, bar: Bar) -> Vec<SwingEvent> {
        self.detectors
            .entry(bar.symbol)
            .or_insert_with(|| SymbolSwingDetector::new(bar.symbol, self.confirmation_threshold))
            .on_bar_close(bar)
    }

    #[must_use]
    pub fn active_low(&self, symbol: Symbol) -> Option<Swing> {
        self.detectors.get(&symbol).and_then(SymbolSwingDetector::active_low)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use swingshort_common::{OptionType, Px, Underlying};

    fn sym() -> Symbol {
        Symbol::new(Underlying::Nifty, NaiveDate::from_ymd_opt(2026, 2, 6).unwrap(), 24200, OptionType::Ce)
    }

    fn bar(minute: i64, o: f64, h: f64, l: f64, c: f64, vwap: f64) -> Bar {
        Bar {
            symbol: sym(),
            minute_start_ts: minute * 60_000,
            open: Px::from_rupees(o),
            high: Px::from_rupees(h),
            low: Px::from_rupees(l),
            close: Px::from_rupees(c),
            volume: 1000,
            vwap_at_close: vwap,
            tick_count: 5,
        }
    }

    #[test]
    fn confirms_swing_low_after_two_watch_bars() {
        let mut d = SymbolSwingDetector::new(sym(), 2);
        // Anchor bar: a clear low.
        let events = d.on_bar_close(bar(0, 135.0, 136.0, 130.0, 132.0, 124.0));
        assert!(events.is_empty());
        // Watch bar 1: higher high AND higher close -> watch=1, not confirmed yet.
        let events = d.on_bar_close(bar(1, 132.0, 138.0, 131.0, 134.0, 124.2));
        assert!(events.is_empty());
        // Watch bar 2: higher high AND higher close again -> confirmed.
        let events = d.on_bar_close(bar(2, 134.0, 140.0, 133.0, 136.0, 124.4));
        assert_eq!(events.len(), 1);
        match events[0] {
            SwingEvent::NewSwing(swing) => {
                assert_eq!(swing.kind, SwingKind::Low);
                assert_eq!(swing.price, Px::from_rupees(130.0));
                assert_eq!(swing.vwap_at_formation, 124.0);
            }
            other => panic!("expected NewSwing, got {other:?}"),
        }
    }

    #[test]
    fn ties_do_not_advance_watch() {
        let mut d = SymbolSwingDetector::new(sym(), 2);
        d.on_bar_close(bar(0, 135.0, 136.0, 130.0, 132.0, 124.0));
        // Equal high, equal close: must not advance watch.
        let _ = d.on_bar_close(bar(1, 132.0, 136.0, 131.0, 132.0, 124.1));
        let _ = d.on_bar_close(bar(2, 132.0, 137.0, 131.0, 133.0, 124.2));
        // Only one real watch increment so far -> not confirmed.
        let events = d.on_bar_close(bar(3, 132.0, 130.0, 125.0, 127.0, 124.2));
        assert!(!events.iter().any(|e| matches!(e, SwingEvent::NewSwing(s) if s.kind == SwingKind::Low)));
    }

    #[test]
    fn in_place_update_preserves_vwap_at_formation() {
        let mut d = SymbolSwingDetector::new(sym(), 2);
        d.on_bar_close(bar(0, 135.0, 136.0, 130.0, 132.0, 124.0));
        d.on_bar_close(bar(1, 132.0, 138.0, 131.0, 134.0, 124.2));
        d.on_bar_close(bar(2, 134.0, 140.0, 133.0, 136.0, 124.4)); // confirms low=130, vwap=124.0

        // New, lower low forms and gets its own 2-bar confirmation.
        d.on_bar_close(bar(3, 133.0, 134.0, 128.0, 129.0, 124.5)); // anchor at 128
        d.on_bar_close(bar(4, 129.0, 135.0, 128.5, 131.0, 124.6)); // watch 1
        let events = d.on_bar_close(bar(5, 131.0, 137.0, 129.0, 133.0, 124.7)); // watch 2 -> update
        let update = events.iter().find_map(|e| match e {
            SwingEvent::SwingUpdated(s) => Some(*s),
            _ => None,
        });
        let update = update.expect("expected a SwingUpdated event");
        assert_eq!(update.price, Px::from_rupees(128.0));
        assert_eq!(update.vwap_at_formation, 124.0, "vwap_at_formation must stay frozen at the original formation");
    }

    #[test]
    fn alternation_is_strict() {
        let mut d = SymbolSwingDetector::new(sym(), 2);
        d.on_bar_close(bar(0, 135.0, 136.0, 130.0, 132.0, 124.0));
        d.on_bar_close(bar(1, 132.0, 138.0, 131.0, 134.0, 124.2));
        let events = d.on_bar_close(bar(2, 134.0, 140.0, 133.0, 136.0, 124.4));
        assert!(events.iter().any(|e| matches!(e, SwingEvent::NewSwing(s) if s.kind == SwingKind::Low)));
        assert_eq!(d.last_confirmed_kind, Some(SwingKind::Low));

        // A subsequent swing high must confirm before another low can.
        d.on_bar_close(bar(3, 136.0, 142.0, 135.0, 138.0, 124.6));
        d.on_bar_close(bar(4, 138.0, 136.0, 130.0, 131.0, 124.5)); // lower low/close vs bar3
        let events = d.on_bar_close(bar(5, 131.0, 133.0, 125.0, 127.0, 124.3)); // watch 2 on bar3 high
        assert!(events.iter().any(|e| matches!(e, SwingEvent::NewSwing(s) if s.kind == SwingKind::High)));
        assert_eq!(d.last_confirmed_kind, Some(SwingKind::High));
    }

    #[test]
    fn break_detected_when_price_revisits_swing_level() {
        let mut d = SymbolSwingDetector::new(sym(), 2);
        d.on_bar_close(bar(0, 135.0, 136.0, 130.0, 132.0, 124.0));
        d.on_bar_close(bar(1, 132.0, 138.0, 131.0, 134.0, 124.2));
        d.on_bar_close(bar(2, 134.0, 140.0, 133.0, 136.0, 124.4)); // confirms low=130
        let events = d.on_bar_close(bar(3, 133.0, 134.0, 129.0, 130.0, 124.5));
        assert!(events.iter().any(|e| matches!(e, SwingEvent::SwingBroken { kind: SwingKind::Low, .. })));
    }
}
