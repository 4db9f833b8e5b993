//! FilterEngine: the static price/VWAP gate, the dynamic stop-distance
//! gate, and the per-side tie-break, per §4.4.

use rustc_hash::FxHashMap;
use swingshort_common::{config::FilterConfig, Px, Qty, Side, Swing, Symbol};
use tracing::info;

/// A swing low that has passed the static gate. Immutable except for its
/// embedded `swing.price`, which in-place swing updates may change without
/// re-running the gate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaticCandidate {
    pub swing: Swing,
    pub side: Side,
}

impl StaticCandidate {
    #[must_use]
    pub fn entry_price(&self) -> Px {
        self.swing.price
    }
}

/// A static candidate re-evaluated against the current highest high since
/// its swing formed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DynamicCandidate {
    pub symbol: Symbol,
    pub side: Side,
    pub entry_price: Px,
    pub sl_trigger: Px,
    pub sl_points: f64,
    pub sl_percent: f64,
    pub lots: i64,
    pub quantity: Qty,
    pub actual_r: f64,
}

/// The best qualifying candidate per side, after tie-break.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CurrentBest {
    pub ce: Option<DynamicCandidate>,
    pub pe: Option<DynamicCandidate>,
}

/// Stage-1 outcome, used to drive `candidate_gated`/`candidate_disqualified`
/// journal events.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GateEvent {
    Gated(Symbol),
    Disqualified(Symbol),
}

/// Runs the three-stage continuous filter over the pool of static
/// candidates the SwingDetector has handed it.
pub struct FilterEngine {
    cfg: FilterConfig,
    pool: FxHashMap<Symbol, StaticCandidate>,
}

impl FilterEngine {
    #[must_use]
    pub fn new(cfg: FilterConfig) -> Self {
        Self { cfg, pool: FxHashMap::default() }
    }

    /// Stage-1: runs once per `new_swing{kind=Low}`.
    pub fn on_new_swing_low(&mut self, swing: Swing) -> Option<GateEvent> {
        let side = Side::from(swing.symbol.option);
        if self.passes_static_gate(&swing) {
            self.pool.insert(swing.symbol, StaticCandidate { swing, side });
            info!(symbol = %swing.symbol, price = %swing.price, "[FILTER] candidate gated");
            Some(GateEvent::Gated(swing.symbol))
        } else if self.pool.remove(&swing.symbol).is_some() {
            info!(symbol = %swing.symbol, price = %swing.price, "[FILTER] candidate disqualified by new swing low");
            Some(GateEvent::Disqualified(swing.symbol))
        } else {
            None
        }
    }

    fn passes_static_gate(&self, swing: &Swing) -> bool {
        let price = swing.price.as_rupees();
        if price < self.cfg.min_entry_price || price > self.cfg.max_entry_price {
            return false;
        }
        if swing.vwap_at_formation <= 0.0 {
            return false;
        }
        let premium = (price - swing.vwap_at_formation) / swing.vwap_at_formation;
        premium >= self.cfg.min_vwap_premium
    }

    /// Propagates an in-place swing-low update without re-running Stage-1.
    pub fn on_swing_low_updated(&mut self, swing: Swing) {
        if let Some(candidate) = self.pool.get_mut(&swing.symbol) {
            candidate.swing = swing;
        }
    }

    /// A swing breaking, or session cutoff, invalidates the candidate.
    pub fn on_swing_low_broken(&mut self, symbol: Symbol) {
        self.pool.remove(&symbol);
    }

    pub fn invalidate_all(&mut self) {
        self.pool.clear();
    }

    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    #[must_use]
    pub fn has_candidate(&self, symbol: Symbol) -> bool {
        self.pool.contains_key(&symbol)
    }

    /// Stage-2 + Stage-3: `highest_highs` carries, for every symbol
    /// currently in the pool, `max(closed-bar highs since the swing,
    /// BarAggregator::current_live_high)`, computed by the caller so this
    /// crate stays free of a dependency on the bar aggregator (message
    /// passing per the design notes, not direct coupling).
    pub fn evaluate(&self, highest_highs: &FxHashMap<Symbol, Px>) -> CurrentBest {
        let mut qualifying: Vec<DynamicCandidate> = Vec::new();
        for candidate in self.pool.values() {
            let Some(&highest_high) = highest_highs.get(&candidate.swing.symbol) else {
                continue;
            };
            if let Some(dyn_candidate) = self.evaluate_one(candidate, highest_high) {
                qualifying.push(dyn_candidate);
            }
        }

        let ce = Self::best_of(qualifying.iter().filter(|c| c.side == Side::Ce).copied(), &self.cfg);
        let pe = Self::best_of(qualifying.iter().filter(|c| c.side == Side::Pe).copied(), &self.cfg);
        CurrentBest { ce, pe }
    }

    fn evaluate_one(&self, candidate: &StaticCandidate, highest_high: Px) -> Option<DynamicCandidate> {
        let tick = Px::from_rupees(self.cfg.sl_trigger_buffer);
        let sl_trigger = highest_high + tick;
        let entry_price = candidate.entry_price();
        let sl_points = sl_trigger.as_rupees() - entry_price.as_rupees();
        let sl_percent = sl_points / entry_price.as_rupees();

        if sl_percent < self.cfg.min_sl_percent || sl_percent > self.cfg.max_sl_percent {
            return None;
        }

        let lots_wanted = self.cfg.r_value / (sl_points * self.cfg.lot_size as f64);
        let lots = (lots_wanted.floor() as i64).min(self.cfg.max_lots_per_position);
        if lots < 1 {
            return None;
        }
        let quantity = Qty::new(lots * self.cfg.lot_size);
        let actual_r = sl_points * quantity.as_i64() as f64;

        Some(DynamicCandidate {
            symbol: candidate.swing.symbol,
            side: candidate.side,
            entry_price,
            sl_trigger,
            sl_points,
            sl_percent,
            lots,
            quantity,
            actual_r,
        })
    }

    fn best_of(candidates: impl Iterator<Item = DynamicCandidate>, cfg: &FilterConfig) -> Option<DynamicCandidate> {
        candidates.min_by(|a, b| Self::tie_break_key(a, cfg).partial_cmp(&Self::tie_break_key(b, cfg)).unwrap())
    }

    /// Ascending sort key: smaller wins. Rule 1 minimizes distance from the
    /// target SL points; rule 2 prefers round strikes (encoded as 0 < 1);
    /// rule 3 prefers the higher entry price (encoded as its negation);
    /// a final tie-break on the symbol's string form keeps selection
    /// reproducible across runs when every prior field is equal.
    fn tie_break_key(c: &DynamicCandidate, cfg: &FilterConfig) -> (f64, u8, f64, String) {
        let diff = (c.sl_points - cfg.target_sl_points).abs();
        let round_rank = u8::from(c.symbol.strike % 100 != 0);
        (diff, round_rank, -c.entry_price.as_rupees(), c.symbol.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use swingshort_common::{OptionType, SwingKind, Underlying};

    fn symbol(strike: u32, opt: OptionType) -> Symbol {
        Symbol::new(Underlying::Nifty, NaiveDate::from_ymd_opt(2026, 2, 6).unwrap(), strike, opt)
    }

    fn low_swing(strike: u32, opt: OptionType, price: f64, vwap: f64) -> Swing {
        Swing { symbol: symbol(strike, opt), kind: SwingKind::Low, price: Px::from_rupees(price), formed_at_bar_index: 1, vwap_at_formation: vwap }
    }

    #[test]
    fn scenario_1_place_and_fill_call_side() {
        let mut fe = FilterEngine::new(FilterConfig::default());
        let swing = low_swing(24200, OptionType::Ce, 130.00, 124.00);
        assert_eq!(fe.on_new_swing_low(swing), Some(GateEvent::Gated(swing.symbol)));

        let mut highs = FxHashMap::default();
        highs.insert(swing.symbol, Px::from_rupees(140.00));
        let best = fe.evaluate(&highs);
        let ce = best.ce.expect("CE candidate should qualify");
        assert_eq!(ce.sl_trigger, Px::from_rupees(141.0));
        assert!((ce.sl_points - 11.0).abs() < 1e-9);
        assert!((ce.sl_percent - 11.0 / 130.0).abs() < 1e-9);
        assert_eq!(ce.lots, 9);
        assert_eq!(ce.quantity, Qty::new(585));
    }

    #[test]
    fn static_gate_rejects_low_premium() {
        let mut fe = FilterEngine::new(FilterConfig::default());
        let swing = low_swing(24200, OptionType::Ce, 130.00, 129.00); // premium ~0.78%
        assert_eq!(fe.on_new_swing_low(swing), None);
        assert_eq!(fe.pool_size(), 0);
    }

    #[test]
    fn new_failing_swing_removes_existing_candidate() {
        let mut fe = FilterEngine::new(FilterConfig::default());
        let good = low_swing(24200, OptionType::Ce, 130.00, 124.00);
        fe.on_new_swing_low(good);
        assert!(fe.has_candidate(good.symbol));

        let bad = low_swing(24200, OptionType::Ce, 350.00, 124.00); // out of price range
        let ev = fe.on_new_swing_low(bad);
        assert_eq!(ev, Some(GateEvent::Disqualified(bad.symbol)));
        assert!(!fe.has_candidate(bad.symbol));
    }

    #[test]
    fn tie_break_prefers_smallest_sl_points_distance() {
        let mut fe = FilterEngine::new(FilterConfig::default());
        let a = low_swing(24100, OptionType::Ce, 150.00, 140.0);
        let b = low_swing(24300, OptionType::Ce, 160.00, 150.0);
        fe.on_new_swing_low(a);
        fe.on_new_swing_low(b);

        let mut highs = FxHashMap::default();
        // a: sl_trigger = 150+10.5+1=161.5 -> sl_points = 11.5 approx; craft
        // exact highs so a's sl_points is 10.5 and b's is 11.0 (closer to 10 wins a).
        highs.insert(a.symbol, Px::from_rupees(159.5)); // trigger=160.5, sl_points=10.5
        highs.insert(b.symbol, Px::from_rupees(170.0)); // trigger=171.0, sl_points=11.0
        let best = fe.evaluate(&highs).ce.unwrap();
        assert_eq!(best.symbol.strike, 24100);
    }

    #[test]
    fn tie_break_prefers_round_strike_on_equal_distance() {
        let mut fe = FilterEngine::new(FilterConfig::default());
        let round = low_swing(24300, OptionType::Pe, 150.00, 140.0); // 24300 % 100 == 0
        let nonround = low_swing(24250, OptionType::Pe, 150.00, 140.0);
        fe.on_new_swing_low(round);
        fe.on_new_swing_low(nonround);

        let mut highs = FxHashMap::default();
        // Both get identical sl_points (=10.0) by construction.
        highs.insert(round.symbol, Px::from_rupees(159.0)); // trigger 160, sl_points=10.0
        highs.insert(nonround.symbol, Px::from_rupees(159.0));
        let best = fe.evaluate(&highs).pe.unwrap();
        assert_eq!(best.symbol.strike, 24300);
    }

    #[test]
    fn sub_one_lot_disqualifies() {
        let mut fe = FilterEngine::new(FilterConfig::default());
        // A huge sl_points makes r_value/(sl_points*lot_size) < 1.
        let swing = low_swing(24200, OptionType::Ce, 100.00, 90.0);
        fe.on_new_swing_low(swing);
        let mut highs = FxHashMap::default();
        highs.insert(swing.symbol, Px::from_rupees(109.0)); // sl_points ~ 10 -> fine actually; force via r_value smallness instead
        let mut cfg = FilterConfig::default();
        cfg.r_value = 10.0; // tiny R forces lots_wanted < 1
        let fe2 = FilterEngine { cfg, pool: { let mut p = FxHashMap::default(); p.insert(swing.symbol, StaticCandidate { swing, side: Side::Ce }); p } };
        let best = fe2.evaluate(&highs);
        assert!(best.ce.is_none());
    }
}
