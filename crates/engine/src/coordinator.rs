//! The single-task decision loop (§5): one `mpsc` channel multiplexes
//! ticks and interval timers into one `LoopEvent` stream, consumed
//! sequentially so no two decisions ever race over `FilterEngine`'s pool
//! or `OrderManager`'s pending/position maps.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use swingshort_bars::{BarAggregator, TickOutcome};
use swingshort_broker::Broker;
use swingshort_common::config::EngineConfig;
use swingshort_common::{Px, SessionClock, Side, Swing, Symbol, Tick};
use swingshort_feed::FeedSupervisor;
use swingshort_filter::{CurrentBest, FilterEngine, GateEvent};
use swingshort_journal::{Alert, Journal, JournalEvent, Notifier, SharedJournal, Throttle};
use swingshort_orders::{OrderEvent, OrderManager};
use swingshort_risk::{HaltReason, RiskAction, RiskGovernor};
use swingshort_swing::{SwingDetectorRegistry, SwingEvent};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// The interval timers merged onto the same channel as ticks (§5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    OrderbookPoll,
    PositionReconcile,
    RiskCheck,
    Heartbeat,
    DataWatchdog,
}

/// Everything the decision loop consumes, tagged with the wall-clock time
/// the producer observed it so replaying from the journal stays faithful.
pub enum LoopEvent {
    Tick(Tick, i64),
    Timer(TimerKind, i64),
    Shutdown,
}

/// Owns every decision-layer collaborator and drives them from one
/// sequential event loop. Nothing here is `Send`-shared beyond the channel
/// itself — the loop is the only writer.
pub struct Coordinator {
    broker: Arc<dyn Broker>,
    clock: SessionClock,
    bars: BarAggregator,
    feed: FeedSupervisor,
    swing: SwingDetectorRegistry,
    filter: FilterEngine,
    orders: OrderManager,
    risk: RiskGovernor,
    journal: SharedJournal,
    notifier: Arc<dyn Notifier>,
    throttle: Throttle,
    highest_high_since_swing: FxHashMap<Symbol, Px>,
    last_price: FxHashMap<Symbol, Px>,
    max_sl_failure_count: u32,
    shutting_down: bool,
}

impl Coordinator {
    #[must_use]
    pub fn new(cfg: EngineConfig, broker: Arc<dyn Broker>, journal: SharedJournal, notifier: Arc<dyn Notifier>) -> Self {
        let clock = SessionClock::default();
        Self {
            broker,
            clock,
            bars: BarAggregator::new(clock, cfg.bars.clone()),
            feed: FeedSupervisor::new(cfg.feed.clone()),
            swing: SwingDetectorRegistry::new(cfg.swing.confirmation_threshold),
            filter: FilterEngine::new(cfg.filter.clone()),
            orders: OrderManager::new(cfg.orders.clone(), cfg.filter.r_value),
            risk: RiskGovernor::new(cfg.risk.clone()),
            journal,
            notifier,
            throttle: Throttle::new(std::time::Duration::from_secs(1800)),
            highest_high_since_swing: FxHashMap::default(),
            last_price: FxHashMap::default(),
            max_sl_failure_count: cfg.risk.max_sl_failure_count,
            shutting_down: false,
        }
    }

    /// Drains `rx` until a `Shutdown` event or the channel closes, handling
    /// every event sequentially.
    pub async fn run(&mut self, mut rx: mpsc::Receiver<LoopEvent>) {
        while let Some(event) = rx.recv().await {
            match event {
                LoopEvent::Tick(tick, now_ms) => self.on_tick(tick, now_ms).await,
                LoopEvent::Timer(kind, now_ms) => self.on_timer(kind, now_ms).await,
                LoopEvent::Shutdown => break,
            }
            if self.shutting_down {
                break;
            }
        }
        self.shutdown().await;
    }

    async fn on_tick(&mut self, tick: Tick, now_ms: i64) {
        self.last_price.insert(tick.symbol, tick.last_price);

        let (forwarded, feed_event) = self.feed.on_tick(tick, now_ms);
        if let Some(event) = feed_event {
            warn!(?event, "[FEED] liveness transition");
        }
        let Some(tick) = forwarded else { return };

        if let Some(candidate) = self.filter.has_candidate(tick.symbol).then(|| self.bars.current_live_high(tick.symbol)).flatten() {
            self.highest_high_since_swing
                .entry(tick.symbol)
                .and_modify(|h| *h = (*h).max(candidate))
                .or_insert(candidate);
        }

        match self.bars.on_tick(&tick) {
            TickOutcome::Accepted => {}
            TickOutcome::BarClosed(bar) => self.on_bar_close(bar).await,
            TickOutcome::Dropped(err) => warn!(symbol = %tick.symbol, error = %err, "[SWING] tick dropped by bar aggregator"),
        }

        self.reevaluate().await;
    }

    async fn on_bar_close(&mut self, bar: swingshort_common::Bar) {
        for event in self.swing.on_bar_close(bar) {
            self.apply_swing_event(event, bar).await;
        }
        if let Some(high) = self.highest_high_since_swing.get_mut(&bar.symbol) {
            *high = (*high).max(bar.high);
        }
        self.check_session_risk().await;
    }

    async fn apply_swing_event(&mut self, event: SwingEvent, bar: swingshort_common::Bar) {
        match event {
            SwingEvent::NewSwing(swing) => {
                let _ = self
                    .journal
                    .append(JournalEvent::SwingConfirmed { symbol: swing.symbol, kind: format!("{:?}", swing.kind), price: swing.price, formed_at_bar_index: swing.formed_at_bar_index })
                    .await;
                if swing.is_low() {
                    let high = self.highest_high_since_formation(swing.symbol, swing.formed_at_bar_index, bar.high);
                    self.highest_high_since_swing.insert(swing.symbol, high);
                    let gate = self.filter.on_new_swing_low(swing);
                    self.apply_gate_event(gate, swing).await;
                }
            }
            SwingEvent::SwingUpdated(swing) => {
                let _ = self.journal.append(JournalEvent::SwingUpdated { symbol: swing.symbol, kind: format!("{:?}", swing.kind), price: swing.price }).await;
                if swing.is_low() {
                    let high = self.highest_high_since_formation(swing.symbol, swing.formed_at_bar_index, bar.high);
                    self.highest_high_since_swing.insert(swing.symbol, high);
                    self.filter.on_swing_low_updated(swing);
                }
            }
            SwingEvent::SwingBroken { kind, symbol, .. } => {
                info!(symbol = %symbol, ?kind, "[SWING] swing broken");
                let _ = self.journal.append(JournalEvent::SwingBroken { symbol, kind: format!("{kind:?}") }).await;
                if kind == swingshort_common::SwingKind::Low {
                    self.filter.on_swing_low_broken(symbol);
                    self.highest_high_since_swing.remove(&symbol);
                }
            }
        }
    }

    /// The dynamic gate needs `max(bar.high)` over every closed bar from the
    /// swing low's formation bar through the confirming bar, not just the
    /// confirming bar's own high — an intermediate watch bar can spike
    /// higher than the bar that finally confirms. `bar_history` is indexed
    /// the same way `formed_at_bar_index` counts (one entry per close, both
    /// starting at 1), so the formation bar sits at `formed_at_bar_index - 1`.
    fn highest_high_since_formation(&self, symbol: Symbol, formed_at_bar_index: u64, confirming_bar_high: Px) -> Px {
        let start = (formed_at_bar_index.saturating_sub(1)) as usize;
        self.bars.bar_history(symbol).into_iter().skip(start).map(|b| b.high).fold(confirming_bar_high, Px::max)
    }

    async fn apply_gate_event(&self, gate: Option<GateEvent>, swing: Swing) {
        match gate {
            Some(GateEvent::Gated(symbol)) => {
                let _ = self.journal.append(JournalEvent::CandidateGated { symbol, entry_price: swing.price }).await;
            }
            Some(GateEvent::Disqualified(symbol)) => {
                let _ = self.journal.append(JournalEvent::CandidateDisqualified { symbol }).await;
            }
            None => {}
        }
    }

    /// Folds closed-bar highs with the live (sub-minute) high, re-runs the
    /// dynamic gate and tie-break, then diffs the result against resting
    /// orders.
    async fn reevaluate(&mut self) {
        let mut highs = self.highest_high_since_swing.clone();
        for (symbol, high) in &mut highs {
            if let Some(live) = self.bars.current_live_high(*symbol) {
                *high = (*high).max(live);
            }
        }
        let best = self.filter.evaluate(&highs);
        let best = self.gate_for_risk(best);
        let events = self.orders.sync(best, self.broker.as_ref()).await;
        for event in events {
            self.apply_order_event(event).await;
        }
    }

    /// Drops a side's new-entry candidate when `RiskGovernor` would refuse
    /// it — management of an already-pending or already-open position on
    /// that side is untouched by the cap check.
    fn gate_for_risk(&self, mut best: CurrentBest) -> CurrentBest {
        if self.risk.is_halted() {
            return CurrentBest::default();
        }
        let total_open = self.orders.position_count();
        for (side, candidate) in [(Side::Ce, &mut best.ce), (Side::Pe, &mut best.pe)] {
            let Some(c) = candidate else { continue };
            let already_live = self.orders.pending(side).is_some() || self.orders.positions().contains_key(&c.symbol);
            if !already_live {
                let side_open = self.orders.position_count_for(side);
                if !self.risk.permits_new_entry(side, total_open, side_open) {
                    *candidate = None;
                }
            }
        }
        best
    }

    async fn apply_order_event(&mut self, event: OrderEvent) {
        match &event {
            OrderEvent::EntryPlaced { symbol, order_id, limit_price } => {
                info!(symbol = %symbol, order_id, price = %limit_price, "[ORDER] entry placed");
                let _ = self.journal.append(JournalEvent::OrderPlaced { symbol: *symbol, order_id: order_id.clone(), limit_price: *limit_price }).await;
            }
            OrderEvent::EntryModified { symbol, order_id, limit_price } => {
                let _ = self.journal.append(JournalEvent::OrderModified { symbol: *symbol, order_id: order_id.clone(), limit_price: *limit_price }).await;
            }
            OrderEvent::EntryCancelled { symbol, order_id } => {
                let _ = self.journal.append(JournalEvent::OrderCancelled { symbol: *symbol, order_id: order_id.clone() }).await;
            }
            OrderEvent::EntryRejected { symbol, reason } => {
                error!(symbol = %symbol, reason = %reason, "[ORDER] entry rejected");
                self.raise_alert(swingshort_common::ErrorKind::BrokerPermanent, format!("entry rejected for {symbol}: {reason}")).await;
            }
            OrderEvent::Filled { symbol, qty, price } => {
                info!(symbol = %symbol, %qty, price = %price, "[FILL] entry filled");
                let _ = self.journal.append(JournalEvent::OrderFilled { symbol: *symbol, qty: *qty, price: *price }).await;
                let _ = self.journal.append(JournalEvent::PositionOpened { symbol: *symbol, qty: *qty, entry_price: *price }).await;
            }
            OrderEvent::ExitArmed { symbol, order_id, trigger, limit } => {
                info!(symbol = %symbol, trigger = %trigger, limit = %limit, "[ORDER] protective stop armed");
                let _ = self.journal.append(JournalEvent::OrderPlaced { symbol: *symbol, order_id: order_id.clone(), limit_price: *limit }).await;
            }
            OrderEvent::ExitArmFailed { symbol, reason } => {
                error!(symbol = %symbol, reason = %reason, "[ORDER] protective stop arming failed");
                self.raise_alert(swingshort_common::ErrorKind::StopArmingFailure, format!("stop arming failed for {symbol}: {reason}")).await;
            }
            OrderEvent::PositionClosed { symbol, exit_price, r_multiple } => {
                info!(symbol = %symbol, exit_price = %exit_price, r_multiple, "[EXIT] position closed");
                self.risk.record_trade_closed(*r_multiple);
                let _ = self.journal.append(JournalEvent::PositionClosed { symbol: *symbol, exit_price: *exit_price, r_multiple: *r_multiple }).await;
            }
        }
    }

    async fn raise_alert(&self, kind: swingshort_common::ErrorKind, message: String) {
        if self.throttle.allow(kind, std::time::Instant::now()) {
            self.notifier.notify(Alert { kind, message }).await;
        }
    }

    async fn check_session_risk(&mut self) {
        let cumulative_r = self.orders.realized_r() + self.orders.unrealized_r(&self.last_price);
        if self.risk.check_session_r(cumulative_r) == RiskAction::FlattenAll {
            self.flatten_all().await;
        }
    }

    async fn on_timer(&mut self, kind: TimerKind, now_ms: i64) {
        match kind {
            TimerKind::OrderbookPoll => match self.orders.reconcile_orderbook(self.broker.as_ref()).await {
                Ok(events) => {
                    for event in events {
                        self.apply_order_event(event).await;
                    }
                }
                Err(e) => warn!(error = %e, "[RECONCILE] orderbook poll failed"),
            },
            TimerKind::PositionReconcile => match self.orders.reconcile_positions(self.broker.as_ref()).await {
                Ok(events) => {
                    for event in events {
                        self.apply_order_event(event).await;
                    }
                }
                Err(e) => warn!(error = %e, "[RECONCILE] position reconcile failed"),
            },
            TimerKind::RiskCheck => {
                self.check_session_risk().await;
                let local_time = self.clock.local_time(now_ms);
                if self.risk.check_force_exit(local_time) == RiskAction::FlattenAll {
                    self.flatten_all().await;
                    self.shutting_down = true;
                }
                self.retry_unarmed_stops().await;
            }
            TimerKind::Heartbeat => info!("[SWING] heartbeat"),
            TimerKind::DataWatchdog => {
                if let Some(event) = self.feed.poll(now_ms) {
                    warn!(?event, "[FEED] liveness transition");
                }
                if self.feed.both_stale(now_ms) && !self.risk.is_halted() {
                    error!("[RISK] both feed sources stale, halting session");
                    self.raise_alert(swingshort_common::ErrorKind::FeedStale, "both feed sources stale".to_string()).await;
                    if self.risk.force_halt(HaltReason::FeedLoss) == RiskAction::FlattenAll {
                        self.flatten_all().await;
                        self.shutting_down = true;
                    }
                }
            }
        }
    }

    async fn retry_unarmed_stops(&mut self) {
        let unarmed: Vec<Symbol> = self
            .orders
            .positions()
            .iter()
            .filter(|(_, p)| p.status == swingshort_orders::PositionStatus::Active && p.exit_sl_order_id.is_none())
            .map(|(s, _)| *s)
            .collect();
        for symbol in unarmed {
            let (events, breached) = self.orders.retry_protective_stop(symbol, self.max_sl_failure_count, self.broker.as_ref()).await;
            for event in events {
                self.apply_order_event(event).await;
            }
            if breached && self.risk.record_stop_arming_breach() == RiskAction::FlattenAll {
                self.flatten_all().await;
                self.shutting_down = true;
            }
        }
    }

    /// Cancels all pending entries and covers all open positions. Daily
    /// target/stop halts leave the loop running — `gate_for_risk` already
    /// rejects every new candidate once `RiskGovernor` is halted, so a
    /// qualifying symbol arriving later produces zero broker calls. Callers
    /// that represent the end of the session (force-exit cutoff, feed loss,
    /// repeated stop-arming failures) set `shutting_down` themselves.
    async fn flatten_all(&mut self) {
        self.filter.invalidate_all();
        let events = self.orders.flatten_all(self.broker.as_ref()).await;
        for event in events {
            self.apply_order_event(event).await;
        }
        if let Some(reason) = self.risk.summary().halt_reason {
            let _ = self.journal.append(JournalEvent::RiskHalt { reason: reason.to_string() }).await;
        }
    }

    async fn shutdown(&self) {
        let summary = self.risk.summary();
        info!(trades = summary.trades_taken, realized_r = summary.realized_r, "[SWING] session summary");
        let _ = self
            .journal
            .append(JournalEvent::SessionSummary {
                trades_taken: summary.trades_taken,
                wins: summary.wins,
                losses: summary.losses,
                realized_r: summary.realized_r,
                halt_reason: summary.halt_reason.map(|r| r.to_string()),
            })
            .await;
    }

    /// The reason the session halted, if it did — the binary uses this to
    /// distinguish a clean session end (daily target, daily stop,
    /// force-exit cutoff) from a supervised abort (feed loss, repeated
    /// stop-arming failures) when choosing its process exit code.
    #[must_use]
    pub fn halt_reason(&self) -> Option<HaltReason> {
        self.risk.summary().halt_reason
    }
}
