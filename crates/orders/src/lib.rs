//! OrderManager + PositionTracker (§4.5–4.6's execution half; risk caps and
//! session flattening live in `swingshort-risk`). Owns `pending_entry[CE]`,
//! `pending_entry[PE]`, and the map of open positions with their protective
//! stops, and runs the diff table that decides place/modify/cancel/replace
//! on every filter re-evaluation.

pub mod error;
pub mod types;

pub use error::OrdersError;
pub use types::{PendingEntry, Position, PositionStatus};

use rustc_hash::FxHashMap;
use swingshort_broker::{Broker, BrokerOrderSide, OrderId, OrderKind, OrderStatus as BrokerOrderStatus, PlaceOrderRequest, Product};
use swingshort_common::{Px, Qty, Side, Symbol};
use swingshort_filter::{CurrentBest, DynamicCandidate};
use tracing::{error, info, warn};

/// Emitted for every state transition, for the Coordinator to journal under
/// the tagged markers in §4.7.
#[derive(Debug, Clone)]
pub enum OrderEvent {
    EntryPlaced { symbol: Symbol, order_id: OrderId, limit_price: Px },
    EntryModified { symbol: Symbol, order_id: OrderId, limit_price: Px },
    EntryCancelled { symbol: Symbol, order_id: OrderId },
    EntryRejected { symbol: Symbol, reason: String },
    Filled { symbol: Symbol, qty: Qty, price: Px },
    ExitArmed { symbol: Symbol, order_id: OrderId, trigger: Px, limit: Px },
    ExitArmFailed { symbol: Symbol, reason: String },
    PositionClosed { symbol: Symbol, exit_price: Px, r_multiple: f64 },
}

pub struct OrderManager {
    cfg: swingshort_common::config::OrderConfig,
    pending: FxHashMap<Side, PendingEntry>,
    positions: FxHashMap<Symbol, Position>,
    r_value: f64,
}

impl OrderManager {
    #[must_use]
    pub fn new(cfg: swingshort_common::config::OrderConfig, r_value: f64) -> Self {
        Self { cfg, pending: FxHashMap::default(), positions: FxHashMap::default(), r_value }
    }

    #[must_use]
    pub fn positions(&self) -> &FxHashMap<Symbol, Position> {
        &self.positions
    }

    #[must_use]
    pub fn pending(&self, side: Side) -> Option<&PendingEntry> {
        self.pending.get(&side)
    }

    #[must_use]
    pub fn position_count(&self) -> usize {
        self.positions.values().filter(|p| p.status != PositionStatus::Closed).count()
    }

    #[must_use]
    pub fn position_count_for(&self, side: Side) -> usize {
        self.positions.values().filter(|p| p.side == side && p.status != PositionStatus::Closed).count()
    }

    /// Runs the per-side diff table against the latest `CurrentBest`.
    pub async fn sync(&mut self, best: CurrentBest, broker: &dyn Broker) -> Vec<OrderEvent> {
        let mut events = self.sync_side(Side::Ce, best.ce, broker).await;
        events.extend(self.sync_side(Side::Pe, best.pe, broker).await);
        events
    }

    async fn sync_side(&mut self, side: Side, best: Option<DynamicCandidate>, broker: &dyn Broker) -> Vec<OrderEvent> {
        let mut events = Vec::new();
        match (self.pending.get(&side).cloned(), best) {
            (None, None) => {}
            (None, Some(candidate)) => {
                if let Some(event) = self.place_entry(side, candidate, broker).await {
                    events.push(event);
                }
            }
            (Some(current), None) => {
                if self.cancel_entry(&current, broker).await {
                    events.push(OrderEvent::EntryCancelled { symbol: current.symbol, order_id: current.order_id });
                }
                self.pending.remove(&side);
            }
            (Some(current), Some(candidate)) if current.symbol == candidate.symbol => {
                let new_limit = candidate.entry_price - self.cfg.tick_size_px();
                let delta = (new_limit.as_rupees() - current.limit_price.as_rupees()).abs();
                if delta >= self.cfg.mod_threshold {
                    match broker.modify(&current.order_id, Some(new_limit), None).await {
                        Ok(()) => {
                            events.push(OrderEvent::EntryModified { symbol: current.symbol, order_id: current.order_id.clone(), limit_price: new_limit });
                            if let Some(p) = self.pending.get_mut(&side) {
                                p.limit_price = new_limit;
                                p.exit_trigger = candidate.sl_trigger;
                            }
                        }
                        Err(e) => warn!(symbol = %current.symbol, error = %e, "[ORDER] modify failed, will retry next cycle"),
                    }
                }
            }
            (Some(current), Some(candidate)) => {
                if self.cancel_entry(&current, broker).await {
                    events.push(OrderEvent::EntryCancelled { symbol: current.symbol, order_id: current.order_id.clone() });
                }
                self.pending.remove(&side);
                if let Some(event) = self.place_entry(side, candidate, broker).await {
                    events.push(event);
                }
            }
        }
        events
    }

    async fn cancel_entry(&self, current: &PendingEntry, broker: &dyn Broker) -> bool {
        match broker.cancel(&current.order_id).await {
            Ok(()) => true,
            Err(e) => {
                // Per §4.5: if cancel errors, verify by polling before
                // clearing; here that verification happens on the next
                // `reconcile_orderbook` pass, so the slot stays as-is.
                warn!(symbol = %current.symbol, error = %e, "[ORDER] cancel failed, deferring to reconciliation");
                false
            }
        }
    }

    async fn place_entry(&mut self, side: Side, candidate: DynamicCandidate, broker: &dyn Broker) -> Option<OrderEvent> {
        let limit_price = candidate.entry_price - self.cfg.tick_size_px();
        let req = PlaceOrderRequest { symbol: candidate.symbol, side: BrokerOrderSide::Sell, kind: OrderKind::Limit, price: Some(limit_price), trigger: None, qty: candidate.quantity, product: Product::Intraday };
        match self.place_with_retry(req, broker).await {
            Ok(order_id) => {
                info!(symbol = %candidate.symbol, price = %limit_price, "[ORDER] entry placed");
                self.pending.insert(side, PendingEntry { side, symbol: candidate.symbol, order_id: order_id.clone(), limit_price, exit_trigger: candidate.sl_trigger, quantity: candidate.quantity, placed_at_ms: 0 });
                Some(OrderEvent::EntryPlaced { symbol: candidate.symbol, order_id, limit_price })
            }
            Err(e) => {
                error!(symbol = %candidate.symbol, error = %e, "[ORDER] entry placement permanently failed");
                Some(OrderEvent::EntryRejected { symbol: candidate.symbol, reason: e.to_string() })
            }
        }
    }

    /// Up to `place_retry_attempts` attempts spaced `place_retry_spacing`
    /// apart, retried only on transient broker errors.
    async fn place_with_retry(&self, req: PlaceOrderRequest, broker: &dyn Broker) -> Result<OrderId, OrdersError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match broker.place(req.clone()).await {
                Ok(id) => return Ok(id),
                Err(e) if e.is_retryable() && attempt < self.cfg.place_retry_attempts => {
                    warn!(attempt, error = %e, "[ORDER] transient place failure, retrying");
                    tokio::time::sleep(std::time::Duration::from_secs(self.cfg.place_retry_spacing_secs)).await;
                }
                Err(e) => return Err(OrdersError::from(e)),
            }
        }
    }

    /// Called when the broker reports an entry fill: creates the position
    /// and arms the protective stop in the same tick cycle (§4.5 fill
    /// handling). Idempotent on `order_id` — a second report for an order
    /// already converted into a position is ignored.
    pub async fn on_entry_filled(&mut self, side: Side, order_id: &OrderId, filled_qty: Qty, fill_price: Px, broker: &dyn Broker) -> Vec<OrderEvent> {
        let Some(pending) = self.pending.get(&side).filter(|p| &p.order_id == order_id).cloned() else {
            return Vec::new();
        };
        self.pending.remove(&side);

        let mut events = vec![OrderEvent::Filled { symbol: pending.symbol, qty: filled_qty, price: fill_price }];
        let mut position = Position { symbol: pending.symbol, side, qty: filled_qty, entry_price: fill_price, entry_ts_ms: pending.placed_at_ms, exit_trigger: pending.exit_trigger, exit_sl_order_id: None, realized_pnl: None, r_multiple: None, status: PositionStatus::Active, sl_failure_count: 0 };

        let limit = pending.exit_trigger + Px::from_rupees(self.cfg.exit_stop_buffer);
        match self.arm_protective_stop(pending.symbol, pending.exit_trigger, limit, filled_qty, broker).await {
            Ok(order_id) => {
                position.exit_sl_order_id = Some(order_id.clone());
                events.push(OrderEvent::ExitArmed { symbol: pending.symbol, order_id, trigger: pending.exit_trigger, limit });
            }
            Err(e) => {
                position.sl_failure_count = 1;
                error!(symbol = %pending.symbol, error = %e, "[ORDER] protective stop could not be armed");
                events.push(OrderEvent::ExitArmFailed { symbol: pending.symbol, reason: e.to_string() });
            }
        }
        self.positions.insert(pending.symbol, position);
        events
    }

    async fn arm_protective_stop(&self, symbol: Symbol, trigger: Px, limit: Px, qty: Qty, broker: &dyn Broker) -> Result<OrderId, OrdersError> {
        let req = PlaceOrderRequest { symbol, side: BrokerOrderSide::Buy, kind: OrderKind::StopLimit, price: Some(limit), trigger: Some(trigger), qty, product: Product::Intraday };
        self.place_with_retry(req, broker).await
    }

    /// Re-attempts arming a protective stop for a position that fell into a
    /// degraded (unarmed) state; returns `true` once `MAX_SL_FAILURE_COUNT`
    /// consecutive failures have accumulated, signalling the caller should
    /// consult `RiskGovernor` for a forced close.
    pub async fn retry_protective_stop(&mut self, symbol: Symbol, max_failures: u32, broker: &dyn Broker) -> (Vec<OrderEvent>, bool) {
        let Some(position) = self.positions.get(&symbol).cloned() else {
            return (Vec::new(), false);
        };
        if position.exit_sl_order_id.is_some() || position.status != PositionStatus::Active {
            return (Vec::new(), false);
        }
        let trigger = position.exit_trigger;
        let limit = trigger + Px::from_rupees(self.cfg.exit_stop_buffer);
        match self.arm_protective_stop(symbol, trigger, limit, position.qty, broker).await {
            Ok(order_id) => {
                if let Some(p) = self.positions.get_mut(&symbol) {
                    p.exit_sl_order_id = Some(order_id.clone());
                    p.sl_failure_count = 0;
                }
                (vec![OrderEvent::ExitArmed { symbol, order_id, trigger, limit }], false)
            }
            Err(e) => {
                let mut breached = false;
                if let Some(p) = self.positions.get_mut(&symbol) {
                    p.sl_failure_count += 1;
                    breached = p.sl_failure_count >= max_failures;
                }
                (vec![OrderEvent::ExitArmFailed { symbol, reason: e.to_string() }], breached)
            }
        }
    }

    /// Called when the broker reports the protective stop COMPLETE.
    pub fn on_exit_filled(&mut self, symbol: Symbol, exit_price: Px) -> Option<OrderEvent> {
        let position = self.positions.get_mut(&symbol)?;
        if position.status == PositionStatus::Closed {
            return None;
        }
        let r = Position::realized_r(position.entry_price, exit_price, position.qty, self.r_value);
        position.status = PositionStatus::Closed;
        position.realized_pnl = Some((position.entry_price.as_rupees() - exit_price.as_rupees()) * position.qty.as_i64() as f64);
        position.r_multiple = Some(r);
        Some(OrderEvent::PositionClosed { symbol, exit_price, r_multiple: r })
    }

    /// Session-cumulative realized R across closed positions.
    #[must_use]
    pub fn realized_r(&self) -> f64 {
        self.positions.values().filter_map(|p| p.r_multiple).sum()
    }

    /// Unrealized R for open positions, given a mark price per symbol.
    #[must_use]
    pub fn unrealized_r(&self, marks: &FxHashMap<Symbol, Px>) -> f64 {
        self.positions
            .values()
            .filter(|p| p.status == PositionStatus::Active)
            .filter_map(|p| marks.get(&p.symbol).map(|&mark| Position::realized_r(p.entry_price, mark, p.qty, self.r_value)))
            .sum()
    }

    /// Cancels every pending entry and market-covers every open position;
    /// used by `RiskGovernor` flatten-all.
    pub async fn flatten_all(&mut self, broker: &dyn Broker) -> Vec<OrderEvent> {
        let mut events = Vec::new();
        let pending: Vec<PendingEntry> = self.pending.values().cloned().collect();
        for p in pending {
            if self.cancel_entry(&p, broker).await {
                events.push(OrderEvent::EntryCancelled { symbol: p.symbol, order_id: p.order_id.clone() });
            }
        }
        self.pending.clear();

        let symbols: Vec<Symbol> = self.positions.iter().filter(|(_, p)| p.status == PositionStatus::Active).map(|(s, _)| *s).collect();
        for symbol in symbols {
            let position = self.positions.get_mut(&symbol).unwrap();
            if let Some(order_id) = position.exit_sl_order_id.take() {
                let _ = broker.cancel(&order_id).await;
            }
            position.status = PositionStatus::Closing;
            let req = PlaceOrderRequest { symbol, side: BrokerOrderSide::Buy, kind: OrderKind::Market, price: None, trigger: None, qty: position.qty, product: Product::Intraday };
            match broker.place(req).await {
                Ok(order_id) => {
                    info!(symbol = %symbol, order_id, "[RISK] market cover submitted");
                }
                Err(e) => error!(symbol = %symbol, error = %e, "[RISK] market cover failed"),
            }
        }
        events
    }

    /// Polls the broker's order book and reconciles pending entries and
    /// protective stops against it (§4.5 Reconciliation, every 5 s).
    pub async fn reconcile_orderbook(&mut self, broker: &dyn Broker) -> Result<Vec<OrderEvent>, OrdersError> {
        let book = broker.orderbook().await?;
        let by_id: FxHashMap<&OrderId, &swingshort_broker::BrokerOrder> = book.iter().map(|o| (&o.order_id, o)).collect();
        let mut events = Vec::new();

        for side in [Side::Ce, Side::Pe] {
            let Some(pending) = self.pending.get(&side).cloned() else { continue };
            match by_id.get(&pending.order_id) {
                Some(order) if order.status == BrokerOrderStatus::Complete => {
                    let price = order.avg_price.unwrap_or(pending.limit_price);
                    events.extend(self.on_entry_filled(side, &pending.order_id, order.filled_qty, price, broker).await);
                }
                Some(order) if matches!(order.status, BrokerOrderStatus::Rejected | BrokerOrderStatus::Cancelled) => {
                    self.pending.remove(&side);
                    events.push(OrderEvent::EntryCancelled { symbol: pending.symbol, order_id: pending.order_id });
                }
                Some(_) => {}
                None => {
                    warn!(symbol = %pending.symbol, "[RECONCILE] pending entry missing from broker order book, treating as cancelled");
                    self.pending.remove(&side);
                }
            }
        }

        let active_symbols: Vec<Symbol> = self.positions.iter().filter(|(_, p)| p.status == PositionStatus::Active).map(|(s, _)| *s).collect();
        for symbol in active_symbols {
            let order_id = self.positions.get(&symbol).and_then(|p| p.exit_sl_order_id.clone());
            let Some(order_id) = order_id else { continue };
            match by_id.get(&order_id) {
                Some(order) if order.status == BrokerOrderStatus::Complete => {
                    let exit_price = order.avg_price.unwrap_or_default();
                    if let Some(event) = self.on_exit_filled(symbol, exit_price) {
                        events.push(event);
                    }
                }
                Some(_) => {}
                None => {
                    warn!(symbol = %symbol, "[RECONCILE] protective stop missing from broker order book, re-arming");
                    if let Some(p) = self.positions.get_mut(&symbol) {
                        p.exit_sl_order_id = None;
                    }
                    let Some(position) = self.positions.get(&symbol).cloned() else { continue };
                    let limit = position.exit_trigger + Px::from_rupees(self.cfg.exit_stop_buffer);
                    match self.arm_protective_stop(symbol, position.exit_trigger, limit, position.qty, broker).await {
                        Ok(new_order_id) => {
                            if let Some(p) = self.positions.get_mut(&symbol) {
                                p.exit_sl_order_id = Some(new_order_id.clone());
                                p.sl_failure_count = 0;
                            }
                            events.push(OrderEvent::ExitArmed { symbol, order_id: new_order_id, trigger: position.exit_trigger, limit });
                        }
                        Err(e) => {
                            if let Some(p) = self.positions.get_mut(&symbol) {
                                p.sl_failure_count += 1;
                            }
                            error!(symbol = %symbol, error = %e, "[RECONCILE] protective stop re-arm failed");
                            events.push(OrderEvent::ExitArmFailed { symbol, reason: e.to_string() });
                        }
                    }
                }
            }
        }
        Ok(events)
    }

    /// Every 60 s: the broker's position book is authoritative. A missing
    /// internal position is treated as closed; an unrecognized broker
    /// position is adopted with a synthetic protective stop.
    pub async fn reconcile_positions(&mut self, broker: &dyn Broker) -> Result<Vec<OrderEvent>, OrdersError> {
        let book = broker.positionbook().await?;
        let by_symbol: FxHashMap<Symbol, &swingshort_broker::BrokerPosition> = book.iter().map(|p| (p.symbol, p)).collect();
        let mut events = Vec::new();

        let active_symbols: Vec<Symbol> = self.positions.iter().filter(|(_, p)| p.status == PositionStatus::Active).map(|(s, _)| *s).collect();
        for symbol in active_symbols {
            if !by_symbol.contains_key(&symbol) {
                let exit_price = self.positions.get(&symbol).map(|p| p.entry_price).unwrap_or_default();
                if let Some(event) = self.on_exit_filled(symbol, exit_price) {
                    events.push(event);
                }
            }
        }

        for (&symbol, broker_position) in &by_symbol {
            if broker_position.qty >= 0 || self.positions.contains_key(&symbol) {
                continue;
            }
            let side = Side::from(symbol.option);
            let qty = Qty::new(-broker_position.qty);
            let trigger = broker_position.avg_price + Px::from_rupees(1.0);
            let limit = trigger + Px::from_rupees(self.cfg.exit_stop_buffer);
            let exit_sl_order_id = self.arm_protective_stop(symbol, trigger, limit, qty, broker).await.ok();
            if let Some(order_id) = &exit_sl_order_id {
                events.push(OrderEvent::ExitArmed { symbol, order_id: order_id.clone(), trigger, limit });
            }
            self.positions.insert(symbol, Position { symbol, side, qty, entry_price: broker_position.avg_price, entry_ts_ms: 0, exit_trigger: trigger, exit_sl_order_id, realized_pnl: None, r_multiple: None, status: PositionStatus::Active, sl_failure_count: 0 });
            warn!(symbol = %symbol, "[RECONCILE] adopted broker position absent from internal state");
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use swingshort_broker::PaperBroker;
    use swingshort_common::{config::OrderConfig, OptionType, Underlying};

    fn symbol() -> Symbol {
        Symbol::new(Underlying::Nifty, NaiveDate::from_ymd_opt(2026, 2, 6).unwrap(), 24200, OptionType::Ce)
    }

    fn candidate(sym: Symbol, entry: f64, trigger: f64) -> DynamicCandidate {
        DynamicCandidate { symbol: sym, side: Side::Ce, entry_price: Px::from_rupees(entry), sl_trigger: Px::from_rupees(trigger), sl_points: trigger - entry, sl_percent: (trigger - entry) / entry, lots: 9, quantity: Qty::new(585), actual_r: 6435.0 }
    }

    #[tokio::test]
    async fn place_then_fill_arms_protective_stop() {
        let broker = PaperBroker::new();
        let mut om = OrderManager::new(OrderConfig::default(), 6500.0);
        let best = CurrentBest { ce: Some(candidate(symbol(), 130.0, 140.0)), pe: None };
        let events = om.sync(best, &broker).await;
        assert!(matches!(events[0], OrderEvent::EntryPlaced { .. }));

        let pending = om.pending(Side::Ce).unwrap().clone();
        let filled = broker.ingest_tick(&swingshort_common::Tick { symbol: symbol(), ts_ms: 0, last_price: pending.limit_price, cum_volume: 10, source: swingshort_common::TickSource::Primary });
        assert_eq!(filled.len(), 1);

        let events = om.on_entry_filled(Side::Ce, &filled[0].order_id, filled[0].filled_qty, filled[0].avg_price.unwrap(), &broker).await;
        assert!(events.iter().any(|e| matches!(e, OrderEvent::ExitArmed { .. })));
        assert_eq!(om.position_count(), 1);
    }

    #[tokio::test]
    async fn cancel_then_place_on_symbol_change() {
        let broker = PaperBroker::new();
        let mut om = OrderManager::new(OrderConfig::default(), 6500.0);
        let sym_a = symbol();
        let sym_b = Symbol::new(Underlying::Nifty, sym_a.expiry, 24300, OptionType::Ce);

        om.sync(CurrentBest { ce: Some(candidate(sym_a, 130.0, 140.0)), pe: None }, &broker).await;
        let events = om.sync(CurrentBest { ce: Some(candidate(sym_b, 135.0, 145.0)), pe: None }, &broker).await;
        assert!(events.iter().any(|e| matches!(e, OrderEvent::EntryCancelled { .. })));
        assert!(events.iter().any(|e| matches!(e, OrderEvent::EntryPlaced { .. })));
        assert_eq!(om.pending(Side::Ce).unwrap().symbol, sym_b);
    }

    #[tokio::test]
    async fn sub_threshold_price_move_is_not_modified() {
        let broker = PaperBroker::new();
        let mut om = OrderManager::new(OrderConfig::default(), 6500.0);
        let sym = symbol();
        om.sync(CurrentBest { ce: Some(candidate(sym, 130.0, 140.0)), pe: None }, &broker).await;
        let original = om.pending(Side::Ce).unwrap().limit_price;

        let events = om.sync(CurrentBest { ce: Some(candidate(sym, 130.20, 140.20)), pe: None }, &broker).await;
        assert!(events.is_empty());
        assert_eq!(om.pending(Side::Ce).unwrap().limit_price, original);
    }
}
