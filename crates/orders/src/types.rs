//! `PendingEntry` and `Position`, per §3's data model.

use swingshort_broker::OrderId;
use swingshort_common::{Px, Qty, Side, Symbol};

/// At most one per side; destroyed on fill, cancel, or rejection.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub side: Side,
    pub symbol: Symbol,
    pub order_id: OrderId,
    pub limit_price: Px,
    /// The trigger the entry decision computed for the protective stop that
    /// will be armed on fill (`highest_high_since_swing + 1`); carried here
    /// so fill handling does not need a second live-high lookup.
    pub exit_trigger: Px,
    pub quantity: Qty,
    pub placed_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionStatus {
    Active,
    Closing,
    Closed,
}

#[derive(Debug, Clone)]
pub struct Position {
    pub symbol: Symbol,
    pub side: Side,
    pub qty: Qty,
    pub entry_price: Px,
    pub entry_ts_ms: i64,
    /// The trigger the protective stop was (or should be) armed at —
    /// carried from `PendingEntry::exit_trigger` at fill so a re-arm after
    /// an arming failure uses the same post-swing-high level, not a level
    /// rebuilt off `entry_price`.
    pub exit_trigger: Px,
    pub exit_sl_order_id: Option<OrderId>,
    pub realized_pnl: Option<f64>,
    pub r_multiple: Option<f64>,
    pub status: PositionStatus,
    /// Consecutive failures to (re-)arm the protective stop; feeds
    /// `MAX_SL_FAILURE_COUNT`.
    pub sl_failure_count: u32,
}

impl Position {
    /// Per-position R at close: `(entry − exit) × qty / r_value`, positive
    /// when the short profited (exit below entry).
    #[must_use]
    pub fn realized_r(entry: Px, exit: Px, qty: Qty, r_value: f64) -> f64 {
        (entry.as_rupees() - exit.as_rupees()) * qty.as_i64() as f64 / r_value
    }
}
