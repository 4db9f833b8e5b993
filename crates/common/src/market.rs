//! Tick, bar and swing data types shared by every decision-layer crate.

use serde::{Deserialize, Serialize};

use crate::types::{Px, Qty, Symbol};

/// Which of the two redundant feeds a tick arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TickSource {
    Primary,
    Backup,
}

/// A single trade/quote update from the tick stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: Symbol,
    pub ts_ms: i64,
    pub last_price: Px,
    /// Cumulative session volume as reported by the feed; `BarAggregator`
    /// converts this to a per-bar delta.
    pub cum_volume: i64,
    pub source: TickSource,
}

/// A closed one-minute OHLCV bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: Symbol,
    pub minute_start_ts: i64,
    pub open: Px,
    pub high: Px,
    pub low: Px,
    pub close: Px,
    pub volume: i64,
    pub vwap_at_close: f64,
    pub tick_count: u32,
}

/// Call or put side, used wherever the system groups candidates/orders by
/// leg rather than by the underlying instrument kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Ce,
    Pe,
}

impl From<crate::types::OptionType> for Side {
    fn from(opt: crate::types::OptionType) -> Self {
        match opt {
            crate::types::OptionType::Ce => Self::Ce,
            crate::types::OptionType::Pe => Self::Pe,
        }
    }
}

/// Swing high or low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwingKind {
    High,
    Low,
}

/// A confirmed swing point, frozen at the bar it was confirmed on except
/// for in-place price updates (§4.3 step 4), which never touch
/// `vwap_at_formation`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Swing {
    pub symbol: Symbol,
    pub kind: SwingKind,
    pub price: Px,
    pub formed_at_bar_index: u64,
    pub vwap_at_formation: f64,
}

impl Swing {
    #[must_use]
    pub fn is_low(&self) -> bool {
        matches!(self.kind, SwingKind::Low)
    }
}

/// A short-entry fill, used to seed a `Position`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub symbol: Symbol,
    pub side: Side,
    pub qty: Qty,
    pub price: Px,
    pub ts_ms: i64,
}
