//! The append-only journal event set (§6): enough to restore decision
//! state on a warm restart.

use serde::{Deserialize, Serialize};
use swingshort_common::{Px, Qty, Symbol};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JournalEvent {
    SwingConfirmed { symbol: Symbol, kind: String, price: Px, formed_at_bar_index: u64 },
    SwingUpdated { symbol: Symbol, kind: String, price: Px },
    SwingBroken { symbol: Symbol, kind: String },
    CandidateGated { symbol: Symbol, entry_price: Px },
    CandidateDisqualified { symbol: Symbol },
    OrderPlaced { symbol: Symbol, order_id: String, limit_price: Px },
    OrderModified { symbol: Symbol, order_id: String, limit_price: Px },
    OrderCancelled { symbol: Symbol, order_id: String },
    OrderFilled { symbol: Symbol, qty: Qty, price: Px },
    PositionOpened { symbol: Symbol, qty: Qty, entry_price: Px },
    PositionClosed { symbol: Symbol, exit_price: Px, r_multiple: f64 },
    RiskHalt { reason: String },
    SessionSummary { trades_taken: u32, wins: u32, losses: u32, realized_r: f64, halt_reason: Option<String> },
}
