//! Order-manager error taxonomy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrdersError {
    #[error("broker rejected order for {symbol}: {reason}")]
    Rejected { symbol: String, reason: String },

    #[error("protective stop could not be armed for {symbol} after {attempts} attempts: {reason}")]
    StopArmingFailed { symbol: String, attempts: u32, reason: String },

    #[error("broker error: {0}")]
    Broker(#[from] swingshort_broker::BrokerError),
}
