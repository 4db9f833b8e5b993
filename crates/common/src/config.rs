//! Engine configuration: every tunable threshold the strategy needs, with
//! its literal defaults. Loaded by `swingshort-engine` through
//! a layered `config::Config` (defaults -> config.toml -> env -> CLI); this
//! struct is the shape that layering resolves into.

use std::time::Duration;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::types::Px;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Strikes on each side of the at-the-money anchor to subscribe to.
    pub strike_window: u32,

    pub anchor: AnchorConfig,
    pub feed: FeedConfig,
    pub bars: BarConfig,
    pub swing: SwingConfig,
    pub filter: FilterConfig,
    pub orders: OrderConfig,
    pub risk: RiskConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strike_window: 10,
            anchor: AnchorConfig::default(),
            feed: FeedConfig::default(),
            bars: BarConfig::default(),
            swing: SwingConfig::default(),
            filter: FilterConfig::default(),
            orders: OrderConfig::default(),
            risk: RiskConfig::default(),
        }
    }
}

/// The at-the-money anchor an `AutoDetector` resolves (or an operator passes
/// on the command line). `expiry_token` mirrors the wire format used in a
/// `Symbol`'s `DDMMMYY` segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorConfig {
    pub at_the_money_strike: u32,
    pub expiry_token: String,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self { at_the_money_strike: 24200, expiry_token: "06FEB26".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub stale_threshold_secs: u64,
    pub switchback_stable_secs: u64,
    pub stale_data_timeout_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self { stale_threshold_secs: 15, switchback_stable_secs: 10, stale_data_timeout_secs: 30 }
    }
}

impl FeedConfig {
    #[must_use]
    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_threshold_secs)
    }

    #[must_use]
    pub fn switchback_stable(&self) -> Duration {
        Duration::from_secs(self.switchback_stable_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BarConfig {
    pub min_ticks_per_bar: u32,
    pub max_retained_bars: usize,
}

impl Default for BarConfig {
    fn default() -> Self {
        Self { min_ticks_per_bar: 5, max_retained_bars: 400 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwingConfig {
    pub confirmation_threshold: u32,
}

impl Default for SwingConfig {
    fn default() -> Self {
        Self { confirmation_threshold: 2 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub min_entry_price: f64,
    pub max_entry_price: f64,
    pub min_vwap_premium: f64,
    pub min_sl_percent: f64,
    pub max_sl_percent: f64,
    pub target_sl_points: f64,
    pub r_value: f64,
    pub lot_size: i64,
    pub max_lots_per_position: i64,
    pub sl_trigger_buffer: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_entry_price: 100.0,
            max_entry_price: 300.0,
            min_vwap_premium: 0.04,
            min_sl_percent: 0.02,
            max_sl_percent: 0.10,
            target_sl_points: 10.0,
            r_value: 6500.0,
            lot_size: 65,
            max_lots_per_position: 10,
            sl_trigger_buffer: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderConfig {
    pub tick_size: f64,
    pub mod_threshold: f64,
    pub exit_stop_buffer: f64,
    pub place_retry_attempts: u32,
    pub place_retry_spacing_secs: u64,
    pub orderbook_poll_interval_secs: u64,
    pub position_reconcile_interval_secs: u64,
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self {
            tick_size: 0.05,
            mod_threshold: 1.00,
            exit_stop_buffer: 3.0,
            place_retry_attempts: 3,
            place_retry_spacing_secs: 2,
            orderbook_poll_interval_secs: 5,
            position_reconcile_interval_secs: 60,
        }
    }
}

impl OrderConfig {
    #[must_use]
    pub fn tick_size_px(&self) -> Px {
        Px::from_rupees(self.tick_size)
    }

    #[must_use]
    pub fn mod_threshold_px(&self) -> Px {
        Px::from_rupees(self.mod_threshold)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub max_positions: usize,
    pub max_ce_positions: usize,
    pub max_pe_positions: usize,
    pub daily_target_r: f64,
    pub daily_stop_r: f64,
    pub force_exit_time: String,
    pub max_sl_failure_count: u32,
    pub risk_check_interval_secs: u64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_positions: 5,
            max_ce_positions: 3,
            max_pe_positions: 3,
            daily_target_r: 5.0,
            daily_stop_r: -5.0,
            force_exit_time: "15:15:00".to_string(),
            max_sl_failure_count: 3,
            risk_check_interval_secs: 10,
        }
    }
}

impl RiskConfig {
    /// Parses `force_exit_time`, falling back to 15:15 if malformed —
    /// malformed config should not leave the session without a cutoff.
    #[must_use]
    pub fn force_exit_time(&self) -> NaiveTime {
        NaiveTime::parse_from_str(&self.force_exit_time, "%H:%M:%S")
            .unwrap_or_else(|_| NaiveTime::from_hms_opt(15, 15, 0).unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_literals() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.filter.r_value, 6500.0);
        assert_eq!(cfg.filter.lot_size, 65);
        assert_eq!(cfg.filter.max_lots_per_position, 10);
        assert_eq!(cfg.risk.max_positions, 5);
        assert_eq!(cfg.risk.force_exit_time(), NaiveTime::from_hms_opt(15, 15, 0).unwrap());
    }
}
