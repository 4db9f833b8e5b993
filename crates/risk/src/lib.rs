//! RiskGovernor (§4.6): per-side/total position caps, session R caps, the
//! force-exit cutoff, and the consecutive-stop-arming-failure latch. Also
//! owns the `SessionSummary` accumulator, the one piece of deliberately
//! global mutable state in the decision layer (§9).

use chrono::NaiveTime;
use swingshort_common::{config::RiskConfig, Side};
use tracing::{error, warn};

/// What the caller should do in response to a risk check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskAction {
    None,
    FlattenAll,
}

/// Why the session halt latch tripped, kept for the end-of-session summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    DailyTarget,
    DailyStop,
    ForceExitTime,
    StopArmingFailures,
    FeedLoss,
    Manual,
}

impl std::fmt::Display for HaltReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::DailyTarget => "daily target R reached",
            Self::DailyStop => "daily stop R reached",
            Self::ForceExitTime => "force-exit time reached",
            Self::StopArmingFailures => "consecutive protective-stop arming failures",
            Self::FeedLoss => "both feed sources stale",
            Self::Manual => "manual halt",
        };
        f.write_str(s)
    }
}

/// Tallied once per session and journaled/notified at shutdown.
#[derive(Debug, Clone, Default)]
pub struct SessionSummary {
    pub trades_taken: u32,
    pub wins: u32,
    pub losses: u32,
    pub realized_r: f64,
    pub halt_reason: Option<HaltReason>,
}

impl SessionSummary {
    pub fn record_trade_closed(&mut self, r_multiple: f64) {
        self.trades_taken += 1;
        self.realized_r += r_multiple;
        if r_multiple > 0.0 {
            self.wins += 1;
        } else {
            self.losses += 1;
        }
    }
}

pub struct RiskGovernor {
    cfg: RiskConfig,
    halted: bool,
    summary: SessionSummary,
}

impl RiskGovernor {
    #[must_use]
    pub fn new(cfg: RiskConfig) -> Self {
        Self { cfg, halted: false, summary: SessionSummary::default() }
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    #[must_use]
    pub fn summary(&self) -> &SessionSummary {
        &self.summary
    }

    pub fn record_trade_closed(&mut self, r_multiple: f64) {
        self.summary.record_trade_closed(r_multiple);
    }

    /// Whether a new entry on `side` is admissible given current position
    /// counts. Does not itself track positions — the caller (OrderManager)
    /// supplies the current counts so this crate stays free of a position
    /// map of its own.
    #[must_use]
    pub fn permits_new_entry(&self, side: Side, total_open: usize, side_open: usize) -> bool {
        if self.halted {
            return false;
        }
        if total_open >= self.cfg.max_positions {
            return false;
        }
        let side_cap = match side {
            Side::Ce => self.cfg.max_ce_positions,
            Side::Pe => self.cfg.max_pe_positions,
        };
        side_open < side_cap
    }

    /// Checks cumulative realized + unrealized R against the daily caps.
    pub fn check_session_r(&mut self, cumulative_r: f64) -> RiskAction {
        if self.halted {
            return RiskAction::None;
        }
        if cumulative_r >= self.cfg.daily_target_r {
            self.halt(HaltReason::DailyTarget);
            RiskAction::FlattenAll
        } else if cumulative_r <= self.cfg.daily_stop_r {
            self.halt(HaltReason::DailyStop);
            RiskAction::FlattenAll
        } else {
            RiskAction::None
        }
    }

    /// Unconditionally halts and flattens once the session clock passes the
    /// cutoff, regardless of any prior halt state.
    pub fn check_force_exit(&mut self, session_local_time: NaiveTime) -> RiskAction {
        if session_local_time >= self.cfg.force_exit_time() {
            self.halt(HaltReason::ForceExitTime);
            RiskAction::FlattenAll
        } else {
            RiskAction::None
        }
    }

    /// Called once a position's consecutive protective-stop arming failures
    /// reach `MAX_SL_FAILURE_COUNT`.
    pub fn record_stop_arming_breach(&mut self) -> RiskAction {
        error!("[RISK] consecutive protective-stop arming failures reached limit, halting");
        self.halt(HaltReason::StopArmingFailures);
        RiskAction::FlattenAll
    }

    /// Halts for a reason the caller has already detected (e.g. the data
    /// watchdog observing both feed sources stale past their timeout).
    pub fn force_halt(&mut self, reason: HaltReason) -> RiskAction {
        self.halt(reason);
        RiskAction::FlattenAll
    }

    fn halt(&mut self, reason: HaltReason) {
        if !self.halted {
            warn!(reason = %reason, "[RISK] session halt latch engaged");
        }
        self.halted = true;
        self.summary.halt_reason.get_or_insert(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_reject_beyond_limits() {
        let gov = RiskGovernor::new(RiskConfig::default());
        assert!(gov.permits_new_entry(Side::Ce, 4, 2));
        assert!(!gov.permits_new_entry(Side::Ce, 5, 2));
        assert!(!gov.permits_new_entry(Side::Ce, 4, 3));
    }

    #[test]
    fn daily_target_halts_and_flattens() {
        let mut gov = RiskGovernor::new(RiskConfig::default());
        assert_eq!(gov.check_session_r(4.9), RiskAction::None);
        assert_eq!(gov.check_session_r(5.0), RiskAction::FlattenAll);
        assert!(gov.is_halted());
        assert!(!gov.permits_new_entry(Side::Ce, 0, 0));
    }

    #[test]
    fn daily_stop_halts_and_flattens() {
        let mut gov = RiskGovernor::new(RiskConfig::default());
        assert_eq!(gov.check_session_r(-5.0), RiskAction::FlattenAll);
        assert_eq!(gov.summary().halt_reason, Some(HaltReason::DailyStop));
    }

    #[test]
    fn force_exit_time_halts_unconditionally() {
        let mut gov = RiskGovernor::new(RiskConfig::default());
        assert_eq!(gov.check_force_exit(NaiveTime::from_hms_opt(15, 14, 59).unwrap()), RiskAction::None);
        assert_eq!(gov.check_force_exit(NaiveTime::from_hms_opt(15, 15, 0).unwrap()), RiskAction::FlattenAll);
    }

    #[test]
    fn session_summary_tracks_wins_and_losses() {
        let mut summary = SessionSummary::default();
        summary.record_trade_closed(1.2);
        summary.record_trade_closed(-0.8);
        assert_eq!(summary.trades_taken, 2);
        assert_eq!(summary.wins, 1);
        assert_eq!(summary.losses, 1);
        assert!((summary.realized_r - 0.4).abs() < 1e-9);
    }
}
