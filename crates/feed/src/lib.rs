//! FeedSupervisor: dual-source tick router with primary/backup failover
//! (§4.2).

use swingshort_common::{config::FeedConfig, Tick, TickSource};
use tracing::{info, warn};

/// A source-liveness transition the supervisor made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedEvent {
    FailedOver { from: TickSource, to: TickSource },
    SwitchedBack,
}

/// Routes ticks from two independent sources to a single downstream stream,
/// failing over from primary to backup on staleness and back once primary
/// has proven stable again.
pub struct FeedSupervisor {
    cfg: FeedConfig,
    active: TickSource,
    last_primary_tick_ms: Option<i64>,
    last_backup_tick_ms: Option<i64>,
    primary_live_since_ms: Option<i64>,
}

impl FeedSupervisor {
    #[must_use]
    pub fn new(cfg: FeedConfig) -> Self {
        Self {
            cfg,
            active: TickSource::Primary,
            last_primary_tick_ms: None,
            last_backup_tick_ms: None,
            primary_live_since_ms: None,
        }
    }

    #[must_use]
    pub fn active_source(&self) -> TickSource {
        self.active
    }

    /// Feed one tick from either source, observed at wall-clock `now_ms`.
    /// Returns the tick to forward downstream, if the source is currently
    /// active, plus any liveness transition this tick triggered.
    pub fn on_tick(&mut self, tick: Tick, now_ms: i64) -> (Option<Tick>, Option<FeedEvent>) {
        match tick.source {
            TickSource::Primary => {
                let was_stale = match self.last_primary_tick_ms {
                    None => true,
                    Some(last) => now_ms - last > self.cfg.stale_threshold().as_millis() as i64,
                };
                if was_stale {
                    self.primary_live_since_ms = Some(now_ms);
                }
                self.last_primary_tick_ms = Some(tick.ts_ms);
            }
            TickSource::Backup => {
                self.last_backup_tick_ms = Some(tick.ts_ms);
            }
        }

        let event = self.check_transitions(now_ms);
        let forwarded = (tick.source == self.active).then_some(tick);
        (forwarded, event)
    }

    /// Call periodically (independent of tick arrival) to catch staleness
    /// when a source has simply gone quiet rather than erroring.
    pub fn poll(&mut self, now_ms: i64) -> Option<FeedEvent> {
        self.check_transitions(now_ms)
    }

    fn check_transitions(&mut self, now_ms: i64) -> Option<FeedEvent> {
        match self.active {
            TickSource::Primary => {
                let stale = match self.last_primary_tick_ms {
                    None => true,
                    Some(last) => now_ms - last > self.cfg.stale_threshold().as_millis() as i64,
                };
                if stale {
                    self.active = TickSource::Backup;
                    warn!(now_ms, "[FEED] primary stale, failing over to backup");
                    Some(FeedEvent::FailedOver { from: TickSource::Primary, to: TickSource::Backup })
                } else {
                    None
                }
            }
            TickSource::Backup => {
                let stable = self.primary_live_since_ms.is_some_and(|since| {
                    now_ms - since >= self.cfg.switchback_stable().as_millis() as i64
                });
                if stable {
                    self.active = TickSource::Primary;
                    // Reset the gap-detection bookkeeping so the next tick
                    // does not look like the start of a fresh stable window.
                    self.primary_live_since_ms = None;
                    self.last_primary_tick_ms = self.last_primary_tick_ms.or(Some(now_ms));
                    info!(now_ms, "[FEED] primary stable, switching back from backup");
                    Some(FeedEvent::SwitchedBack)
                } else {
                    None
                }
            }
        }
    }

    /// True if both sources are stale beyond `stale_data_timeout_secs` —
    /// the data-watchdog's cue to halt trading (§7 "coverage < 50%").
    #[must_use]
    pub fn both_stale(&self, now_ms: i64) -> bool {
        let timeout_ms = (self.cfg.stale_data_timeout_secs * 1000) as i64;
        let primary_stale = self.last_primary_tick_ms.is_none_or(|t| now_ms - t > timeout_ms);
        let backup_stale = self.last_backup_tick_ms.is_none_or(|t| now_ms - t > timeout_ms);
        primary_stale && backup_stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use swingshort_common::{OptionType, Px, Symbol, Underlying};

    fn tick(source: TickSource, ts_ms: i64) -> Tick {
        Tick {
            symbol: Symbol::new(Underlying::Nifty, NaiveDate::from_ymd_opt(2026, 2, 6).unwrap(), 24200, OptionType::Ce),
            ts_ms,
            last_price: Px::from_rupees(130.0),
            cum_volume: 1000,
            source,
        }
    }

    #[test]
    fn scenario_6_failover_and_switchback() {
        let mut sup = FeedSupervisor::new(FeedConfig::default());
        // t=0: last primary tick.
        let (fwd, ev) = sup.on_tick(tick(TickSource::Primary, 0), 0);
        assert!(fwd.is_some());
        assert!(ev.is_none());

        // No further primary ticks; at t=16s supervisor must have switched
        // over (threshold is 15s).
        let ev = sup.poll(16_000);
        assert_eq!(ev, Some(FeedEvent::FailedOver { from: TickSource::Primary, to: TickSource::Backup }));
        assert_eq!(sup.active_source(), TickSource::Backup);

        // Backup ticks between t=16s and t=40s all forward.
        let (fwd, _) = sup.on_tick(tick(TickSource::Backup, 20_000), 20_000);
        assert!(fwd.is_some());

        // Primary resumes at t=40s.
        let (_, ev) = sup.on_tick(tick(TickSource::Primary, 40_000), 40_000);
        assert!(ev.is_none(), "must stay on backup until stable window elapses");
        assert_eq!(sup.active_source(), TickSource::Backup);

        // Still within the 10s stable window at t=45s: not yet switched back.
        let (_, ev) = sup.on_tick(tick(TickSource::Primary, 45_000), 45_000);
        assert!(ev.is_none());
        assert_eq!(sup.active_source(), TickSource::Backup);

        // Primary continuously live for >= 10s: switches back at t=51s.
        let (fwd, ev) = sup.on_tick(tick(TickSource::Primary, 51_000), 51_000);
        assert_eq!(ev, Some(FeedEvent::SwitchedBack));
        assert_eq!(sup.active_source(), TickSource::Primary);
        assert!(fwd.is_some());
    }

    #[test]
    fn non_active_source_ticks_are_monitored_but_not_forwarded() {
        let mut sup = FeedSupervisor::new(FeedConfig::default());
        let (fwd, _) = sup.on_tick(tick(TickSource::Backup, 0), 0);
        assert!(fwd.is_none());
    }

    #[test]
    fn both_stale_detected() {
        let mut sup = FeedSupervisor::new(FeedConfig::default());
        sup.on_tick(tick(TickSource::Primary, 0), 0);
        assert!(sup.both_stale(40_000));
    }
}
