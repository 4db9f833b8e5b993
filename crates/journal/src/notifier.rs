//! The alert channel (§7 "distinct alert channel message"), pluggable the
//! same way the journal is: a `ChannelNotifier` an operator surface can
//! drain, and a `NullNotifier` for tests/dry runs.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use swingshort_common::ErrorKind;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct Alert {
    pub kind: ErrorKind,
    pub message: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: Alert);
}

/// Per-kind last-sent guard (§7: "throttled per error kind: startup 1/hour,
/// websocket/broker 30-60 min"). Owned by whichever collaborator raises the
/// alert; this is the shared mechanics both `RiskGovernor` and
/// `FeedSupervisor` would otherwise have to duplicate.
pub struct Throttle {
    min_interval: Duration,
    last_sent: Mutex<FxHashMap<ErrorKind, Instant>>,
}

impl Throttle {
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval, last_sent: Mutex::new(FxHashMap::default()) }
    }

    /// Returns `true` if an alert of this kind should actually be sent now.
    pub fn allow(&self, kind: ErrorKind, now: Instant) -> bool {
        let mut guard = self.last_sent.lock();
        match guard.get(&kind) {
            Some(&last) if now.duration_since(last) < self.min_interval => false,
            _ => {
                guard.insert(kind, now);
                true
            }
        }
    }
}

pub struct ChannelNotifier {
    tx: mpsc::Sender<Alert>,
}

impl ChannelNotifier {
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Alert>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn notify(&self, alert: Alert) {
        if self.tx.send(alert).await.is_err() {
            tracing::warn!("alert channel closed, dropping notification");
        }
    }
}

#[derive(Default)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _alert: Alert) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_suppresses_within_window() {
        let throttle = Throttle::new(Duration::from_secs(3600));
        let t0 = Instant::now();
        assert!(throttle.allow(ErrorKind::FeedStale, t0));
        assert!(!throttle.allow(ErrorKind::FeedStale, t0 + Duration::from_secs(60)));
        assert!(throttle.allow(ErrorKind::FeedStale, t0 + Duration::from_secs(3601)));
    }

    #[test]
    fn throttle_is_independent_per_kind() {
        let throttle = Throttle::new(Duration::from_secs(3600));
        let t0 = Instant::now();
        assert!(throttle.allow(ErrorKind::FeedStale, t0));
        assert!(throttle.allow(ErrorKind::BrokerTransient, t0));
    }
}
