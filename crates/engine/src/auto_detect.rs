//! Strike-anchor resolution at startup (§6 operator surface): either the
//! operator names the at-the-money strike and expiry directly, or `--auto`
//! asks an `AutoDetector` to resolve them.

use async_trait::async_trait;
use swingshort_common::config::AnchorConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AutoDetectError {
    #[error("auto-detection source unavailable: {0}")]
    Unavailable(String),
}

/// The resolved strike anchor a session starts from.
#[derive(Debug, Clone, Copy)]
pub struct AnchorPoint {
    pub at_the_money_strike: u32,
}

#[async_trait]
pub trait AutoDetector: Send + Sync {
    async fn detect(&self) -> Result<AnchorPoint, AutoDetectError>;
}

/// Resolves the anchor from the already-loaded config — the operator (or a
/// deployment script) has written `at_the_money_strike` there ahead of
/// time. Real spot-price-driven ATM detection is out of scope; this is the
/// seam a future detector backed by a live quote would replace.
pub struct StubAutoDetector {
    cfg: AnchorConfig,
}

impl StubAutoDetector {
    #[must_use]
    pub fn new(cfg: AnchorConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait]
impl AutoDetector for StubAutoDetector {
    async fn detect(&self) -> Result<AnchorPoint, AutoDetectError> {
        Ok(AnchorPoint { at_the_money_strike: self.cfg.at_the_money_strike })
    }
}

/// An anchor the operator pinned explicitly on the command line, bypassing
/// detection entirely.
pub struct ManualAnchor {
    strike: u32,
}

impl ManualAnchor {
    #[must_use]
    pub fn new(strike: u32) -> Self {
        Self { strike }
    }
}

#[async_trait]
impl AutoDetector for ManualAnchor {
    async fn detect(&self) -> Result<AnchorPoint, AutoDetectError> {
        Ok(AnchorPoint { at_the_money_strike: self.strike })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_detector_returns_configured_strike() {
        let cfg = AnchorConfig { at_the_money_strike: 24250, expiry_token: "06FEB26".to_string() };
        let detector = StubAutoDetector::new(cfg);
        let anchor = detector.detect().await.unwrap();
        assert_eq!(anchor.at_the_money_strike, 24250);
    }

    #[tokio::test]
    async fn manual_anchor_returns_pinned_strike() {
        let detector = ManualAnchor::new(24300);
        let anchor = detector.detect().await.unwrap();
        assert_eq!(anchor.at_the_money_strike, 24300);
    }
}
