//! The SwingShort decision loop: wires `BarAggregator`, `FeedSupervisor`,
//! `SwingDetectorRegistry`, `FilterEngine`, `OrderManager` and
//! `RiskGovernor` into one sequential event loop (§5).

pub mod auto_detect;
pub mod config_loader;
pub mod coordinator;

pub use coordinator::{Coordinator, LoopEvent, TimerKind};
