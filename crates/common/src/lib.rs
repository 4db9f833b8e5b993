//! Shared types, configuration and error taxonomy for the SwingShort engine.

pub mod config;
pub mod errors;
pub mod market;
pub mod time;
pub mod types;

pub use config::EngineConfig;
pub use errors::{CoreError, ErrorKind};
pub use market::{Bar, Side, Swing, SwingKind, Tick, TickSource};
pub use time::SessionClock;
pub use types::{OptionType, Px, Qty, Symbol, Underlying};
