//! Layered configuration loading: `EngineConfig`'s literal defaults, then an
//! optional `config.toml`, then `SWINGSHORT_`-prefixed environment
//! variables, each layer only overriding the keys it sets — every nested
//! config struct derives `#[serde(default)]` so a layer naming one field
//! does not blank out its siblings.

use anyhow::Result;
use swingshort_common::EngineConfig;

/// Loads `EngineConfig` from `config.toml` (if present at `path`) overlaid
/// with `SWINGSHORT_`-prefixed environment variables (`SWINGSHORT_RISK__MAX_POSITIONS=3`).
/// Credentials never live here — those come from `.env` via `dotenvy` and
/// are read directly by the broker, never folded into this struct.
pub fn load(path: &str) -> Result<EngineConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(config::Environment::with_prefix("SWINGSHORT").separator("__"))
        .build()?;

    Ok(settings.try_deserialize().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = load("does-not-exist").unwrap();
        assert_eq!(cfg.filter.r_value, 6500.0);
        assert_eq!(cfg.risk.max_positions, 5);
    }
}
