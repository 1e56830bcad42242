//! Request tracker configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default time a tracked request may stay pending.
pub const DEFAULT_TIMEOUT_MS: i64 = 120_000;

/// Errors raised while loading a [`TrackerConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	/// The TOML source could not be decoded.
	#[error("invalid tracker config: {0}")]
	Parse(#[from] toml::de::Error),
}

/// Settings fixed for the lifetime of a [`crate::RequestTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackerConfig {
	/// Milliseconds before a pending request is rejected.
	///
	/// Zero and negative values are kept as given and expire on the next tick.
	pub timeout_ms: i64,
}

impl Default for TrackerConfig {
	fn default() -> Self {
		Self {
			timeout_ms: DEFAULT_TIMEOUT_MS,
		}
	}
}

impl TrackerConfig {
	/// Parses a config from TOML, filling absent keys with defaults.
	///
	/// # Errors
	///
	/// Returns [`ConfigError::Parse`] for malformed TOML or unknown keys.
	pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
		Ok(toml::from_str(src)?)
	}

	/// Timer delay for this config; non-positive timeouts map to zero.
	#[must_use]
	pub fn delay(&self) -> Duration {
		Duration::from_millis(u64::try_from(self.timeout_ms).unwrap_or(0))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_when_empty() {
		let cfg = TrackerConfig::from_toml_str("").unwrap();
		assert_eq!(cfg, TrackerConfig::default());
		assert_eq!(cfg.delay(), Duration::from_secs(120));
	}

	#[test]
	fn negative_timeout_kept() {
		let cfg = TrackerConfig::from_toml_str("timeout_ms = -5").unwrap();
		assert_eq!(cfg.timeout_ms, -5);
		assert_eq!(cfg.delay(), Duration::ZERO);
	}

	#[test]
	fn unknown_key_rejected() {
		assert!(matches!(TrackerConfig::from_toml_str("timeout = 3"), Err(ConfigError::Parse(_))));
	}
}
