//! Runtime configuration.
//!
//! Stored as camelCase JSON. Every field has a default so a partial file (or none at all) is valid.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Schema version for config files.
pub const SCHEMA_VERSION: u32 = 1;

pub const DEFAULT_CONTROLLER_URL: &str = "ws://127.0.0.1:19988/controller";

/// Reconnect backoff settings for the controller connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectConfig {
	pub initial_delay_ms: u64,
	pub max_delay_ms: u64,
	/// A connection that stays up this long resets the delay to `initial_delay_ms`.
	pub stable_after_ms: u64,
}

impl Default for ReconnectConfig {
	fn default() -> Self {
		Self {
			initial_delay_ms: 1_000,
			max_delay_ms: 30_000,
			stable_after_ms: 10_000,
		}
	}
}

/// Per-target-kind settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TargetConfig {
	/// Page opened when a session must be provisioned.
	pub entry_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
	pub schema: u32,
	pub controller_url: String,
	pub reconnect: ReconnectConfig,
	/// How long a request waits for a newly provisioned session to register.
	pub provision_timeout_ms: u64,
	/// How long a dispatched call waits for the agent's reply.
	pub call_timeout_ms: u64,
	pub targets: BTreeMap<String, TargetConfig>,
}

impl Default for Config {
	fn default() -> Self {
		let mut targets = BTreeMap::new();
		targets.insert(
			"chatgpt".to_string(),
			TargetConfig {
				entry_url: "https://chatgpt.com/".to_string(),
			},
		);
		targets.insert(
			"grok".to_string(),
			TargetConfig {
				entry_url: "https://grok.com/".to_string(),
			},
		);

		Self {
			schema: SCHEMA_VERSION,
			controller_url: DEFAULT_CONTROLLER_URL.to_string(),
			reconnect: ReconnectConfig::default(),
			provision_timeout_ms: 30_000,
			call_timeout_ms: 120_000,
			targets,
		}
	}
}

impl Config {
	/// Reads a config file. Missing fields take their defaults.
	pub fn load(path: &Path) -> Result<Self> {
		let raw = std::fs::read_to_string(path)?;
		let config: Config = serde_json::from_str(&raw)?;
		Ok(config)
	}

	/// Checks URLs and delay ordering.
	pub fn validate(&self) -> Result<()> {
		let controller = url::Url::parse(&self.controller_url)
			.map_err(|e| Error::InvalidConfig(format!("controllerUrl '{}': {e}", self.controller_url)))?;
		if !matches!(controller.scheme(), "ws" | "wss") {
			return Err(Error::InvalidConfig(format!(
				"controllerUrl must use ws:// or wss://, got '{}'",
				self.controller_url
			)));
		}

		let r = &self.reconnect;
		if r.initial_delay_ms == 0 {
			return Err(Error::InvalidConfig("reconnect.initialDelayMs must be > 0".into()));
		}
		if r.initial_delay_ms > r.max_delay_ms {
			return Err(Error::InvalidConfig(format!(
				"reconnect.initialDelayMs ({}) exceeds reconnect.maxDelayMs ({})",
				r.initial_delay_ms, r.max_delay_ms
			)));
		}

		for (kind, target) in &self.targets {
			url::Url::parse(&target.entry_url)
				.map_err(|e| Error::InvalidConfig(format!("targets.{kind}.entryUrl '{}': {e}", target.entry_url)))?;
		}

		Ok(())
	}

	pub fn entry_url(&self, target_kind: &str) -> Option<&str> {
		self.targets.get(target_kind).map(|t| t.entry_url.as_str())
	}

	pub fn provision_timeout(&self) -> Duration {
		Duration::from_millis(self.provision_timeout_ms)
	}

	pub fn call_timeout(&self) -> Duration {
		Duration::from_millis(self.call_timeout_ms)
	}
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use super::*;

	#[test]
	fn defaults_validate() {
		let config = Config::default();
		config.validate().unwrap();
		assert_eq!(config.entry_url("chatgpt"), Some("https://chatgpt.com/"));
		assert_eq!(config.entry_url("unknown"), None);
		assert_eq!(config.provision_timeout(), Duration::from_secs(30));
	}

	#[test]
	fn partial_file_keeps_defaults() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		write!(
			file,
			r#"{{"controllerUrl":"wss://ctl.example/ws","reconnect":{{"maxDelayMs":8000}},"targets":{{"claude":{{"entryUrl":"https://claude.ai/new"}}}}}}"#
		)
		.unwrap();

		let config = Config::load(file.path()).unwrap();
		assert_eq!(config.controller_url, "wss://ctl.example/ws");
		assert_eq!(config.reconnect.initial_delay_ms, 1_000);
		assert_eq!(config.reconnect.max_delay_ms, 8_000);
		assert_eq!(config.call_timeout_ms, 120_000);
		assert_eq!(config.entry_url("claude"), Some("https://claude.ai/new"));
		assert_eq!(config.entry_url("chatgpt"), None);
		config.validate().unwrap();
	}

	#[test]
	fn rejects_http_controller_url() {
		let config = Config {
			controller_url: "http://127.0.0.1:19988".into(),
			..Config::default()
		};
		let err = config.validate().unwrap_err();
		assert!(err.to_string().contains("ws://"), "{err}");
	}

	#[test]
	fn rejects_inverted_delays() {
		let config = Config {
			reconnect: ReconnectConfig {
				initial_delay_ms: 5_000,
				max_delay_ms: 1_000,
				stable_after_ms: 0,
			},
			..Config::default()
		};
		assert!(config.validate().is_err());
	}

	#[test]
	fn rejects_bad_entry_url() {
		let mut config = Config::default();
		config.targets.insert(
			"broken".into(),
			TargetConfig {
				entry_url: "not a url".into(),
			},
		);
		let err = config.validate().unwrap_err();
		assert!(err.to_string().contains("targets.broken"), "{err}");
	}
}
