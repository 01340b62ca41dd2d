//! Effective runtime settings: config file plus command-line overrides.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tabmux_runtime::Config;
use tracing::debug;

/// Bridge listen address when neither flag nor config names one.
pub const DEFAULT_LISTEN: &str = "127.0.0.1:19989";

/// `$XDG_CONFIG_HOME/tabmux/config.json` (or the platform equivalent).
pub fn default_config_path() -> Option<PathBuf> {
	dirs::config_dir().map(|dir| dir.join("tabmux").join("config.json"))
}

/// Loads `explicit` if given (it must exist), otherwise the default path if present, otherwise
/// built-in defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<(Config, Option<PathBuf>)> {
	let path = match explicit {
		Some(path) => Some(path.to_path_buf()),
		None => default_config_path().filter(|path| path.exists()),
	};

	match path {
		Some(path) => {
			let config =
				Config::load(&path).with_context(|| format!("Failed to load config from {}", path.display()))?;
			debug!(target = "tabmux.settings", path = %path.display(), "loaded config");
			Ok((config, Some(path)))
		}
		None => Ok((Config::default(), None)),
	}
}

#[derive(Debug, Clone)]
pub struct Settings {
	pub config: Config,
	/// File the config came from, if any.
	pub source: Option<PathBuf>,
	pub listen: SocketAddr,
}

impl Settings {
	/// Loads the config, applies overrides, and validates the result.
	pub fn resolve(config: Option<&Path>, controller_url: Option<String>, listen: Option<SocketAddr>) -> Result<Self> {
		let (mut config, source) = load_config(config)?;
		if let Some(url) = controller_url {
			config.controller_url = url;
		}
		config.validate().context("Invalid configuration")?;

		let listen = match listen {
			Some(addr) => addr,
			None => DEFAULT_LISTEN
				.parse()
				.with_context(|| format!("Invalid default listen address {DEFAULT_LISTEN}"))?,
		};

		Ok(Self { config, source, listen })
	}
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use super::*;

	#[test]
	fn explicit_file_with_override() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		write!(file, r#"{{"controllerUrl":"ws://10.0.0.2:9000/ctl","provisionTimeoutMs":5000}}"#).unwrap();

		let settings = Settings::resolve(
			Some(file.path()),
			Some("wss://override.example/controller".into()),
			None,
		)
		.unwrap();
		assert_eq!(settings.config.controller_url, "wss://override.example/controller");
		assert_eq!(settings.config.provision_timeout_ms, 5_000);
		assert_eq!(settings.source.as_deref(), Some(file.path()));
		assert_eq!(settings.listen, DEFAULT_LISTEN.parse::<SocketAddr>().unwrap());
	}

	#[test]
	fn missing_explicit_file_is_an_error() {
		let dir = tempfile::tempdir().unwrap();
		let err = load_config(Some(&dir.path().join("absent.json"))).unwrap_err();
		assert!(format!("{err:#}").contains("Failed to load config"), "{err:#}");
	}

	#[test]
	fn invalid_override_is_rejected() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("config.json");
		std::fs::write(&path, "{}").unwrap();

		let err = Settings::resolve(Some(&path), Some("http://not-a-websocket".into()), None).unwrap_err();
		assert!(format!("{err:#}").contains("Invalid configuration"), "{err:#}");
	}

	#[test]
	fn listen_flag_wins() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("config.json");
		std::fs::write(&path, "{}").unwrap();

		let addr: SocketAddr = "0.0.0.0:4100".parse().unwrap();
		let settings = Settings::resolve(Some(&path), None, Some(addr)).unwrap();
		assert_eq!(settings.listen, addr);
	}
}
