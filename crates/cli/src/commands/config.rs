use anyhow::{Context, Result};

use crate::cli::ConfigArgs;
use crate::settings::load_config;

/// Prints the effective config, after defaults, as pretty JSON on stdout.
pub fn run(args: ConfigArgs) -> Result<()> {
	let (config, source) = load_config(args.config.as_deref())?;
	match &source {
		Some(path) => eprintln!("# from {}", path.display()),
		None => eprintln!("# built-in defaults"),
	}
	config.validate().context("Invalid configuration")?;

	let json = serde_json::to_string_pretty(&config).context("Failed to encode config")?;
	println!("{json}");
	Ok(())
}
