
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Root CLI for tabmux.
#[derive(Parser, Debug)]
#[command(name = "tabmux")]
#[command(about = "Drive many in-browser automation sessions over one controller connection")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Connect to the controller and serve the in-host bridge until interrupted.
	Serve(ServeArgs),
	/// Print the effective configuration as JSON.
	Config(ConfigArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
	/// Config file (defaults to the user config directory).
	#[arg(long, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Controller WebSocket URL, overriding the config file.
	#[arg(long, value_name = "URL")]
	pub controller_url: Option<String>,

	/// Bridge listen address for the host and agents.
	#[arg(long, value_name = "ADDR")]
	pub listen: Option<SocketAddr>,
}

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
	/// Config file (defaults to the user config directory).
	#[arg(long, value_name = "FILE")]
	pub config: Option<PathBuf>,
}
