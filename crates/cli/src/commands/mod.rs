mod config;
mod serve;

use anyhow::Result;

use crate::cli::{Cli, Commands};

pub async fn dispatch(cli: Cli) -> Result<()> {
	match cli.command {
		Commands::Serve(args) => serve::run(args).await,
		Commands::Config(args) => config::run(args),
	}
}
