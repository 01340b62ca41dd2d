use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Installs the stderr subscriber. `RUST_LOG` overrides the verbosity mapping.
pub fn init_logging(verbosity: u8) {
	// 0 = warnings, plus tabmux lifecycle at info
	// 1 (-v) = info everywhere, websocket internals at warn
	// 2+ (-vv) = debug for everything
	let filter = filter_for(verbosity);

	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

	let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(stderr)
		.with_target(true)
		.with_level(true)
		.compact()
		.init();
}

fn filter_for(verbosity: u8) -> &'static str {
	match verbosity {
		0 => "warn,tabmux=info",
		1 => "info,tungstenite=warn,tokio_tungstenite=warn",
		_ => "debug",
	}
}
