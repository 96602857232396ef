//! Main entry point for the orders service.
//!
//! Loads configuration, builds the storage backend it names, checks the
//! backend is reachable and serves the orders HTTP API until interrupted.

use clap::Parser;
use orders_config::Config;
use orders_core::{OrderService, OrdersBuilder};
use std::path::PathBuf;

mod apis;
mod server;

use orders_storage::implementations::memory::create_storage as create_memory_storage;
use orders_storage::implementations::redis::create_storage as create_redis_storage;

/// Command-line arguments for the orders service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml", env = "ORDERS_CONFIG")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	let config_path = args
		.config
		.to_str()
		.ok_or("Configuration path is not valid UTF-8")?;
	let config = Config::from_file(config_path).await?;
	tracing::info!("Loaded configuration [{}]", config.service.id);

	let service = build_service(config.clone())?;

	// Fail fast when the backend cannot be reached.
	if let Err(e) = service.health().await {
		tracing::error!(
			implementation = %config.storage.primary,
			error = %e,
			"Storage backend is not reachable"
		);
		return Err(e.into());
	}
	tracing::info!(implementation = %config.storage.primary, "Storage backend reachable");

	if config.api.enabled {
		server::start_server(config.api.clone(), service).await?;
	} else {
		tracing::warn!("API server disabled in configuration, nothing to serve");
	}

	tracing::info!("Stopped orders service");
	Ok(())
}

/// Macro to create a factory HashMap with the appropriate type aliases
macro_rules! create_factory_map {
    ($interface:path, $error:path, $( $name:literal => $factory:expr ),* $(,)?) => {{
        let mut factories = std::collections::HashMap::new();
        $(
            factories.insert(
                $name.to_string(),
                $factory as fn(&toml::Value) -> Result<Box<dyn $interface>, $error>
            );
        )*
        factories
    }};
}

/// Wires the configured storage backend into an [`OrderService`].
fn build_service(config: Config) -> Result<OrderService, Box<dyn std::error::Error>> {
	let storage_factories = create_factory_map!(
		orders_storage::StorageInterface,
		orders_storage::StorageError,
		"memory" => create_memory_storage,
		"redis" => create_redis_storage,
	);

	Ok(OrdersBuilder::new(config).build(&storage_factories)?)
}
