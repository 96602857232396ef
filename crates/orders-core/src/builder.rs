//! Builder wiring configuration and storage factories into an [`OrderService`].

use crate::repository::OrderRepository;
use crate::service::OrderService;
use orders_config::Config;
use orders_storage::{StorageError, StorageInterface, StorageService};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur while building the service.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
}

/// Builds an [`OrderService`] from configuration and named storage factories.
pub struct OrdersBuilder {
	config: Config,
}

impl OrdersBuilder {
	pub fn new(config: Config) -> Self {
		Self { config }
	}

	/// Creates every configured storage implementation that has a factory and
	/// wires the primary one into the service.
	pub fn build<SF>(self, storage_factories: &HashMap<String, SF>) -> Result<OrderService, BuilderError>
	where
		SF: Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>,
	{
		let storage = &self.config.storage;
		let mut implementations = HashMap::new();

		for (name, config) in &storage.implementations {
			let Some(factory) = storage_factories.get(name) else {
				tracing::warn!(component = "storage", implementation = %name, "No factory registered, skipping");
				continue;
			};
			match factory(config) {
				Ok(implementation) => {
					let is_primary = &storage.primary == name;
					tracing::info!(component = "storage", implementation = %name, enabled = %is_primary, "Loaded");
					implementations.insert(name.clone(), implementation);
				},
				Err(e) => {
					tracing::error!(
						component = "storage",
						implementation = %name,
						error = %e,
						"Failed to create storage implementation"
					);
					return Err(BuilderError::Config(format!(
						"Failed to create storage implementation '{}': {}",
						name, e
					)));
				},
			}
		}

		let backend = implementations.remove(&storage.primary).ok_or_else(|| {
			BuilderError::Config(format!(
				"Primary storage '{}' failed to load or has no registered factory",
				storage.primary
			))
		})?;

		let repository = OrderRepository::new(Arc::new(StorageService::new(backend)));
		Ok(OrderService::new(
			repository,
			self.config.service.create_attempts,
		))
	}
}
