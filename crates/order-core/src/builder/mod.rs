//! Builder pattern for constructing the order system.
//!
//! Composes an [`OrderSystem`] from configuration and named storage factories,
//! so the binary decides which backends are available and the configuration
//! decides which one is used.

use crate::engine::{event_bus::EventBus, OrderSystem};
use crate::state::OrderStore;
use order_config::Config;
use order_storage::{StorageError, StorageInterface, StorageService};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during order system construction.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
}

/// Factory functions needed to build an [`OrderSystem`].
pub struct OrderFactories<SF> {
	pub storage_factories: HashMap<String, SF>,
}

/// Builder for constructing an OrderSystem with pluggable storage.
pub struct OrderSystemBuilder {
	config: Config,
}

impl OrderSystemBuilder {
	/// Creates a new OrderSystemBuilder with the given configuration.
	pub fn new(config: Config) -> Self {
		Self { config }
	}

	/// Builds the OrderSystem using the configured primary storage.
	pub fn build<SF>(self, factories: OrderFactories<SF>) -> Result<OrderSystem, BuilderError>
	where
		SF: Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>,
	{
		let mut storage_impls = HashMap::new();
		for (name, config) in &self.config.storage.implementations {
			match factories.storage_factories.get(name) {
				Some(factory) => match factory(config) {
					Ok(implementation) => {
						// Validation already happened in the factory
						storage_impls.insert(name.clone(), implementation);
						let is_primary = &self.config.storage.primary == name;
						tracing::info!(component = "storage", implementation = %name, enabled = %is_primary, "Loaded");
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
				},
				None => {
					tracing::warn!(component = "storage", implementation = %name, "Unknown implementation, skipping");
				},
			}
		}

		let primary_storage = &self.config.storage.primary;
		let backend = storage_impls.remove(primary_storage).ok_or_else(|| {
			BuilderError::Config(format!(
				"Primary storage '{}' failed to load or has invalid configuration",
				primary_storage
			))
		})?;

		let storage = Arc::new(StorageService::new(backend));
		let store = Arc::new(OrderStore::new(
			storage,
			self.config.lifecycle.max_write_attempts,
		));
		let event_bus = EventBus::new();

		Ok(OrderSystem::new(self.config, store, event_bus))
	}
}
