//! Configuration module for the order lifecycle system.
//!
//! This module provides structures and utilities for managing service
//! configuration. Configuration is loaded from TOML, environment variables are
//! substituted with `${VAR}` or `${VAR:-default}` syntax, and the result is
//! validated before use.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Keep the message, not the echoed input
		ConfigError::Parse(err.message().to_string())
	}
}

/// Main configuration structure for the order service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Identity of this service instance.
	pub service: ServiceConfig,
	/// Storage backend selection and settings.
	pub storage: StorageConfig,
	/// Background status worker settings.
	#[serde(default)]
	pub worker: WorkerConfig,
	/// Order lifecycle rules.
	#[serde(default)]
	pub lifecycle: LifecycleConfig,
}

/// Configuration specific to the service instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
	/// Unique identifier for this instance, used in logs.
	pub id: String,
}

/// Configuration for the storage backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of storage implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
}

/// Configuration for the background status worker.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
	/// Simulated downstream latency before an order is moved to processing.
	#[serde(default = "default_processing_delay_ms")]
	pub processing_delay_ms: u64,
	/// Maximum number of events handled at the same time.
	#[serde(default = "default_max_concurrent")]
	pub max_concurrent: usize,
}

impl WorkerConfig {
	pub fn processing_delay(&self) -> Duration {
		Duration::from_millis(self.processing_delay_ms)
	}
}

impl Default for WorkerConfig {
	fn default() -> Self {
		Self {
			processing_delay_ms: default_processing_delay_ms(),
			max_concurrent: default_max_concurrent(),
		}
	}
}

fn default_processing_delay_ms() -> u64 {
	2000
}

fn default_max_concurrent() -> usize {
	100
}

/// Rules applied by the order lifecycle service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LifecycleConfig {
	/// Reject status changes that are not in the transition table.
	///
	/// Off by default: any status may follow any other, which lets operators
	/// correct orders manually.
	#[serde(default)]
	pub strict_transitions: bool,
	/// Attempts made for one write before a version conflict is reported.
	#[serde(default = "default_max_write_attempts")]
	pub max_write_attempts: u32,
	/// Page size used when a listing request does not specify one.
	#[serde(default = "default_page_size")]
	pub default_page_size: u64,
}

impl Default for LifecycleConfig {
	fn default() -> Self {
		Self {
			strict_transitions: false,
			max_write_attempts: default_max_write_attempts(),
			default_page_size: default_page_size(),
		}
	}
}

fn default_max_write_attempts() -> u32 {
	3
}

fn default_page_size() -> u64 {
	10
}

/// Resolves environment variables in a string.
///
/// Replaces ${VAR_NAME} with the value of the environment variable VAR_NAME.
/// Supports default values with ${VAR_NAME:-default_value}.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut missing = None;
	let resolved = re.replace_all(input, |caps: &regex::Captures| {
		let var_name = &caps[1];
		match (std::env::var(var_name), caps.get(2)) {
			(Ok(value), _) => value,
			(Err(_), Some(default)) => default.as_str().to_string(),
			(Err(_), None) => {
				missing.get_or_insert_with(|| var_name.to_string());
				String::new()
			},
		}
	});

	match missing {
		Some(var_name) => Err(ConfigError::Validation(format!(
			"Environment variable '{}' not found",
			var_name
		))),
		None => Ok(resolved.into_owned()),
	}
}

impl Config {
	/// Loads configuration from a TOML file.
	pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let content = tokio::fs::read_to_string(path.as_ref()).await?;
		content.parse()
	}

	/// Validates the configuration to ensure all required fields are properly set.
	fn validate(&self) -> Result<(), ConfigError> {
		if self.service.id.is_empty() {
			return Err(ConfigError::Validation("Service ID cannot be empty".into()));
		}

		if self.storage.implementations.is_empty() {
			return Err(ConfigError::Validation(
				"At least one storage implementation must be configured".into(),
			));
		}
		if self.storage.primary.is_empty() {
			return Err(ConfigError::Validation(
				"Storage primary implementation cannot be empty".into(),
			));
		}
		if !self
			.storage
			.implementations
			.contains_key(&self.storage.primary)
		{
			return Err(ConfigError::Validation(format!(
				"Primary storage '{}' not found in implementations",
				self.storage.primary
			)));
		}

		if self.worker.max_concurrent == 0 {
			return Err(ConfigError::Validation(
				"Worker max_concurrent must be at least 1".into(),
			));
		}
		if self.lifecycle.max_write_attempts == 0 {
			return Err(ConfigError::Validation(
				"Lifecycle max_write_attempts must be at least 1".into(),
			));
		}
		if self.lifecycle.default_page_size == 0 {
			return Err(ConfigError::Validation(
				"Lifecycle default_page_size must be at least 1".into(),
			));
		}

		Ok(())
	}

	/// In-memory configuration with no processing delay, for tests.
	#[cfg(any(test, feature = "testing"))]
	pub fn for_testing() -> Self {
		let mut implementations = HashMap::new();
		implementations.insert(
			"memory".to_string(),
			toml::Value::Table(toml::map::Map::new()),
		);
		Self {
			service: ServiceConfig {
				id: "orders-test".to_string(),
			},
			storage: StorageConfig {
				primary: "memory".to_string(),
				implementations,
			},
			worker: WorkerConfig {
				processing_delay_ms: 0,
				max_concurrent: 8,
			},
			lifecycle: LifecycleConfig::default(),
		}
	}
}

/// Parses TOML, resolving environment variables and validating the result.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}
