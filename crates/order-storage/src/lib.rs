//! Storage module for the order lifecycle system.
//!
//! This module provides abstractions for persistent storage of orders and their
//! status history, supporting different backend implementations such as
//! in-memory or file-based storage.

use async_trait::async_trait;
use order_types::{ImplementationRegistry, StorageKey};
use serde::{de::DeserializeOwned, Serialize};
use std::any::Any;
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod file;
	pub mod memory;
}

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	/// Error that occurs when a requested item is not found.
	#[error("Not found")]
	NotFound,
	/// Error that occurs during serialization/deserialization.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// Error that occurs in the storage backend.
	#[error("Backend error: {0}")]
	Backend(String),
	/// Error that occurs during configuration validation.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Guard for a lock shared by every user of a backend.
///
/// Dropping the guard releases the lock.
pub struct BackendLock {
	_guard: Box<dyn Any + Send + Sync>,
}

impl BackendLock {
	pub fn new(guard: impl Send + Sync + 'static) -> Self {
		Self {
			_guard: Box::new(guard),
		}
	}
}

/// Trait defining the low-level interface for storage backends.
///
/// Backends store opaque bytes under string keys. Multi-key writes go through
/// [`StorageInterface::write_batch`] so a unit of work lands together.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Retrieves raw bytes for the given key.
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	/// Stores several entries as one write, replacing previous values.
	async fn write_batch(&self, entries: Vec<(String, Vec<u8>)>) -> Result<(), StorageError>;

	/// Acquires the lock that serializes writers across processes.
	///
	/// Backends only reachable from one process return `None`; callers still
	/// serialize their own writers.
	async fn lock(&self) -> Result<Option<BackendLock>, StorageError> {
		Ok(None)
	}
}

/// Type alias for storage factory functions.
pub type StorageFactory = fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>;

/// Registry trait for storage implementations.
pub trait StorageRegistry: ImplementationRegistry<Factory = StorageFactory> {}

/// Get all registered storage implementations.
///
/// Returns a vector of (name, factory) tuples for all available storage implementations.
pub fn get_all_implementations() -> Vec<(&'static str, StorageFactory)> {
	use implementations::{file, memory};

	vec![
		(file::Registry::NAME, file::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
	]
}

fn storage_key(namespace: StorageKey, id: &str) -> String {
	format!("{}:{}", namespace.as_str(), id)
}

fn encode<T: Serialize>(data: &T) -> Result<Vec<u8>, StorageError> {
	serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// A set of typed writes committed together through [`StorageService::commit`].
#[derive(Debug, Default)]
pub struct WriteBatch {
	entries: Vec<(String, Vec<u8>)>,
}

impl WriteBatch {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds a serialized value to the batch.
	pub fn put<T: Serialize>(
		&mut self,
		namespace: StorageKey,
		id: &str,
		data: &T,
	) -> Result<&mut Self, StorageError> {
		self.entries.push((storage_key(namespace, id), encode(data)?));
		Ok(self)
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

/// High-level storage service that provides typed operations.
///
/// Wraps a low-level backend and serializes values as JSON under
/// `namespace:id` keys.
pub struct StorageService {
	/// The underlying storage backend implementation.
	backend: Box<dyn StorageInterface>,
}

impl StorageService {
	/// Creates a new StorageService with the specified backend.
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	/// Retrieves and deserializes a value from storage.
	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: StorageKey,
		id: &str,
	) -> Result<T, StorageError> {
		let bytes = self.backend.get_bytes(&storage_key(namespace, id)).await?;
		serde_json::from_slice(&bytes).map_err(|e| StorageError::Serialization(e.to_string()))
	}

	/// Retrieves a value, mapping a missing key to `None`.
	pub async fn retrieve_optional<T: DeserializeOwned>(
		&self,
		namespace: StorageKey,
		id: &str,
	) -> Result<Option<T>, StorageError> {
		match self.retrieve(namespace, id).await {
			Ok(value) => Ok(Some(value)),
			Err(StorageError::NotFound) => Ok(None),
			Err(e) => Err(e),
		}
	}

	/// Acquires the backend's cross-process writer lock, if it has one.
	pub async fn lock(&self) -> Result<Option<BackendLock>, StorageError> {
		self.backend.lock().await
	}

	/// Writes every entry of the batch in one backend call.
	pub async fn commit(&self, batch: WriteBatch) -> Result<(), StorageError> {
		if batch.is_empty() {
			return Ok(());
		}
		self.backend.write_batch(batch.entries).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use implementations::memory::MemoryStorage;
	use serde::Deserialize;

	#[derive(Debug, PartialEq, Serialize, Deserialize)]
	struct Record {
		name: String,
	}

	#[tokio::test]
	async fn test_typed_round_trip() {
		let service = StorageService::new(Box::new(MemoryStorage::new()));
		let record = Record {
			name: "widget".into(),
		};

		let mut batch = WriteBatch::new();
		batch.put(StorageKey::Orders, "1", &record).unwrap();
		service.commit(batch).await.unwrap();
		let loaded: Record = service.retrieve(StorageKey::Orders, "1").await.unwrap();
		assert_eq!(loaded, record);

		let missing: Option<Record> = service
			.retrieve_optional(StorageKey::Orders, "2")
			.await
			.unwrap();
		assert!(missing.is_none());
	}

	#[tokio::test]
	async fn test_namespaces_are_isolated() {
		let service = StorageService::new(Box::new(MemoryStorage::new()));
		let mut batch = WriteBatch::new();
		batch.put(StorageKey::Orders, "1", &1u64).unwrap();
		service.commit(batch).await.unwrap();

		let other: Option<u64> = service
			.retrieve_optional(StorageKey::StatusHistory, "1")
			.await
			.unwrap();
		assert!(other.is_none());
		assert!(matches!(
			service.retrieve::<u64>(StorageKey::StatusHistory, "1").await,
			Err(StorageError::NotFound)
		));
	}

	#[tokio::test]
	async fn test_commit_batch() {
		let service = StorageService::new(Box::new(MemoryStorage::new()));
		let mut batch = WriteBatch::new();
		batch
			.put(StorageKey::Orders, "1", &"a")
			.unwrap()
			.put(StorageKey::Sequences, "orders", &1u64)
			.unwrap();
		assert!(!batch.is_empty());

		service.commit(batch).await.unwrap();
		service.commit(WriteBatch::new()).await.unwrap();

		let seq: u64 = service.retrieve(StorageKey::Sequences, "orders").await.unwrap();
		assert_eq!(seq, 1);
		let value: String = service.retrieve(StorageKey::Orders, "1").await.unwrap();
		assert_eq!(value, "a");
	}

	#[tokio::test]
	async fn test_memory_backend_has_no_shared_lock() {
		let service = StorageService::new(Box::new(MemoryStorage::new()));
		assert!(service.lock().await.unwrap().is_none());
	}
}
