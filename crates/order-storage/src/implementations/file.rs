//! File-based storage backend.
//!
//! Each key is stored as one JSON file under a base directory. A batch is
//! staged into uniquely named temporary files and recorded in a journal, which
//! is moved into place with a single rename. Only then are the staged files
//! renamed over their keys. A journal left behind by an interrupted batch is
//! replayed by the next writer that takes the directory lock, so a batch lands
//! completely or not at all.
//!
//! The directory lock is an exclusive advisory lock on `.lock`, shared by
//! every process that opens the same directory.

use crate::{BackendLock, StorageError, StorageFactory, StorageInterface, StorageRegistry};
use async_trait::async_trait;
use fs2::FileExt;
use order_types::{ConfigSchema, Field, FieldType, ImplementationRegistry, Schema, ValidationError};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use uuid::Uuid;

/// Default directory used when `storage_path` is not configured.
const DEFAULT_STORAGE_PATH: &str = "./data/orders";
/// Lock file serializing writers across processes.
const LOCK_FILE: &str = ".lock";
/// Renames still owed by the batch being applied.
const JOURNAL_FILE: &str = "batch.journal";
/// Suffix of staged files not yet moved into place.
const STAGED_SUFFIX: &str = ".tmp";

/// Renames completing one batch, as file names within the base directory.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Journal {
	renames: Vec<(String, String)>,
}

/// Exclusive lock on the directory's lock file, released on drop.
struct DirectoryLock(std::fs::File);

impl Drop for DirectoryLock {
	fn drop(&mut self) {
		if let Err(e) = FileExt::unlock(&self.0) {
			tracing::warn!("Failed to release storage lock: {}", e);
		}
	}
}

fn backend_error(e: impl std::fmt::Display) -> StorageError {
	StorageError::Backend(e.to_string())
}

/// File-based storage implementation.
pub struct FileStorage {
	/// Base directory path for storing files.
	base_path: PathBuf,
}

impl FileStorage {
	/// Creates a new FileStorage rooted at the given directory.
	pub fn new(base_path: PathBuf) -> Self {
		Self { base_path }
	}

	/// Converts a storage key to a filesystem-safe file name.
	fn file_name(key: &str) -> String {
		format!("{}.json", key.replace(['/', ':', '\\'], "_"))
	}

	/// Writes the value to a fresh staged file and returns its name.
	async fn stage(&self, target: &str, value: &[u8]) -> Result<String, StorageError> {
		let staged = format!("{}.{}{}", target, Uuid::new_v4().simple(), STAGED_SUFFIX);
		fs::write(self.base_path.join(&staged), value)
			.await
			.map_err(backend_error)?;
		Ok(staged)
	}

	async fn ensure_base_dir(&self) -> Result<(), StorageError> {
		fs::create_dir_all(&self.base_path)
			.await
			.map_err(backend_error)
	}

	/// Moves the journal into place. The batch counts as written from here on.
	async fn write_journal(&self, journal: &Journal) -> Result<(), StorageError> {
		let bytes =
			serde_json::to_vec(journal).map_err(|e| StorageError::Serialization(e.to_string()))?;
		let staged = self.stage(JOURNAL_FILE, &bytes).await?;
		fs::rename(
			self.base_path.join(&staged),
			self.base_path.join(JOURNAL_FILE),
		)
		.await
		.map_err(backend_error)
	}

	/// Performs the journaled renames, then drops the journal.
	///
	/// A staged file that is already gone was renamed by an earlier attempt.
	async fn apply(&self, journal: &Journal) -> Result<(), StorageError> {
		for (staged, target) in &journal.renames {
			match fs::rename(self.base_path.join(staged), self.base_path.join(target)).await {
				Ok(()) => {},
				Err(e) if e.kind() == ErrorKind::NotFound => {
					tracing::debug!(file = %target, "Journal entry already applied");
				},
				Err(e) => return Err(backend_error(e)),
			}
		}
		fs::remove_file(self.base_path.join(JOURNAL_FILE))
			.await
			.map_err(backend_error)
	}

	/// Removes staged files of a batch that never reached its journal.
	async fn discard(&self, journal: &Journal) {
		for (staged, _) in &journal.renames {
			if let Err(e) = fs::remove_file(self.base_path.join(staged)).await {
				tracing::warn!("Failed to remove staged file {}: {}", staged, e);
			}
		}
	}

	/// Completes a journaled batch left by an interrupted writer and deletes
	/// staged files of batches that were interrupted before their journal.
	///
	/// Only called with the directory lock held.
	async fn recover(&self) -> Result<(), StorageError> {
		match fs::read(self.base_path.join(JOURNAL_FILE)).await {
			Ok(bytes) => {
				let journal: Journal = serde_json::from_slice(&bytes)
					.map_err(|e| StorageError::Serialization(e.to_string()))?;
				tracing::warn!(
					entries = journal.renames.len(),
					"Replaying interrupted storage batch"
				);
				self.apply(&journal).await?;
			},
			Err(e) if e.kind() == ErrorKind::NotFound => {},
			Err(e) => return Err(backend_error(e)),
		}

		let mut entries = fs::read_dir(&self.base_path)
			.await
			.map_err(backend_error)?;
		while let Some(entry) = entries.next_entry().await.map_err(backend_error)? {
			if entry.file_name().to_string_lossy().ends_with(STAGED_SUFFIX) {
				tracing::debug!(file = ?entry.file_name(), "Removing abandoned staged file");
				fs::remove_file(entry.path()).await.map_err(backend_error)?;
			}
		}
		Ok(())
	}
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let path = self.base_path.join(Self::file_name(key));

		match fs::read(&path).await {
			Ok(data) => Ok(data),
			Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound),
			Err(e) => Err(backend_error(e)),
		}
	}

	async fn write_batch(&self, entries: Vec<(String, Vec<u8>)>) -> Result<(), StorageError> {
		self.ensure_base_dir().await?;

		let mut journal = Journal::default();
		for (key, value) in &entries {
			let target = Self::file_name(key);
			match self.stage(&target, value).await {
				Ok(staged) => journal.renames.push((staged, target)),
				Err(e) => {
					self.discard(&journal).await;
					return Err(e);
				},
			}
		}

		if let Err(e) = self.write_journal(&journal).await {
			self.discard(&journal).await;
			return Err(e);
		}
		self.apply(&journal).await
	}

	async fn lock(&self) -> Result<Option<BackendLock>, StorageError> {
		self.ensure_base_dir().await?;

		let path = self.base_path.join(LOCK_FILE);
		let file = tokio::task::spawn_blocking(move || {
			let file = std::fs::OpenOptions::new()
				.read(true)
				.write(true)
				.create(true)
				.truncate(false)
				.open(&path)?;
			file.lock_exclusive()?;
			Ok::<_, std::io::Error>(file)
		})
		.await
		.map_err(backend_error)?
		.map_err(backend_error)?;
		let guard = DirectoryLock(file);

		self.recover().await?;
		Ok(Some(BackendLock::new(guard)))
	}
}

/// Configuration schema for FileStorage.
pub struct FileStorageSchema;

impl ConfigSchema for FileStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(vec![], vec![Field::new("storage_path", FieldType::String)]).validate(config)
	}
}

/// Factory function to create a file storage backend from configuration.
///
/// Configuration parameters:
/// - `storage_path`: Base directory for order files (default: "./data/orders")
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	FileStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;

	let storage_path = config
		.get("storage_path")
		.and_then(|v| v.as_str())
		.unwrap_or(DEFAULT_STORAGE_PATH);

	Ok(Box::new(FileStorage::new(PathBuf::from(storage_path))))
}

/// Registry for the file storage implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "file";
	type Factory = StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl StorageRegistry for Registry {}
