//! Storage module for the orders system.
//!
//! This module provides the key-value abstraction the order repository is
//! built on: conditional single-key writes, bulk reads, a cursor-driven set
//! scan, and an atomic batch primitive that applies a group of record and set
//! mutations all-or-nothing. Backends are pluggable (in-memory, Redis).

use async_trait::async_trait;
use orders_types::{ConfigSchema, ImplementationRegistry, ScanPage};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod memory;
	pub mod redis;
}

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	/// The key does not exist (or an existence precondition failed).
	#[error("Not found: {0}")]
	NotFound(String),
	/// An insert precondition failed because the key already exists.
	#[error("Already exists: {0}")]
	AlreadyExists(String),
	/// Error that occurs during serialization/deserialization.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// The backend rejected or failed the operation.
	#[error("Backend error: {0}")]
	Backend(String),
	/// The backend could not be reached.
	#[error("Backend unavailable: {0}")]
	Unavailable(String),
	/// Error that occurs during configuration validation.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// One mutation inside an atomic batch.
///
/// Record operations carry an existence precondition. Preconditions are
/// evaluated in batch order before anything is written, so a later operation
/// sees the effect of an earlier one on the same key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionOp {
	/// Write `value` at `key`; requires the key to be absent.
	Insert { key: String, value: Vec<u8> },
	/// Remove `key`; requires the key to be present.
	Delete { key: String },
	/// Add `member` to the set stored at `set`.
	SetAdd { set: String, member: String },
	/// Remove `member` from the set stored at `set`.
	SetRemove { set: String, member: String },
}

impl TransactionOp {
	/// Key the operation targets (record key or set name).
	pub fn key(&self) -> &str {
		match self {
			TransactionOp::Insert { key, .. } | TransactionOp::Delete { key } => key,
			TransactionOp::SetAdd { set, .. } | TransactionOp::SetRemove { set, .. } => set,
		}
	}
}

/// Trait defining the low-level interface for storage backends.
///
/// All shared state lives behind this trait. Implementations must make
/// [`StorageInterface::commit`] atomic: either every operation of the batch is
/// applied or none is, and no intermediate state is observable.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Retrieves raw bytes for the given key.
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	/// Retrieves several keys in one round trip, `None` for absent keys.
	///
	/// `keys` must not be empty.
	async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StorageError>;

	/// Overwrites an existing key. Fails with `NotFound` if the key is absent.
	async fn replace_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

	/// Returns up to roughly `count` members of `set` starting at `cursor`.
	///
	/// A scan starts at cursor `0` and is finished when the returned cursor
	/// is `0` again. There is no snapshot: members added or removed while a
	/// scan is in progress may be returned zero, one or several times.
	async fn scan_set(&self, set: &str, cursor: u64, count: u64) -> Result<ScanPage, StorageError>;

	/// Applies a batch of operations atomically.
	///
	/// A failed precondition discards the whole batch and is reported as
	/// `NotFound` or `AlreadyExists` carrying the offending key.
	async fn commit(&self, ops: Vec<TransactionOp>) -> Result<(), StorageError>;

	/// Checks that the backend is reachable.
	async fn ping(&self) -> Result<(), StorageError>;

	/// Returns the configuration schema for validation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;
}

/// Type alias for storage factory functions.
pub type StorageFactory = fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>;

/// Registry trait for storage implementations.
pub trait StorageRegistry: ImplementationRegistry<Factory = StorageFactory> {}

/// Get all registered storage implementations.
///
/// Returns a vector of (name, factory) tuples for all available storage implementations.
pub fn get_all_implementations() -> Vec<(&'static str, StorageFactory)> {
	use implementations::{memory, redis};

	vec![
		(memory::Registry::NAME, memory::Registry::factory()),
		(redis::Registry::NAME, redis::Registry::factory()),
	]
}

/// High-level storage service that provides typed operations.
///
/// Wraps a backend and handles JSON encoding of values. Cloning is not
/// supported; share it behind an `Arc`.
pub struct StorageService {
	/// The underlying storage backend implementation.
	backend: Box<dyn StorageInterface>,
}

impl StorageService {
	/// Creates a new StorageService with the specified backend.
	///
	/// # Arguments
	///
	/// * `backend` - The storage implementation every call is delegated to
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	/// Retrieves and deserializes a value from storage.
	///
	/// # Arguments
	///
	/// * `key` - The full storage key, e.g. `order:42`
	///
	/// # Returns
	///
	/// * `Ok(T)` with the decoded value
	/// * `Err(StorageError::NotFound)` if the key is absent
	/// * `Err(StorageError::Serialization)` if the stored bytes do not decode as `T`
	pub async fn retrieve<T: DeserializeOwned>(&self, key: &str) -> Result<T, StorageError> {
		let bytes = self.backend.get_bytes(key).await?;
		decode(&bytes)
	}

	/// Retrieves and deserializes several values in one backend call.
	///
	/// Results line up with `keys`; absent keys yield `None`. An empty key
	/// list returns an empty result without touching the backend.
	pub async fn retrieve_many<T: DeserializeOwned>(
		&self,
		keys: &[String],
	) -> Result<Vec<Option<T>>, StorageError> {
		if keys.is_empty() {
			return Ok(Vec::new());
		}

		self.backend
			.get_many(keys)
			.await?
			.into_iter()
			.zip(keys)
			.map(|(value, key)| {
				value
					.map(|bytes| {
						decode(&bytes).map_err(|e| {
							StorageError::Serialization(format!("{}: {}", key, e))
						})
					})
					.transpose()
			})
			.collect()
	}

	/// Overwrites an existing value. Never creates a key.
	///
	/// # Arguments
	///
	/// * `key` - The key to overwrite
	/// * `data` - The new value, stored as JSON
	///
	/// # Returns
	///
	/// * `Ok(())` once the value is replaced
	/// * `Err(StorageError::NotFound)` if the key is absent; nothing is written
	pub async fn update<T: Serialize>(&self, key: &str, data: &T) -> Result<(), StorageError> {
		let bytes = encode(data)?;
		self.backend.replace_bytes(key, bytes).await
	}

	/// Runs one step of a set scan. See [`StorageInterface::scan_set`].
	///
	/// # Arguments
	///
	/// * `set` - Name of the set to walk
	/// * `cursor` - `0` to start, then the cursor of the previous page
	/// * `count` - Hint for the number of members to return
	pub async fn scan(&self, set: &str, cursor: u64, count: u64) -> Result<ScanPage, StorageError> {
		self.backend.scan_set(set, cursor, count).await
	}

	/// Starts an atomic batch against this storage.
	pub fn transaction(&self) -> Transaction<'_> {
		Transaction {
			storage: self,
			ops: Vec::new(),
		}
	}

	/// Checks that the backend is reachable.
	pub async fn ping(&self) -> Result<(), StorageError> {
		self.backend.ping().await
	}
}

/// Builder for an atomic batch of mutations.
///
/// Operations are only queued locally; nothing reaches the backend until
/// [`Transaction::commit`]. Dropping the builder discards the batch.
pub struct Transaction<'a> {
	storage: &'a StorageService,
	ops: Vec<TransactionOp>,
}

impl<'a> Transaction<'a> {
	/// Queues an insert-if-absent of a serialized value.
	///
	/// # Arguments
	///
	/// * `key` - The key to create
	/// * `data` - The value, encoded as JSON right away
	///
	/// # Errors
	///
	/// Returns `StorageError::Serialization` if `data` cannot be encoded.
	pub fn insert<T: Serialize>(mut self, key: &str, data: &T) -> Result<Self, StorageError> {
		let value = encode(data)?;
		self.ops.push(TransactionOp::Insert {
			key: key.to_string(),
			value,
		});
		Ok(self)
	}

	/// Queues a delete that requires the key to exist.
	pub fn delete(mut self, key: &str) -> Self {
		self.ops.push(TransactionOp::Delete {
			key: key.to_string(),
		});
		self
	}

	/// Queues adding `member` to `set`.
	pub fn add_to_set(mut self, set: &str, member: &str) -> Self {
		self.ops.push(TransactionOp::SetAdd {
			set: set.to_string(),
			member: member.to_string(),
		});
		self
	}

	/// Queues removing `member` from `set`.
	pub fn remove_from_set(mut self, set: &str, member: &str) -> Self {
		self.ops.push(TransactionOp::SetRemove {
			set: set.to_string(),
			member: member.to_string(),
		});
		self
	}

	/// Sends the batch to the backend for atomic application.
	pub async fn commit(self) -> Result<(), StorageError> {
		if self.ops.is_empty() {
			return Ok(());
		}
		tracing::trace!(ops = self.ops.len(), "Committing storage batch");
		self.storage.backend.commit(self.ops).await
	}
}

fn encode<T: Serialize>(data: &T) -> Result<Vec<u8>, StorageError> {
	serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
	serde_json::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
	use super::*;
	use implementations::memory::MemoryStorage;
	use serde::Deserialize;

	#[derive(Debug, PartialEq, Serialize, Deserialize)]
	struct Record {
		name: String,
		count: u32,
	}

	fn service() -> StorageService {
		StorageService::new(Box::new(MemoryStorage::new()))
	}

	#[tokio::test]
	async fn test_transaction_then_retrieve() {
		let storage = service();
		let record = Record {
			name: "a".into(),
			count: 1,
		};

		storage
			.transaction()
			.insert("rec:1", &record)
			.unwrap()
			.add_to_set("recs", "rec:1")
			.commit()
			.await
			.unwrap();

		let loaded: Record = storage.retrieve("rec:1").await.unwrap();
		assert_eq!(loaded, record);
		let page = storage.scan("recs", 0, 10).await.unwrap();
		assert_eq!(page.members, vec!["rec:1".to_string()]);
	}

	#[tokio::test]
	async fn test_update_requires_existing_key() {
		let storage = service();
		let record = Record {
			name: "a".into(),
			count: 1,
		};
		let result = storage.update("rec:missing", &record).await;
		assert!(matches!(result, Err(StorageError::NotFound(k)) if k == "rec:missing"));
		let values: Vec<Option<Record>> = storage
			.retrieve_many(&["rec:missing".to_string()])
			.await
			.unwrap();
		assert!(values[0].is_none());
	}

	#[tokio::test]
	async fn test_retrieve_many_with_gaps() {
		let storage = service();
		storage
			.transaction()
			.insert("rec:1", &Record { name: "a".into(), count: 1 })
			.unwrap()
			.commit()
			.await
			.unwrap();

		let keys = vec!["rec:1".to_string(), "rec:2".to_string()];
		let values: Vec<Option<Record>> = storage.retrieve_many(&keys).await.unwrap();
		assert_eq!(values.len(), 2);
		assert_eq!(values[0].as_ref().map(|r| r.count), Some(1));
		assert!(values[1].is_none());

		let none: Vec<Option<Record>> = storage.retrieve_many(&[]).await.unwrap();
		assert!(none.is_empty());
	}

	#[tokio::test]
	async fn test_retrieve_reports_undecodable_payload() {
		let storage = service();
		storage
			.transaction()
			.insert("rec:1", &"not a record")
			.unwrap()
			.commit()
			.await
			.unwrap();

		let result: Result<Record, _> = storage.retrieve("rec:1").await;
		assert!(matches!(result, Err(StorageError::Serialization(_))));
	}

	#[test]
	fn test_registered_implementations() {
		let names: Vec<_> = get_all_implementations()
			.into_iter()
			.map(|(name, _)| name)
			.collect();
		assert_eq!(names, vec!["memory", "redis"]);
	}
}
