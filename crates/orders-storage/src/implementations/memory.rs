//! In-memory storage backend implementation.
//!
//! This module provides a memory-based implementation of the StorageInterface trait,
//! useful for testing and development scenarios where persistence is not required.

use crate::{StorageError, StorageFactory, StorageInterface, StorageRegistry, TransactionOp};
use async_trait::async_trait;
use orders_types::{ConfigSchema, ImplementationRegistry, ScanPage, Schema, ValidationError};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Members of one set, bucketed by [`member_hash`].
///
/// A scan cursor is a hash position rather than a count, so removing a member
/// never shifts the ones after it.
type MemberBuckets = BTreeMap<u64, BTreeSet<String>>;

#[derive(Debug, Default)]
struct MemoryState {
	values: HashMap<String, Vec<u8>>,
	sets: HashMap<String, MemberBuckets>,
}

/// Position of a member in its set. Stable for the life of the process.
fn member_hash(member: &str) -> u64 {
	let mut hasher = DefaultHasher::new();
	member.hash(&mut hasher);
	hasher.finish()
}

impl MemoryState {
	/// Evaluates every precondition of a batch without applying it.
	fn check(&self, ops: &[TransactionOp]) -> Result<(), StorageError> {
		let mut pending: HashMap<&str, bool> = HashMap::new();
		for op in ops {
			let key = op.key();
			let present = pending
				.get(key)
				.copied()
				.unwrap_or_else(|| self.values.contains_key(key));
			match op {
				TransactionOp::Insert { .. } => {
					if present {
						return Err(StorageError::AlreadyExists(key.to_string()));
					}
					pending.insert(key, true);
				},
				TransactionOp::Delete { .. } => {
					if !present {
						return Err(StorageError::NotFound(key.to_string()));
					}
					pending.insert(key, false);
				},
				TransactionOp::SetAdd { .. } | TransactionOp::SetRemove { .. } => {},
			}
		}
		Ok(())
	}

	fn apply(&mut self, op: TransactionOp) {
		match op {
			TransactionOp::Insert { key, value } => {
				self.values.insert(key, value);
			},
			TransactionOp::Delete { key } => {
				self.values.remove(&key);
			},
			TransactionOp::SetAdd { set, member } => {
				self.sets
					.entry(set)
					.or_default()
					.entry(member_hash(&member))
					.or_default()
					.insert(member);
			},
			TransactionOp::SetRemove { set, member } => {
				let Some(buckets) = self.sets.get_mut(&set) else {
					return;
				};
				let hash = member_hash(&member);
				if let Some(bucket) = buckets.get_mut(&hash) {
					bucket.remove(&member);
					if bucket.is_empty() {
						buckets.remove(&hash);
					}
				}
				if buckets.is_empty() {
					self.sets.remove(&set);
				}
			},
		}
	}
}

/// In-memory storage implementation.
///
/// A single lock guards records and sets together, which is what makes
/// batches atomic. Nothing survives a restart.
pub struct MemoryStorage {
	state: Arc<RwLock<MemoryState>>,
}

impl MemoryStorage {
	/// Creates a new MemoryStorage instance.
	pub fn new() -> Self {
		Self {
			state: Arc::new(RwLock::new(MemoryState::default())),
		}
	}
}

impl Default for MemoryStorage {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl StorageInterface for MemoryStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let state = self.state.read().await;
		state
			.values
			.get(key)
			.cloned()
			.ok_or_else(|| StorageError::NotFound(key.to_string()))
	}

	async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StorageError> {
		let state = self.state.read().await;
		Ok(keys.iter().map(|key| state.values.get(key).cloned()).collect())
	}

	async fn replace_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
		let mut state = self.state.write().await;
		match state.values.get_mut(key) {
			Some(slot) => {
				*slot = value;
				Ok(())
			},
			None => Err(StorageError::NotFound(key.to_string())),
		}
	}

	async fn scan_set(&self, set: &str, cursor: u64, count: u64) -> Result<ScanPage, StorageError> {
		let state = self.state.read().await;
		let Some(buckets) = state.sets.get(set) else {
			return Ok(ScanPage::default());
		};

		// Whole buckets only, so a page may run past `count` on a collision.
		let count = usize::try_from(count.max(1)).unwrap_or(usize::MAX);
		let mut members = Vec::new();
		let mut last = None;
		for (hash, bucket) in buckets.range(cursor..) {
			members.extend(bucket.iter().cloned());
			last = Some(*hash);
			if members.len() >= count {
				break;
			}
		}

		let cursor = match last.and_then(|hash| hash.checked_add(1)) {
			Some(next) if buckets.range(next..).next().is_some() => next,
			_ => 0,
		};

		Ok(ScanPage { members, cursor })
	}

	async fn commit(&self, ops: Vec<TransactionOp>) -> Result<(), StorageError> {
		let mut state = self.state.write().await;
		state.check(&ops)?;
		for op in ops {
			state.apply(op);
		}
		Ok(())
	}

	async fn ping(&self) -> Result<(), StorageError> {
		Ok(())
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MemoryStorageSchema)
	}
}

/// Configuration schema for MemoryStorage.
pub struct MemoryStorageSchema;

impl ConfigSchema for MemoryStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		// Memory storage has no configuration
		Schema::new(vec![], vec![]).validate(config)
	}
}

/// Factory function to create a memory storage backend from configuration.
///
/// Configuration parameters:
/// - None required for memory storage
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	MemoryStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;
	Ok(Box::new(MemoryStorage::new()))
}

/// Registry for the memory storage implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "memory";
	type Factory = StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl StorageRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;

	fn insert(key: &str, value: &[u8]) -> TransactionOp {
		TransactionOp::Insert {
			key: key.to_string(),
			value: value.to_vec(),
		}
	}

	fn add(set: &str, member: &str) -> TransactionOp {
		TransactionOp::SetAdd {
			set: set.to_string(),
			member: member.to_string(),
		}
	}

	#[tokio::test]
	async fn test_commit_applies_every_op() {
		let storage = MemoryStorage::new();
		storage
			.commit(vec![insert("k:1", b"one"), add("idx", "k:1")])
			.await
			.unwrap();

		assert_eq!(storage.get_bytes("k:1").await.unwrap(), b"one".to_vec());
		let page = storage.scan_set("idx", 0, 10).await.unwrap();
		assert_eq!(page.members, vec!["k:1".to_string()]);
		assert_eq!(page.cursor, 0);
	}

	#[tokio::test]
	async fn test_failed_precondition_discards_batch() {
		let storage = MemoryStorage::new();
		storage.commit(vec![insert("k:1", b"one")]).await.unwrap();

		let result = storage
			.commit(vec![add("idx", "k:2"), insert("k:2", b"two"), insert("k:1", b"again")])
			.await;
		assert!(matches!(result, Err(StorageError::AlreadyExists(k)) if k == "k:1"));

		// Nothing from the rejected batch is visible.
		assert!(matches!(storage.get_bytes("k:2").await, Err(StorageError::NotFound(_))));
		assert_eq!(storage.get_bytes("k:1").await.unwrap(), b"one".to_vec());
		assert!(storage.scan_set("idx", 0, 10).await.unwrap().members.is_empty());
	}

	#[tokio::test]
	async fn test_preconditions_follow_batch_order() {
		let storage = MemoryStorage::new();
		storage
			.commit(vec![
				insert("k:1", b"one"),
				TransactionOp::Delete { key: "k:1".into() },
				insert("k:1", b"two"),
			])
			.await
			.unwrap();
		assert_eq!(storage.get_bytes("k:1").await.unwrap(), b"two".to_vec());

		let result = storage
			.commit(vec![
				TransactionOp::Delete { key: "k:1".into() },
				TransactionOp::Delete { key: "k:1".into() },
			])
			.await;
		assert!(matches!(result, Err(StorageError::NotFound(_))));
		assert_eq!(storage.get_bytes("k:1").await.unwrap(), b"two".to_vec());
	}

	#[tokio::test]
	async fn test_replace_requires_existing_key() {
		let storage = MemoryStorage::new();
		let result = storage.replace_bytes("k:1", b"x".to_vec()).await;
		assert!(matches!(result, Err(StorageError::NotFound(_))));
		assert!(storage.get_many(&["k:1".to_string()]).await.unwrap()[0].is_none());

		storage.commit(vec![insert("k:1", b"one")]).await.unwrap();
		storage.replace_bytes("k:1", b"x".to_vec()).await.unwrap();
		assert_eq!(storage.get_bytes("k:1").await.unwrap(), b"x".to_vec());
	}

	#[tokio::test]
	async fn test_scan_walks_whole_set() {
		let storage = MemoryStorage::new();
		let ops = (0..7).map(|i| add("idx", &format!("k:{}", i))).collect();
		storage.commit(ops).await.unwrap();

		let mut seen = Vec::new();
		let mut cursor = 0;
		let mut steps = 0;
		loop {
			let page = storage.scan_set("idx", cursor, 3).await.unwrap();
			assert!(page.members.len() <= 3);
			seen.extend(page.members);
			cursor = page.cursor;
			steps += 1;
			if cursor == 0 {
				break;
			}
		}
		assert_eq!(steps, 3);
		seen.sort();
		seen.dedup();
		assert_eq!(seen.len(), 7);
	}

	fn remove(set: &str, member: &str) -> TransactionOp {
		TransactionOp::SetRemove {
			set: set.to_string(),
			member: member.to_string(),
		}
	}

	async fn walk(storage: &MemoryStorage, set: &str, mut cursor: u64, count: u64) -> Vec<String> {
		let mut seen = Vec::new();
		loop {
			let page = storage.scan_set(set, cursor, count).await.unwrap();
			seen.extend(page.members);
			cursor = page.cursor;
			if cursor == 0 {
				return seen;
			}
		}
	}

	#[tokio::test]
	async fn test_scan_survives_removal_of_returned_member() {
		let storage = MemoryStorage::new();
		let ops = (1..=10).map(|i| add("idx", &format!("k:{}", i))).collect();
		storage.commit(ops).await.unwrap();

		let first = storage.scan_set("idx", 0, 3).await.unwrap();
		assert_eq!(first.members.len(), 3);
		assert_ne!(first.cursor, 0);
		storage
			.commit(vec![remove("idx", &first.members[0])])
			.await
			.unwrap();

		let rest = walk(&storage, "idx", first.cursor, 3).await;
		let mut seen: Vec<String> = first.members.into_iter().chain(rest).collect();
		seen.sort();
		seen.dedup();
		// Every member that was never touched is still returned.
		assert_eq!(seen.len(), 10);
	}

	#[tokio::test]
	async fn test_scan_survives_removal_of_pending_member() {
		let storage = MemoryStorage::new();
		let ops = (1..=10).map(|i| add("idx", &format!("k:{}", i))).collect();
		storage.commit(ops).await.unwrap();

		let first = storage.scan_set("idx", 0, 3).await.unwrap();
		let all = walk(&storage, "idx", 0, 3).await;
		let victim = all
			.iter()
			.find(|member| !first.members.contains(member))
			.cloned()
			.unwrap();
		storage.commit(vec![remove("idx", &victim)]).await.unwrap();

		let rest = walk(&storage, "idx", first.cursor, 3).await;
		let mut seen: Vec<String> = first.members.into_iter().chain(rest).collect();
		seen.sort();
		assert_eq!(seen.len(), 9);
		assert!(!seen.contains(&victim));
	}

	#[tokio::test]
	async fn test_scan_of_missing_set_is_empty() {
		let storage = MemoryStorage::new();
		let page = storage.scan_set("idx", 0, 50).await.unwrap();
		assert!(page.members.is_empty());
		assert_eq!(page.cursor, 0);
	}

	#[tokio::test]
	async fn test_removing_last_member_drops_set() {
		let storage = MemoryStorage::new();
		storage.commit(vec![add("idx", "k:1")]).await.unwrap();
		storage.commit(vec![remove("idx", "k:1")]).await.unwrap();
		assert!(storage.state.read().await.sets.is_empty());
	}

	#[test]
	fn test_factory_rejects_non_table_config() {
		let result = create_storage(&toml::Value::Integer(3));
		assert!(matches!(result, Err(StorageError::Configuration(_))));
	}
}
