//! Order repository.
//!
//! Maps orders onto the key-value layout: each order lives at `order:<id>` and
//! the set `orders` holds the key of every live order. Creation and deletion
//! touch both in one atomic batch so the index always matches the records.
//! Listing walks the index with a cursor and resolves each page in one bulk
//! read.

use orders_storage::{StorageError, StorageService};
use orders_types::{Order, OrderId, StorageKey};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Repository operation, carried by every error for context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
	Insert,
	Get,
	Update,
	Delete,
	List,
}

impl Operation {
	pub fn as_str(&self) -> &'static str {
		match self {
			Operation::Insert => "insert",
			Operation::Get => "get",
			Operation::Update => "update",
			Operation::Delete => "delete",
			Operation::List => "list",
		}
	}

	/// Whether the operation goes through an atomic batch.
	fn is_transactional(&self) -> bool {
		matches!(self, Operation::Insert | Operation::Delete)
	}

	/// Whether a payload error means stored data could not be read back.
	fn reads_payload(&self) -> bool {
		matches!(self, Operation::Get | Operation::List)
	}
}

impl fmt::Display for Operation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Errors returned by [`OrderRepository`].
#[derive(Debug, Error)]
pub enum RepositoryError {
	#[error("{operation} {key}: order not found")]
	NotFound { operation: Operation, key: String },
	#[error("{operation} {key}: order already exists")]
	AlreadyExists { operation: Operation, key: String },
	#[error("{operation} {key}: stored order cannot be decoded: {reason}")]
	Deserialization {
		operation: Operation,
		key: String,
		reason: String,
	},
	#[error("{operation} {key}: order cannot be encoded: {reason}")]
	Serialization {
		operation: Operation,
		key: String,
		reason: String,
	},
	/// Any backend failure inside an insert or delete batch, including an
	/// unreachable backend. Nothing from the batch was applied.
	#[error("{operation} {key}: transaction failed: {source}")]
	TransactionFailed {
		operation: Operation,
		key: String,
		#[source]
		source: StorageError,
	},
	/// The backend could not be reached outside a batch.
	#[error("{operation} {key}: backend unavailable: {source}")]
	BackendUnavailable {
		operation: Operation,
		key: String,
		#[source]
		source: StorageError,
	},
	#[error("{operation} {key}: backend error: {source}")]
	Backend {
		operation: Operation,
		key: String,
		#[source]
		source: StorageError,
	},
}

impl RepositoryError {
	/// Classifies a storage failure of `operation` on `key`.
	fn from_storage(operation: Operation, key: &str, error: StorageError) -> Self {
		let key = key.to_string();
		match error {
			StorageError::NotFound(_) => RepositoryError::NotFound { operation, key },
			StorageError::AlreadyExists(_) => RepositoryError::AlreadyExists { operation, key },
			StorageError::Serialization(reason) if operation.reads_payload() => {
				RepositoryError::Deserialization {
					operation,
					key,
					reason,
				}
			},
			StorageError::Serialization(reason) => RepositoryError::Serialization {
				operation,
				key,
				reason,
			},
			source if operation.is_transactional() => RepositoryError::TransactionFailed {
				operation,
				key,
				source,
			},
			source @ StorageError::Unavailable(_) => RepositoryError::BackendUnavailable {
				operation,
				key,
				source,
			},
			source => RepositoryError::Backend {
				operation,
				key,
				source,
			},
		}
	}

	/// True when the order does not exist.
	pub fn is_not_found(&self) -> bool {
		matches!(self, RepositoryError::NotFound { .. })
	}
}

/// One page of a listing.
#[derive(Debug, Clone, Default)]
pub struct OrderPage {
	/// Orders on this page, in no particular order.
	pub orders: Vec<Order>,
	/// Cursor for the next page; `0` when the walk is complete.
	pub cursor: u64,
}

/// Persists orders and their index.
///
/// Holds no state besides the shared storage handle, so it is cheap to clone
/// and safe to use from any number of tasks.
#[derive(Clone)]
pub struct OrderRepository {
	storage: Arc<StorageService>,
}

impl OrderRepository {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}

	/// Stores a new order and indexes it. Fails with `AlreadyExists`, leaving
	/// both record and index untouched, if the id is taken.
	pub async fn insert(&self, order: &Order) -> Result<(), RepositoryError> {
		let key = order.storage_key();
		let op = Operation::Insert;

		self.storage
			.transaction()
			.insert(&key, order)
			.map_err(|e| RepositoryError::from_storage(op, &key, e))?
			.add_to_set(StorageKey::OrderIndex.as_str(), &key)
			.commit()
			.await
			.map_err(|e| RepositoryError::from_storage(op, &key, e))?;

		tracing::debug!(order_id = %order.order_id, key = %key, "Inserted order");
		Ok(())
	}

	/// Loads one order.
	pub async fn get(&self, id: OrderId) -> Result<Order, RepositoryError> {
		let key = id.storage_key();
		self.storage
			.retrieve(&key)
			.await
			.map_err(|e| RepositoryError::from_storage(Operation::Get, &key, e))
	}

	/// Overwrites an existing order. Never creates one.
	pub async fn update(&self, order: &Order) -> Result<(), RepositoryError> {
		let key = order.storage_key();
		self.storage
			.update(&key, order)
			.await
			.map_err(|e| RepositoryError::from_storage(Operation::Update, &key, e))?;

		tracing::debug!(order_id = %order.order_id, key = %key, "Updated order");
		Ok(())
	}

	/// Removes an order and its index entry. Fails with `NotFound` if absent.
	pub async fn delete(&self, id: OrderId) -> Result<(), RepositoryError> {
		let key = id.storage_key();
		let op = Operation::Delete;

		self.storage
			.transaction()
			.delete(&key)
			.remove_from_set(StorageKey::OrderIndex.as_str(), &key)
			.commit()
			.await
			.map_err(|e| RepositoryError::from_storage(op, &key, e))?;

		tracing::debug!(order_id = %id, key = %key, "Deleted order");
		Ok(())
	}

	/// Returns one page of orders starting at `cursor` (`0` to start).
	///
	/// Pages hold at most about `size` orders; the backend may return fewer
	/// or, for Redis, slightly more. The walk has no snapshot: orders created
	/// or deleted while it runs may appear zero, one or several times.
	/// Records deleted between the index scan and the read are skipped.
	pub async fn find_all(&self, cursor: u64, size: u64) -> Result<OrderPage, RepositoryError> {
		let index = StorageKey::OrderIndex.as_str();
		let op = Operation::List;

		let page = self
			.storage
			.scan(index, cursor, size)
			.await
			.map_err(|e| RepositoryError::from_storage(op, index, e))?;

		if page.members.is_empty() {
			return Ok(OrderPage {
				orders: Vec::new(),
				cursor: page.cursor,
			});
		}

		let records: Vec<Option<Order>> = self
			.storage
			.retrieve_many(&page.members)
			.await
			.map_err(|e| RepositoryError::from_storage(op, index, e))?;

		let expected = records.len();
		let orders: Vec<Order> = records.into_iter().flatten().collect();
		if orders.len() < expected {
			tracing::debug!(
				skipped = expected - orders.len(),
				"Index members without a record"
			);
		}

		Ok(OrderPage {
			orders,
			cursor: page.cursor,
		})
	}

	/// Checks that the backend answers.
	pub async fn ping(&self) -> Result<(), StorageError> {
		self.storage.ping().await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use chrono::Utc;
	use orders_storage::implementations::memory::MemoryStorage;
	use orders_storage::{StorageInterface, TransactionOp};
	use orders_types::{ConfigSchema, LineItem, ScanPage, Schema, ValidationError};
	use std::collections::HashSet;
	use uuid::Uuid;

	fn order(id: u64) -> Order {
		Order::new(
			OrderId(id),
			Uuid::new_v4(),
			vec![LineItem {
				item_id: format!("sku-{}", id),
				quantity: 1,
			}],
			Utc::now(),
		)
	}

	fn repository() -> OrderRepository {
		OrderRepository::new(Arc::new(StorageService::new(Box::new(MemoryStorage::new()))))
	}

	async fn index_members(repo: &OrderRepository) -> Vec<String> {
		repo.storage
			.scan(StorageKey::OrderIndex.as_str(), 0, 1000)
			.await
			.unwrap()
			.members
	}

	#[tokio::test]
	async fn test_insert_then_get_returns_equal_order() {
		let repo = repository();
		let original = order(7);
		repo.insert(&original).await.unwrap();

		assert_eq!(repo.get(OrderId(7)).await.unwrap(), original);
		assert_eq!(index_members(&repo).await, vec!["order:7".to_string()]);
	}

	#[tokio::test]
	async fn test_colliding_insert_leaves_store_unchanged() {
		let repo = repository();
		let first = order(7);
		repo.insert(&first).await.unwrap();

		let mut second = order(7);
		second.customer_id = Uuid::new_v4();
		let err = repo.insert(&second).await.unwrap_err();
		assert!(matches!(
			err,
			RepositoryError::AlreadyExists { operation: Operation::Insert, ref key } if key == "order:7"
		));

		assert_eq!(repo.get(OrderId(7)).await.unwrap(), first);
		assert_eq!(index_members(&repo).await.len(), 1);
	}

	#[tokio::test]
	async fn test_delete_missing_is_not_found() {
		let repo = repository();
		repo.insert(&order(1)).await.unwrap();

		let err = repo.delete(OrderId(999_999)).await.unwrap_err();
		assert!(matches!(err, RepositoryError::NotFound { operation: Operation::Delete, .. }));
		assert_eq!(index_members(&repo).await, vec!["order:1".to_string()]);
	}

	#[tokio::test]
	async fn test_delete_removes_record_and_index_entry() {
		let repo = repository();
		repo.insert(&order(1)).await.unwrap();
		repo.delete(OrderId(1)).await.unwrap();

		assert!(repo.get(OrderId(1)).await.unwrap_err().is_not_found());
		assert!(index_members(&repo).await.is_empty());
	}

	#[tokio::test]
	async fn test_update_missing_is_not_found() {
		let repo = repository();
		let err = repo.update(&order(5)).await.unwrap_err();
		assert!(matches!(err, RepositoryError::NotFound { operation: Operation::Update, .. }));
		assert!(repo.get(OrderId(5)).await.unwrap_err().is_not_found());
	}

	#[tokio::test]
	async fn test_update_overwrites_record() {
		let repo = repository();
		let mut stored = order(3);
		repo.insert(&stored).await.unwrap();

		stored.shipped_at = Some(Utc::now());
		repo.update(&stored).await.unwrap();
		assert_eq!(repo.get(OrderId(3)).await.unwrap(), stored);
	}

	async fn walk(repo: &OrderRepository, size: u64) -> (Vec<Order>, usize) {
		let mut seen = Vec::new();
		let mut cursor = 0;
		let mut pages = 0;
		loop {
			let page = repo.find_all(cursor, size).await.unwrap();
			pages += 1;
			seen.extend(page.orders);
			cursor = page.cursor;
			if cursor == 0 {
				break;
			}
		}
		(seen, pages)
	}

	#[tokio::test]
	async fn test_pagination_visits_every_order_once() {
		let size = 4;
		for n in [0u64, 1, size, 2 * size + 1] {
			let repo = repository();
			for id in 1..=n {
				repo.insert(&order(id)).await.unwrap();
			}

			let (seen, _) = walk(&repo, size).await;
			let ids: HashSet<u64> = seen.iter().map(|o| o.order_id.0).collect();
			assert_eq!(seen.len() as u64, n, "n = {}", n);
			assert_eq!(ids.len() as u64, n, "n = {}", n);
		}
	}

	#[tokio::test]
	async fn test_deleting_a_listed_order_keeps_later_pages_whole() {
		let repo = repository();
		for id in 1..=10 {
			repo.insert(&order(id)).await.unwrap();
		}

		let first = repo.find_all(0, 3).await.unwrap();
		assert_eq!(first.orders.len(), 3);
		assert_ne!(first.cursor, 0);
		let deleted = first.orders[0].order_id;
		repo.delete(deleted).await.unwrap();

		let mut ids: HashSet<u64> = first.orders.iter().map(|o| o.order_id.0).collect();
		let mut cursor = first.cursor;
		while cursor != 0 {
			let page = repo.find_all(cursor, 3).await.unwrap();
			ids.extend(page.orders.iter().map(|o| o.order_id.0));
			cursor = page.cursor;
		}
		assert_eq!(ids, (1..=10).collect::<HashSet<u64>>());
	}

	#[tokio::test]
	async fn test_empty_index_is_a_single_empty_page() {
		let repo = repository();
		let page = repo.find_all(0, 50).await.unwrap();
		assert!(page.orders.is_empty());
		assert_eq!(page.cursor, 0);
	}

	#[tokio::test]
	async fn test_listing_skips_members_without_record() {
		let backend = MemoryStorage::new();
		let stored = order(1);
		backend
			.commit(vec![
				TransactionOp::Insert {
					key: "order:1".into(),
					value: serde_json::to_vec(&stored).unwrap(),
				},
				TransactionOp::SetAdd {
					set: "orders".into(),
					member: "order:1".into(),
				},
				TransactionOp::SetAdd {
					set: "orders".into(),
					member: "order:2".into(),
				},
			])
			.await
			.unwrap();
		let repo = OrderRepository::new(Arc::new(StorageService::new(Box::new(backend))));

		let (seen, _) = walk(&repo, 50).await;
		assert_eq!(seen, vec![stored]);
	}

	#[tokio::test]
	async fn test_undecodable_record() {
		let backend = MemoryStorage::new();
		backend
			.commit(vec![
				TransactionOp::Insert {
					key: "order:9".into(),
					value: b"{not json".to_vec(),
				},
				TransactionOp::SetAdd {
					set: "orders".into(),
					member: "order:9".into(),
				},
			])
			.await
			.unwrap();
		let repo = OrderRepository::new(Arc::new(StorageService::new(Box::new(backend))));

		assert!(matches!(
			repo.get(OrderId(9)).await,
			Err(RepositoryError::Deserialization { operation: Operation::Get, .. })
		));
		assert!(matches!(
			repo.find_all(0, 10).await,
			Err(RepositoryError::Deserialization { operation: Operation::List, .. })
		));
	}

	/// Backend whose every call fails with the configured error.
	struct FailingStorage {
		unavailable: bool,
	}

	impl FailingStorage {
		fn error(&self) -> StorageError {
			if self.unavailable {
				StorageError::Unavailable("connection refused".into())
			} else {
				StorageError::Backend("script aborted".into())
			}
		}
	}

	#[async_trait]
	impl StorageInterface for FailingStorage {
		async fn get_bytes(&self, _key: &str) -> Result<Vec<u8>, StorageError> {
			Err(self.error())
		}

		async fn get_many(&self, _keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StorageError> {
			Err(self.error())
		}

		async fn replace_bytes(&self, _key: &str, _value: Vec<u8>) -> Result<(), StorageError> {
			Err(self.error())
		}

		async fn scan_set(
			&self,
			_set: &str,
			_cursor: u64,
			_count: u64,
		) -> Result<ScanPage, StorageError> {
			Err(self.error())
		}

		async fn commit(&self, _ops: Vec<TransactionOp>) -> Result<(), StorageError> {
			Err(self.error())
		}

		async fn ping(&self) -> Result<(), StorageError> {
			Err(self.error())
		}

		fn config_schema(&self) -> Box<dyn ConfigSchema> {
			struct NoConfig;
			impl ConfigSchema for NoConfig {
				fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
					Schema::new(vec![], vec![]).validate(config)
				}
			}
			Box::new(NoConfig)
		}
	}

	fn failing(unavailable: bool) -> OrderRepository {
		OrderRepository::new(Arc::new(StorageService::new(Box::new(FailingStorage {
			unavailable,
		}))))
	}

	#[tokio::test]
	async fn test_backend_failure_in_batch_is_transaction_failed() {
		let repo = failing(false);
		assert!(matches!(
			repo.insert(&order(1)).await,
			Err(RepositoryError::TransactionFailed { operation: Operation::Insert, .. })
		));
		assert!(matches!(
			repo.delete(OrderId(1)).await,
			Err(RepositoryError::TransactionFailed { operation: Operation::Delete, .. })
		));
		assert!(matches!(
			repo.get(OrderId(1)).await,
			Err(RepositoryError::Backend { operation: Operation::Get, .. })
		));
	}

	#[tokio::test]
	async fn test_unreachable_backend_is_unavailable() {
		let repo = failing(true);
		assert!(matches!(
			repo.insert(&order(1)).await,
			Err(RepositoryError::TransactionFailed {
				operation: Operation::Insert,
				source: StorageError::Unavailable(_),
				..
			})
		));
		assert!(matches!(
			repo.delete(OrderId(1)).await,
			Err(RepositoryError::TransactionFailed {
				operation: Operation::Delete,
				source: StorageError::Unavailable(_),
				..
			})
		));
		assert!(matches!(
			repo.get(OrderId(1)).await,
			Err(RepositoryError::BackendUnavailable { operation: Operation::Get, .. })
		));
		assert!(matches!(
			repo.find_all(0, 10).await,
			Err(RepositoryError::BackendUnavailable { operation: Operation::List, .. })
		));
		assert!(repo.ping().await.is_err());
	}
}
