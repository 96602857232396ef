//! Order service.
//!
//! Application-level operations on top of [`OrderRepository`]: identifier
//! generation for new orders and lifecycle transitions.

use crate::repository::{OrderPage, OrderRepository, RepositoryError};
use chrono::Utc;
use orders_storage::StorageError;
use orders_types::{LineItem, Order, OrderId, StatusUpdate, TransitionError};
use rand::Rng;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Source of identifiers for new orders.
pub type IdSource = Arc<dyn Fn() -> OrderId + Send + Sync>;

/// Errors returned by [`OrderService`].
#[derive(Debug, Error)]
pub enum OrderServiceError {
	#[error(transparent)]
	Repository(#[from] RepositoryError),
	#[error(transparent)]
	Transition(#[from] TransitionError),
}

/// Draws a uniformly random non-zero identifier.
pub fn random_order_id() -> OrderId {
	OrderId(rand::thread_rng().gen_range(1..=u64::MAX))
}

/// Order operations used by the HTTP layer.
#[derive(Clone)]
pub struct OrderService {
	repository: OrderRepository,
	create_attempts: u32,
	next_id: IdSource,
}

impl OrderService {
	/// Creates a service that draws random identifiers.
	pub fn new(repository: OrderRepository, create_attempts: u32) -> Self {
		Self::with_id_source(repository, create_attempts, Arc::new(random_order_id))
	}

	pub fn with_id_source(
		repository: OrderRepository,
		create_attempts: u32,
		next_id: IdSource,
	) -> Self {
		Self {
			repository,
			create_attempts: create_attempts.max(1),
			next_id,
		}
	}

	/// Creates and persists a new order.
	///
	/// A freshly drawn identifier that is already taken is replaced by another
	/// one, up to `create_attempts` draws in total. Only a definite collision
	/// is retried; every other error is returned as is.
	pub async fn create(
		&self,
		customer_id: Uuid,
		line_items: Vec<LineItem>,
	) -> Result<Order, OrderServiceError> {
		let created_at = Utc::now();
		let mut attempt = 1;
		loop {
			let order = Order::new((self.next_id)(), customer_id, line_items.clone(), created_at);
			match self.repository.insert(&order).await {
				Ok(()) => {
					tracing::info!(order_id = %order.order_id, customer_id = %customer_id, "Order created");
					return Ok(order);
				},
				Err(RepositoryError::AlreadyExists { .. }) if attempt < self.create_attempts => {
					tracing::warn!(
						order_id = %order.order_id,
						attempt,
						"Order id collision, drawing a new id"
					);
					attempt += 1;
				},
				Err(e) => return Err(e.into()),
			}
		}
	}

	pub async fn get(&self, id: OrderId) -> Result<Order, OrderServiceError> {
		Ok(self.repository.get(id).await?)
	}

	/// Moves an order to the next lifecycle stage and persists it.
	pub async fn update_status(
		&self,
		id: OrderId,
		update: StatusUpdate,
	) -> Result<Order, OrderServiceError> {
		let mut order = self.repository.get(id).await?;
		order.apply(update, Utc::now())?;
		self.repository.update(&order).await?;

		tracing::info!(order_id = %id, status = %update, "Order status updated");
		Ok(order)
	}

	pub async fn delete(&self, id: OrderId) -> Result<(), OrderServiceError> {
		self.repository.delete(id).await?;
		tracing::info!(order_id = %id, "Order deleted");
		Ok(())
	}

	/// Lists one page of orders. See [`OrderRepository::find_all`].
	pub async fn list(&self, cursor: u64, size: u64) -> Result<OrderPage, OrderServiceError> {
		Ok(self.repository.find_all(cursor, size).await?)
	}

	/// Checks that the storage backend answers.
	pub async fn health(&self) -> Result<(), StorageError> {
		self.repository.ping().await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use orders_storage::implementations::memory::MemoryStorage;
	use orders_storage::StorageService;
	use std::sync::atomic::{AtomicU64, Ordering};

	fn repository() -> OrderRepository {
		OrderRepository::new(Arc::new(StorageService::new(Box::new(MemoryStorage::new()))))
	}

	/// Hands out the given ids in order, then repeats the last one.
	fn sequence(ids: Vec<u64>) -> IdSource {
		let next = Arc::new(AtomicU64::new(0));
		Arc::new(move || {
			let i = next.fetch_add(1, Ordering::SeqCst) as usize;
			OrderId(ids[i.min(ids.len() - 1)])
		})
	}

	fn items() -> Vec<LineItem> {
		vec![LineItem {
			item_id: "sku-1".into(),
			quantity: 2,
		}]
	}

	#[test]
	fn test_random_ids_are_non_zero() {
		for _ in 0..1000 {
			assert_ne!(random_order_id().0, 0);
		}
	}

	#[tokio::test]
	async fn test_create_then_get() {
		let service = OrderService::new(repository(), 3);
		let customer = Uuid::new_v4();
		let created = service.create(customer, items()).await.unwrap();

		assert_ne!(created.order_id.0, 0);
		assert_eq!(created.customer_id, customer);
		assert!(created.shipped_at.is_none());
		assert_eq!(service.get(created.order_id).await.unwrap(), created);
	}

	#[tokio::test]
	async fn test_create_retries_after_collision() {
		let repo = repository();
		let service = OrderService::with_id_source(repo.clone(), 3, sequence(vec![42, 42, 43]));

		service.create(Uuid::new_v4(), items()).await.unwrap();
		let second = service.create(Uuid::new_v4(), items()).await.unwrap();
		assert_eq!(second.order_id, OrderId(43));
	}

	#[tokio::test]
	async fn test_create_gives_up_after_configured_attempts() {
		let service = OrderService::with_id_source(repository(), 2, sequence(vec![7]));
		let first = service.create(Uuid::new_v4(), items()).await.unwrap();

		let err = service.create(Uuid::new_v4(), items()).await.unwrap_err();
		assert!(matches!(
			err,
			OrderServiceError::Repository(RepositoryError::AlreadyExists { .. })
		));
		assert_eq!(service.get(OrderId(7)).await.unwrap(), first);
	}

	#[tokio::test]
	async fn test_lifecycle() {
		let service = OrderService::new(repository(), 3);
		let order = service.create(Uuid::new_v4(), items()).await.unwrap();
		let id = order.order_id;

		let err = service
			.update_status(id, StatusUpdate::Completed)
			.await
			.unwrap_err();
		assert!(matches!(
			err,
			OrderServiceError::Transition(TransitionError::NotShipped(_))
		));

		let shipped = service.update_status(id, StatusUpdate::Shipped).await.unwrap();
		assert!(shipped.shipped_at.is_some());
		assert!(matches!(
			service.update_status(id, StatusUpdate::Shipped).await,
			Err(OrderServiceError::Transition(TransitionError::AlreadyShipped(_)))
		));

		let completed = service
			.update_status(id, StatusUpdate::Completed)
			.await
			.unwrap();
		assert!(completed.completed_at.is_some());
		assert_eq!(completed.shipped_at, shipped.shipped_at);
		assert_eq!(service.get(id).await.unwrap(), completed);
	}

	#[tokio::test]
	async fn test_update_and_delete_of_missing_order() {
		let service = OrderService::new(repository(), 3);
		let missing = OrderId(999_999);

		assert!(matches!(
			service.update_status(missing, StatusUpdate::Shipped).await,
			Err(OrderServiceError::Repository(RepositoryError::NotFound { .. }))
		));
		assert!(matches!(
			service.delete(missing).await,
			Err(OrderServiceError::Repository(RepositoryError::NotFound { .. }))
		));
	}

	#[tokio::test]
	async fn test_health_on_memory_backend() {
		let service = OrderService::new(repository(), 3);
		assert!(service.health().await.is_ok());
	}
}
