//! Core order handling for the orders system.
//!
//! [`OrderRepository`] maps orders onto the storage layer and keeps the order
//! index consistent with the records. [`OrderService`] adds identifier
//! generation and lifecycle transitions on top, and [`OrdersBuilder`] wires a
//! configured storage backend into a ready service.

pub mod builder;
pub mod repository;
pub mod service;

pub use builder::{BuilderError, OrdersBuilder};
pub use repository::{Operation, OrderPage, OrderRepository, RepositoryError};
pub use service::{random_order_id, IdSource, OrderService, OrderServiceError};
