//! Order entity and lifecycle types.
//!
//! An order moves through `created -> shipped -> completed`. The stage is not
//! stored as a field; it is derived from which lifecycle timestamps are set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::StorageKey;

/// Identifier of an order.
///
/// Rendered in decimal, both in URLs and as the suffix of the primary
/// storage key (`order:<id>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub u64);

impl OrderId {
	/// Returns the primary storage key for this order.
	pub fn storage_key(&self) -> String {
		format!("{}:{}", StorageKey::Order.as_str(), self.0)
	}
}

impl fmt::Display for OrderId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for OrderId {
	type Err = ParseIntError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		s.parse::<u64>().map(OrderId)
	}
}

impl From<u64> for OrderId {
	fn from(value: u64) -> Self {
		OrderId(value)
	}
}

/// A single line of an order. Opaque to the storage layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
	/// Identifier of the purchased item.
	pub item_id: String,
	/// Number of units purchased.
	pub quantity: u32,
}

/// A purchase order as persisted and returned by the API.
///
/// The record is always written whole; optional fields default to `None` so
/// records written by older revisions stay readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
	/// Identifier, fixed at creation.
	pub order_id: OrderId,
	/// Customer that placed the order.
	pub customer_id: Uuid,
	/// Ordered line items as supplied by the caller.
	#[serde(default)]
	pub line_items: Vec<LineItem>,
	/// Creation timestamp, set once.
	pub created_at: DateTime<Utc>,
	/// Set when the order ships.
	#[serde(default)]
	pub shipped_at: Option<DateTime<Utc>>,
	/// Set when the order completes. Requires `shipped_at`.
	#[serde(default)]
	pub completed_at: Option<DateTime<Utc>>,
}

impl Order {
	/// Creates an order in the `created` stage.
	pub fn new(
		order_id: OrderId,
		customer_id: Uuid,
		line_items: Vec<LineItem>,
		created_at: DateTime<Utc>,
	) -> Self {
		Self {
			order_id,
			customer_id,
			line_items,
			created_at,
			shipped_at: None,
			completed_at: None,
		}
	}

	/// Primary storage key of this order.
	pub fn storage_key(&self) -> String {
		self.order_id.storage_key()
	}

	/// Current lifecycle stage, derived from the timestamps.
	pub fn status(&self) -> OrderStatus {
		match (self.shipped_at, self.completed_at) {
			(_, Some(_)) => OrderStatus::Completed,
			(Some(_), None) => OrderStatus::Shipped,
			(None, None) => OrderStatus::Created,
		}
	}

	/// Applies a lifecycle transition at the given instant.
	///
	/// Shipping requires the order not to be shipped yet. Completing requires
	/// the order to be shipped and not yet completed. On error the order is
	/// left untouched.
	pub fn apply(&mut self, update: StatusUpdate, at: DateTime<Utc>) -> Result<(), TransitionError> {
		match update {
			StatusUpdate::Shipped => {
				if self.shipped_at.is_some() {
					return Err(TransitionError::AlreadyShipped(self.order_id));
				}
				self.shipped_at = Some(at);
			},
			StatusUpdate::Completed => {
				if self.shipped_at.is_none() {
					return Err(TransitionError::NotShipped(self.order_id));
				}
				if self.completed_at.is_some() {
					return Err(TransitionError::AlreadyCompleted(self.order_id));
				}
				self.completed_at = Some(at);
			},
		}
		Ok(())
	}
}

/// Lifecycle stage of an order, as reported by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
	Created,
	Shipped,
	Completed,
}

/// Requested lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusUpdate {
	/// Mark the order as shipped.
	Shipped,
	/// Mark the order as completed.
	Completed,
}

impl StatusUpdate {
	/// Every accepted transition, in lifecycle order.
	pub const ALL: [StatusUpdate; 2] = [StatusUpdate::Shipped, StatusUpdate::Completed];

	pub fn as_str(&self) -> &'static str {
		match self {
			StatusUpdate::Shipped => "shipped",
			StatusUpdate::Completed => "completed",
		}
	}
}

impl fmt::Display for StatusUpdate {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for StatusUpdate {
	type Err = TransitionError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"shipped" => Ok(Self::Shipped),
			"completed" => Ok(Self::Completed),
			other => Err(TransitionError::UnknownStatus(other.to_string())),
		}
	}
}

/// Rejected lifecycle transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
	#[error("Order {0} has already shipped")]
	AlreadyShipped(OrderId),
	#[error("Order {0} cannot complete before it ships")]
	NotShipped(OrderId),
	#[error("Order {0} has already completed")]
	AlreadyCompleted(OrderId),
	#[error("Unknown order status: {0}")]
	UnknownStatus(String),
}
