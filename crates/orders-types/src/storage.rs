//! Storage-related types for the orders system.
//!
//! The persisted layout is one key per order (`order:<id>`) holding the JSON
//! record, plus one set (`orders`) whose members are the keys of all live
//! orders.

/// Well-known key namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
	/// Namespace of primary order records (`order:<id>`).
	Order,
	/// Name of the index set listing every live order key.
	OrderIndex,
}

impl StorageKey {
	/// Returns the string representation of the storage key.
	pub fn as_str(&self) -> &'static str {
		match self {
			StorageKey::Order => "order",
			StorageKey::OrderIndex => "orders",
		}
	}
}

/// One page of a cursor-driven set scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
	/// Members returned by this step of the scan.
	pub members: Vec<String>,
	/// Cursor for the next step; `0` once the scan has wrapped around.
	pub cursor: u64,
}
