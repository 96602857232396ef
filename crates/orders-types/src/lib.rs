//! Common types module for the orders system.
//!
//! This module defines the order entity, its lifecycle rules, the persisted key
//! layout and the HTTP API types shared by every crate in the workspace.

/// API types for HTTP endpoints and request/response structures.
pub mod api;
/// Order entity and lifecycle transitions.
pub mod order;
/// Implementation registry trait for pluggable backends.
pub mod registry;
/// Storage key layout and scan types.
pub mod storage;
/// Configuration validation types for ensuring type-safe configurations.
pub mod validation;

pub use api::*;
pub use order::*;
pub use registry::ImplementationRegistry;
pub use storage::*;
pub use validation::*;
