//! Registry trait for self-registering implementations.

/// Declares the configuration name and factory of a pluggable implementation.
///
/// Each backend module provides a `Registry` type implementing this trait,
/// so the service can build its factory map without hard-coding names.
pub trait ImplementationRegistry {
	/// Name used under `[storage.implementations.<NAME>]` in configuration.
	const NAME: &'static str;

	/// The factory function type this implementation provides.
	type Factory;

	/// Returns the factory that builds this implementation from its config table.
	fn factory() -> Self::Factory;
}
