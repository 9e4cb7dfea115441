//! Storage-related types for the order system.

/// Storage namespaces for the order collections.
///
/// Replaces string literals in storage calls with strongly typed variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
	/// Order aggregates keyed by order id
	Orders,
	/// Status history rows keyed by row id
	StatusHistory,
	/// Ordered list of history row ids per order id
	StatusHistoryByOrder,
	/// Monotonic identifier sequences keyed by sequence name
	Sequences,
}

impl StorageKey {
	/// Returns the string representation of the storage key.
	pub fn as_str(&self) -> &'static str {
		match self {
			StorageKey::Orders => "orders",
			StorageKey::StatusHistory => "status_history",
			StorageKey::StatusHistoryByOrder => "status_history_by_order",
			StorageKey::Sequences => "sequences",
		}
	}
}
