//! Common types module for the order lifecycle system.
//!
//! This module defines the core data types shared by every order component:
//! the order aggregate and its line items, the append-only status history,
//! the typed partial-update patch, channel events and storage keys.

/// Events carried on the order event channel.
pub mod events;
/// Status history rows and the actors that produce them.
pub mod history;
/// Order aggregate, line items, requests and read views.
pub mod order;
/// Typed partial-update contract parsed from a string field map.
pub mod patch;
/// Registry trait for named, self-registering implementations.
pub mod registry;
/// Storage keys for the order collections.
pub mod storage;
/// Configuration validation types for backend-specific settings.
pub mod validation;

pub use events::*;
pub use history::*;
pub use order::*;
pub use patch::*;
pub use registry::*;
pub use storage::*;
pub use validation::*;
