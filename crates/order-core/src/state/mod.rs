//! State management for orders.
//!
//! This module provides the order store that persists orders and their status
//! history, enforcing versioned updates and, when enabled, the lifecycle
//! transition table.

pub mod order;

pub use order::{is_valid_transition, OrderStore, StoreError, CREATED_NOTE};
