//! Status history types.
//!
//! Every status-affecting write appends one immutable row to the status
//! history of an order. Rows record who made the change and why.

use crate::{OrderId, OrderStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Party responsible for a status-affecting write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Actor {
	/// A caller of the synchronous order operations.
	User,
	/// Background processing such as the status worker.
	System,
}

impl Actor {
	/// Returns the label stored in history rows.
	pub fn as_str(&self) -> &'static str {
		match self {
			Actor::User => "User",
			Actor::System => "System",
		}
	}
}

impl fmt::Display for Actor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Immutable audit record of one status-affecting write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStatusDetail {
	/// Identifier of the history row.
	pub id: u64,
	/// Order the row refers to. This is a lookup reference, not ownership.
	pub order_id: OrderId,
	/// Status snapshot after the write.
	pub status: OrderStatus,
	/// Actor that performed the write.
	pub updated_by: Actor,
	/// Time of the write.
	pub updated_at: DateTime<Utc>,
	/// Free-text reason.
	pub notes: String,
}

/// A history row that has not been assigned an identifier yet.
///
/// The store assigns the identifier inside the unit of work that appends it.
#[derive(Debug, Clone, PartialEq)]
pub struct NewStatusDetail {
	pub status: OrderStatus,
	pub updated_by: Actor,
	pub notes: String,
}

impl NewStatusDetail {
	pub fn new(status: OrderStatus, updated_by: Actor, notes: impl Into<String>) -> Self {
		Self {
			status,
			updated_by,
			notes: notes.into(),
		}
	}
}
