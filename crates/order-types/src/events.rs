//! Event types for the order event channel.
//!
//! Events flow from the synchronous creation path to background consumers
//! through the event bus. They carry identifiers only; consumers re-read the
//! order from storage before acting on it.

use crate::OrderId;
use serde::{Deserialize, Serialize};

/// Events published on the order event channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
	/// A new order has been persisted with status `CREATED`.
	Placed { order_id: OrderId },
}

impl OrderEvent {
	/// Returns the identifier of the order the event refers to.
	pub fn order_id(&self) -> OrderId {
		match self {
			OrderEvent::Placed { order_id } => *order_id,
		}
	}
}
