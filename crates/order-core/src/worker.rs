//! Status worker advancing newly placed orders to processing.
//!
//! Models downstream processing: after a fixed delay the worker re-reads the
//! order and moves it to `PROCESSING`, recording a `System` history row. The
//! delay is a timer inside the handling task, so other events keep flowing.

use crate::state::{is_valid_transition, OrderStore, StoreError};
use order_types::{Actor, NewStatusDetail, OrderId, OrderStatus};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Note set on the order and its history row when processing starts.
pub const PROCESSING_NOTE: &str = "Order is being processed";

/// Handler for order placement events.
pub struct StatusWorker {
	store: Arc<OrderStore>,
	processing_delay: Duration,
	strict_transitions: bool,
}

impl StatusWorker {
	pub fn new(store: Arc<OrderStore>, processing_delay: Duration, strict_transitions: bool) -> Self {
		Self {
			store,
			processing_delay,
			strict_transitions,
		}
	}

	/// Handles one placement event.
	///
	/// Unknown orders are ignored. Redelivery of an event appends another
	/// `PROCESSING` row while leaving the status unchanged.
	#[instrument(skip(self))]
	pub async fn handle_placed(&self, order_id: OrderId) -> Result<(), StoreError> {
		tokio::time::sleep(self.processing_delay).await;

		let strict = self.strict_transitions;
		let result = self
			.store
			.update_order_with(order_id, |order| {
				if strict && !is_valid_transition(order.status, OrderStatus::Processing) {
					return Err(StoreError::InvalidTransition {
						from: order.status,
						to: OrderStatus::Processing,
					});
				}
				order.status = OrderStatus::Processing;
				order.notes = Some(PROCESSING_NOTE.to_string());
				Ok(Some(NewStatusDetail::new(
					OrderStatus::Processing,
					Actor::System,
					PROCESSING_NOTE,
				)))
			})
			.await;

		match result {
			Ok(_) => {
				tracing::info!(order_id = %order_id, "Order moved to processing");
				Ok(())
			},
			Err(StoreError::OrderNotFound(_)) => {
				tracing::debug!(order_id = %order_id, "Ignoring event for unknown order");
				Ok(())
			},
			Err(e) => Err(e),
		}
	}
}
