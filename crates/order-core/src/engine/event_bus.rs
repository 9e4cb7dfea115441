//! Event bus for order events.
//!
//! Carries order identifiers from the creation path to background consumers.
//! Each subscriber owns an unbounded queue, so a consumer that is busy never
//! loses events. A publish with no live subscriber fails; subscribers whose
//! receiver was closed or dropped are pruned on the next publish.

use order_types::OrderEvent;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors that can occur when publishing an event.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
	#[error("No active subscribers for event")]
	NoSubscribers,
	#[error("Channel error: {0}")]
	Other(String),
}

/// Publishing side of the order event channel.
#[cfg_attr(test, mockall::automock)]
pub trait EventChannel: Send + Sync {
	/// Publishes an event, returning how many subscribers will receive it.
	fn publish(&self, event: OrderEvent) -> Result<usize, ChannelError>;
}

/// In-process event channel fanning out to per-subscriber queues.
#[derive(Clone, Default)]
pub struct EventBus {
	subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<OrderEvent>>>>,
}

impl EventBus {
	pub fn new() -> Self {
		Self::default()
	}

	/// Subscribes to every event published after this call.
	pub fn subscribe(&self) -> mpsc::UnboundedReceiver<OrderEvent> {
		let (sender, receiver) = mpsc::unbounded_channel();
		self.subscribers
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.push(sender);
		receiver
	}
}

impl EventChannel for EventBus {
	fn publish(&self, event: OrderEvent) -> Result<usize, ChannelError> {
		let mut subscribers = self
			.subscribers
			.lock()
			.map_err(|e| ChannelError::Other(e.to_string()))?;
		subscribers.retain(|sender| sender.send(event.clone()).is_ok());

		match subscribers.len() {
			0 => Err(ChannelError::NoSubscribers),
			receivers => Ok(receivers),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_publish_reaches_every_subscriber() {
		let bus = EventBus::new();
		let mut first = bus.subscribe();
		let mut second = bus.subscribe();

		let receivers = bus.publish(OrderEvent::Placed { order_id: 3 }).unwrap();
		assert_eq!(receivers, 2);
		assert_eq!(first.recv().await.unwrap().order_id(), 3);
		assert_eq!(second.recv().await.unwrap().order_id(), 3);
	}

	#[test]
	fn test_publish_without_subscribers_fails() {
		let bus = EventBus::new();
		assert_eq!(
			bus.publish(OrderEvent::Placed { order_id: 1 }),
			Err(ChannelError::NoSubscribers)
		);
	}

	#[tokio::test]
	async fn test_idle_subscriber_keeps_every_event() {
		let bus = EventBus::new();
		let mut rx = bus.subscribe();
		for order_id in 1..=2000 {
			bus.publish(OrderEvent::Placed { order_id }).unwrap();
		}

		for expected in 1..=2000 {
			assert_eq!(rx.recv().await.unwrap().order_id(), expected);
		}
	}

	#[test]
	fn test_closed_subscriber_is_pruned() {
		let bus = EventBus::new();
		let mut closed = bus.subscribe();
		let open = bus.subscribe();
		closed.close();

		assert_eq!(bus.publish(OrderEvent::Placed { order_id: 1 }), Ok(1));
		drop(open);
		assert_eq!(
			bus.publish(OrderEvent::Placed { order_id: 2 }),
			Err(ChannelError::NoSubscribers)
		);
	}
}
