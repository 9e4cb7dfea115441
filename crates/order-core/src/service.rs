//! Order lifecycle service.
//!
//! Validates requests, persists orders through the order store, maps stored
//! orders to caller views and publishes creation events. Storage failures are
//! logged here and reported to callers as generic unavailability errors.

use crate::engine::event_bus::EventChannel;
use crate::state::{is_valid_transition, OrderStore, StoreError};
use order_config::LifecycleConfig;
use order_types::{
	Actor, NewStatusDetail, OrderEvent, OrderId, OrderPatch, OrderStatus, OrderStatusDetail,
	OrderView, Page, PatchError, PlaceOrderRequest,
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;
use validator::Validate;

/// Note recorded on history rows written by status updates.
pub const UPDATE_NOTE: &str = "Order status updated via API";

/// Errors returned by the order lifecycle service.
///
/// Each variant maps to a stable machine-readable code, see [`OrderError::code`].
#[derive(Debug, Error)]
pub enum OrderError {
	#[error("Order must contain at least one product")]
	EmptyOrder,
	#[error("Total amount must be greater than zero")]
	InvalidAmount,
	#[error("Invalid order request: {0}")]
	InvalidRequest(String),
	#[error(transparent)]
	InvalidUpdate(#[from] PatchError),
	#[error("Page size must be at least 1")]
	InvalidPage,
	#[error("Order status cannot change from {from} to {to}")]
	InvalidTransition { from: OrderStatus, to: OrderStatus },
	#[error("Order not found with id: {0}")]
	NotFound(OrderId),
	#[error("Order {0} was modified concurrently, please retry")]
	ConcurrentModification(OrderId),
	#[error("Failed to create order. Please try again later.")]
	CreationFailed,
	#[error("Failed to fetch order. Please try again later.")]
	FetchFailed,
	#[error("Failed to fetch orders. Please try again later.")]
	PaginationFailed,
	#[error("Failed to update order. Please try again later.")]
	UpdateFailed,
}

impl OrderError {
	/// Returns the stable error code for this error.
	pub fn code(&self) -> &'static str {
		match self {
			OrderError::EmptyOrder => "EMPTY_ORDER",
			OrderError::InvalidAmount => "INVALID_AMOUNT",
			OrderError::InvalidRequest(_) => "INVALID_REQUEST",
			OrderError::InvalidUpdate(e) => match e {
				PatchError::NoParams => "NO_UPDATE_PARAMS",
				PatchError::InvalidId => "INVALID_ID_FORMAT",
				PatchError::NoFields => "NO_UPDATE_FIELDS",
				PatchError::NoValidFields => "NO_VALID_UPDATE_FIELDS",
				PatchError::InvalidStatus => "INVALID_STATUS",
				PatchError::InvalidAmount => "INVALID_AMOUNT",
			},
			OrderError::InvalidPage => "INVALID_PAGE",
			OrderError::InvalidTransition { .. } => "INVALID_TRANSITION",
			OrderError::NotFound(_) => "ORDER_NOT_FOUND",
			OrderError::ConcurrentModification(_) => "CONCURRENT_MODIFICATION",
			OrderError::CreationFailed => "ORDER_CREATION_FAILED",
			OrderError::FetchFailed => "ORDER_FETCH_FAILED",
			OrderError::PaginationFailed => "ORDER_PAGINATION_FAILED",
			OrderError::UpdateFailed => "ORDER_UPDATE_FAILED",
		}
	}
}

/// Outcome of publishing the creation event of an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventDelivery {
	/// The event was queued for this many subscribers.
	Published { receivers: usize },
	/// The event could not be published. The order is still created.
	Failed { reason: String },
}

/// Result of a successful order placement.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedOrder {
	pub order: OrderView,
	pub event: EventDelivery,
}

/// Service coordinating order creation, lookup and updates.
pub struct OrderService {
	store: Arc<OrderStore>,
	events: Arc<dyn EventChannel>,
	lifecycle: LifecycleConfig,
}

impl OrderService {
	pub fn new(
		store: Arc<OrderStore>,
		events: Arc<dyn EventChannel>,
		lifecycle: LifecycleConfig,
	) -> Self {
		Self {
			store,
			events,
			lifecycle,
		}
	}

	/// Validates and persists a new order, then publishes its creation event.
	///
	/// A failed publish is logged and reported through [`PlacedOrder::event`];
	/// the order stays created.
	#[instrument(skip_all, fields(customer = %request.customer_name))]
	pub async fn place_order(
		&self,
		request: PlaceOrderRequest,
		actor: Actor,
	) -> Result<PlacedOrder, OrderError> {
		if request.items.is_empty() {
			return Err(OrderError::EmptyOrder);
		}
		let total_amount = match request.total_amount {
			Some(amount) if amount > Decimal::ZERO => amount,
			_ => return Err(OrderError::InvalidAmount),
		};
		request
			.validate()
			.map_err(|e| OrderError::InvalidRequest(e.to_string()))?;

		let order = self
			.store
			.create_order(&request, total_amount, actor)
			.await
			.map_err(|e| {
				tracing::error!(error = %e, "Failed to persist order");
				OrderError::CreationFailed
			})?;
		tracing::info!(order_id = %order.id, items = order.items.len(), "Order created");

		let event = match self.events.publish(OrderEvent::Placed { order_id: order.id }) {
			Ok(receivers) => EventDelivery::Published { receivers },
			Err(e) => {
				tracing::warn!(order_id = %order.id, error = %e, "Failed to publish order event");
				EventDelivery::Failed {
					reason: e.to_string(),
				}
			},
		};

		Ok(PlacedOrder {
			order: order.view(),
			event,
		})
	}

	/// Gets an order by id.
	#[instrument(skip(self))]
	pub async fn get_order(&self, order_id: OrderId) -> Result<OrderView, OrderError> {
		match self.store.get_order(order_id).await {
			Ok(Some(order)) => Ok(order.view()),
			Ok(None) => Err(OrderError::NotFound(order_id)),
			Err(e) => {
				tracing::error!(error = %e, "Failed to fetch order");
				Err(OrderError::FetchFailed)
			},
		}
	}

	/// Lists orders in insertion order.
	///
	/// `size` defaults to the configured page size when omitted.
	#[instrument(skip(self))]
	pub async fn list_orders(
		&self,
		page: u64,
		size: Option<u64>,
	) -> Result<Page<OrderView>, OrderError> {
		let size = size.unwrap_or(self.lifecycle.default_page_size);
		if size == 0 {
			return Err(OrderError::InvalidPage);
		}

		let (orders, total) = self.store.list_orders(page, size).await.map_err(|e| {
			tracing::error!(error = %e, "Failed to list orders");
			OrderError::PaginationFailed
		})?;
		Ok(Page::new(
			orders.iter().map(|order| order.view()).collect(),
			page,
			size,
			total,
		))
	}

	/// Applies a sparse field map to an order.
	///
	/// The map is parsed before the order is read, so malformed input never
	/// touches storage. A history row is appended only when the status
	/// actually changes.
	#[instrument(skip_all, fields(order_id = tracing::field::Empty))]
	pub async fn update_order(
		&self,
		params: &HashMap<String, String>,
		actor: Actor,
	) -> Result<OrderView, OrderError> {
		let (order_id, patch) = OrderPatch::from_params(params)?;
		tracing::Span::current().record("order_id", order_id);
		let strict = self.lifecycle.strict_transitions;

		let result = self
			.store
			.update_order_with(order_id, |order| {
				let prior = order.status;
				if let Some(next) = patch.status {
					if strict && !is_valid_transition(prior, next) {
						return Err(StoreError::InvalidTransition {
							from: prior,
							to: next,
						});
					}
				}
				patch.apply_to(order);
				Ok(patch
					.status
					.filter(|next| *next != prior)
					.map(|next| NewStatusDetail::new(next, actor, UPDATE_NOTE)))
			})
			.await;

		match result {
			Ok(order) => {
				tracing::info!(order_id = %order_id, status = %order.status, "Order updated");
				Ok(order.view())
			},
			Err(StoreError::OrderNotFound(id)) => Err(OrderError::NotFound(id)),
			Err(StoreError::InvalidTransition { from, to }) => {
				Err(OrderError::InvalidTransition { from, to })
			},
			Err(StoreError::VersionConflict { .. }) => {
				tracing::warn!(order_id = %order_id, "Update attempts exhausted by concurrent writes");
				Err(OrderError::ConcurrentModification(order_id))
			},
			Err(e) => {
				tracing::error!(order_id = %order_id, error = %e, "Failed to update order");
				Err(OrderError::UpdateFailed)
			},
		}
	}

	/// Returns the status history of an order, oldest first.
	#[instrument(skip(self))]
	pub async fn order_history(
		&self,
		order_id: OrderId,
	) -> Result<Vec<OrderStatusDetail>, OrderError> {
		let fetch_failed = |e: StoreError| {
			tracing::error!(error = %e, "Failed to fetch order history");
			OrderError::FetchFailed
		};

		if self.store.get_order(order_id).await.map_err(fetch_failed)?.is_none() {
			return Err(OrderError::NotFound(order_id));
		}
		self.store
			.status_history(order_id)
			.await
			.map_err(fetch_failed)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::engine::event_bus::{ChannelError, EventBus, MockEventChannel};
	use chrono::DateTime;
	use order_storage::{implementations::memory::MemoryStorage, StorageService};
	use order_types::LineItemRequest;

	fn lifecycle(strict: bool) -> LifecycleConfig {
		LifecycleConfig {
			strict_transitions: strict,
			..LifecycleConfig::default()
		}
	}

	fn service_with(events: Arc<dyn EventChannel>, strict: bool) -> (OrderService, Arc<OrderStore>) {
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let store = Arc::new(OrderStore::new(storage, 3));
		(
			OrderService::new(store.clone(), events, lifecycle(strict)),
			store,
		)
	}

	fn service() -> (OrderService, Arc<OrderStore>, EventBus) {
		let bus = EventBus::new();
		let (service, store) = service_with(Arc::new(bus.clone()), false);
		(service, store, bus)
	}

	fn alice() -> PlaceOrderRequest {
		PlaceOrderRequest {
			customer_name: "Alice".to_string(),
			items: vec![LineItemRequest {
				name: "Widget".to_string(),
				quantity: 2,
				price: Decimal::new(999, 2),
			}],
			total_amount: Some(Decimal::new(1998, 2)),
			order_time: DateTime::parse_from_rfc3339("2024-05-01T10:00:00+02:00").unwrap(),
		}
	}

	fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
		pairs
			.iter()
			.map(|(k, v)| (k.to_string(), v.to_string()))
			.collect()
	}

	#[tokio::test]
	async fn test_place_order_persists_and_publishes() {
		let (service, store, bus) = service();
		let mut rx = bus.subscribe();

		let placed = service.place_order(alice(), Actor::User).await.unwrap();
		assert_eq!(placed.order.status, "CREATED");
		assert_eq!(placed.order.customer_name, "Alice");
		assert_eq!(placed.order.items.len(), 1);
		assert_eq!(placed.order.items[0].quantity, 2);
		assert_eq!(placed.order.items[0].price, Decimal::new(999, 2));
		assert_eq!(placed.event, EventDelivery::Published { receivers: 1 });
		assert_eq!(rx.recv().await.unwrap().order_id(), placed.order.id);

		let history = store.status_history(placed.order.id).await.unwrap();
		assert_eq!(history.len(), 1);
		assert_eq!(history[0].status, OrderStatus::Created);
		assert_eq!(history[0].updated_by, Actor::User);
	}

	#[tokio::test]
	async fn test_place_order_validation_persists_nothing() {
		let (service, store, _bus) = service();

		let mut empty = alice();
		empty.items.clear();
		let err = service.place_order(empty, Actor::User).await.unwrap_err();
		assert_eq!(err.code(), "EMPTY_ORDER");

		for total in [None, Some(Decimal::ZERO), Some(Decimal::NEGATIVE_ONE)] {
			let mut request = alice();
			request.total_amount = total;
			let err = service.place_order(request, Actor::User).await.unwrap_err();
			assert_eq!(err.code(), "INVALID_AMOUNT");
		}

		let mut request = alice();
		request.items[0].quantity = 0;
		let err = service.place_order(request, Actor::User).await.unwrap_err();
		assert_eq!(err.code(), "INVALID_REQUEST");

		let (orders, total) = store.list_orders(0, 10).await.unwrap();
		assert!(orders.is_empty());
		assert_eq!(total, 0);
	}

	#[tokio::test]
	async fn test_publish_failure_keeps_order() {
		let mut channel = MockEventChannel::new();
		channel
			.expect_publish()
			.times(1)
			.returning(|_| Err(ChannelError::Other("broker down".into())));
		let (service, _store) = service_with(Arc::new(channel), false);

		let placed = service.place_order(alice(), Actor::User).await.unwrap();
		assert!(matches!(placed.event, EventDelivery::Failed { ref reason } if reason.contains("broker down")));
		assert_eq!(
			service.get_order(placed.order.id).await.unwrap().status,
			"CREATED"
		);
	}

	#[tokio::test]
	async fn test_publish_without_worker_is_reported() {
		let (service, _store, _bus) = service();
		let placed = service.place_order(alice(), Actor::User).await.unwrap();
		assert!(matches!(placed.event, EventDelivery::Failed { .. }));
	}

	#[tokio::test]
	async fn test_get_missing_order() {
		let (service, _store, _bus) = service();
		let err = service.get_order(5).await.unwrap_err();
		assert_eq!(err.code(), "ORDER_NOT_FOUND");
	}

	#[tokio::test]
	async fn test_list_orders_pages() {
		let (service, _store, _bus) = service();
		for _ in 0..3 {
			service.place_order(alice(), Actor::User).await.unwrap();
		}

		let page = service.list_orders(0, Some(2)).await.unwrap();
		assert_eq!(page.content.len(), 2);
		assert_eq!(page.total_elements, 3);
		assert_eq!(page.total_pages, 2);
		assert_eq!(page.content[0].id, 1);

		let page = service.list_orders(0, None).await.unwrap();
		assert_eq!(page.size, 10);
		assert_eq!(page.content.len(), 3);

		let err = service.list_orders(0, Some(0)).await.unwrap_err();
		assert_eq!(err.code(), "INVALID_PAGE");
	}

	#[tokio::test]
	async fn test_update_status_appends_one_row() {
		let (service, store, _bus) = service();
		let id = service.place_order(alice(), Actor::User).await.unwrap().order.id;

		let view = service
			.update_order(
				&params(&[("id", &id.to_string()), ("status", "shipped")]),
				Actor::User,
			)
			.await
			.unwrap();
		assert_eq!(view.status, "SHIPPED");

		// Same status again: no new row
		service
			.update_order(
				&params(&[("id", &id.to_string()), ("status", "SHIPPED")]),
				Actor::User,
			)
			.await
			.unwrap();

		let history = store.status_history(id).await.unwrap();
		assert_eq!(history.len(), 2);
		assert_eq!(history[1].status, OrderStatus::Shipped);
		assert_eq!(history[1].updated_by, Actor::User);
		assert_eq!(history[1].notes, UPDATE_NOTE);
	}

	#[tokio::test]
	async fn test_update_fields_without_status() {
		let (service, store, _bus) = service();
		let id = service.place_order(alice(), Actor::User).await.unwrap().order.id;
		let before = store.get_order(id).await.unwrap().unwrap();

		let view = service
			.update_order(
				&params(&[
					("id", &id.to_string()),
					("customerName", "Alicia"),
					("totalAmount", "25.50"),
					("notes", "gift wrap"),
				]),
				Actor::User,
			)
			.await
			.unwrap();
		assert_eq!(view.customer_name, "Alicia");
		assert_eq!(view.total_amount, Decimal::new(2550, 2));

		// Notes are not an update field
		let after = store.get_order(id).await.unwrap().unwrap();
		assert_eq!(after.notes, None);
		assert!(after.updated_at >= before.updated_at);
		assert_eq!(store.status_history(id).await.unwrap().len(), 1);

		let err = service
			.update_order(&params(&[("id", &id.to_string()), ("notes", "x")]), Actor::User)
			.await
			.unwrap_err();
		assert_eq!(err.code(), "NO_VALID_UPDATE_FIELDS");
		assert_eq!(store.get_order(id).await.unwrap().unwrap().version, 2);
	}

	#[tokio::test]
	async fn test_update_rejects_bad_input() {
		let (service, store, _bus) = service();
		for _ in 0..5 {
			service.place_order(alice(), Actor::User).await.unwrap();
		}

		let err = service
			.update_order(&params(&[("id", "5"), ("status", "bogus")]), Actor::User)
			.await
			.unwrap_err();
		assert_eq!(err.code(), "INVALID_STATUS");
		assert_eq!(
			store.get_order(5).await.unwrap().unwrap().status,
			OrderStatus::Created
		);

		let err = service
			.update_order(&params(&[("id", "5")]), Actor::User)
			.await
			.unwrap_err();
		assert_eq!(err.code(), "NO_UPDATE_FIELDS");

		let err = service
			.update_order(&HashMap::new(), Actor::User)
			.await
			.unwrap_err();
		assert_eq!(err.code(), "NO_UPDATE_PARAMS");

		let err = service
			.update_order(&params(&[("id", "x"), ("status", "shipped")]), Actor::User)
			.await
			.unwrap_err();
		assert_eq!(err.code(), "INVALID_ID_FORMAT");

		let err = service
			.update_order(&params(&[("id", "5"), ("colour", "red")]), Actor::User)
			.await
			.unwrap_err();
		assert_eq!(err.code(), "NO_VALID_UPDATE_FIELDS");

		let err = service
			.update_order(&params(&[("id", "5"), ("totalAmount", "0")]), Actor::User)
			.await
			.unwrap_err();
		assert_eq!(err.code(), "INVALID_AMOUNT");

		let err = service
			.update_order(&params(&[("id", "99"), ("status", "shipped")]), Actor::User)
			.await
			.unwrap_err();
		assert_eq!(err.code(), "ORDER_NOT_FOUND");

		let stored = store.get_order(5).await.unwrap().unwrap();
		assert_eq!(stored.version, 1);
	}

	#[tokio::test]
	async fn test_strict_transitions() {
		let (service, store) = service_with(Arc::new(EventBus::new()), true);
		let id = service.place_order(alice(), Actor::User).await.unwrap().order.id;

		let err = service
			.update_order(
				&params(&[("id", &id.to_string()), ("status", "delivered")]),
				Actor::User,
			)
			.await
			.unwrap_err();
		assert_eq!(err.code(), "INVALID_TRANSITION");
		assert_eq!(
			store.get_order(id).await.unwrap().unwrap().status,
			OrderStatus::Created
		);

		service
			.update_order(
				&params(&[("id", &id.to_string()), ("status", "cancelled")]),
				Actor::User,
			)
			.await
			.unwrap();
	}

	/// Collects formatted log output.
	#[derive(Clone, Default)]
	struct Captured(Arc<std::sync::Mutex<Vec<u8>>>);

	impl std::io::Write for Captured {
		fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
			self.0.lock().unwrap().extend_from_slice(buf);
			Ok(buf.len())
		}

		fn flush(&mut self) -> std::io::Result<()> {
			Ok(())
		}
	}

	#[tokio::test]
	async fn test_update_span_records_order_id() {
		let captured = Captured::default();
		let writer = captured.clone();
		let subscriber = tracing_subscriber::fmt()
			.with_writer(move || writer.clone())
			.with_ansi(false)
			.finish();
		let _default = tracing::subscriber::set_default(subscriber);

		let (service, _store, _bus) = service();
		let id = service.place_order(alice(), Actor::User).await.unwrap().order.id;
		service
			.update_order(
				&params(&[("id", &id.to_string()), ("status", "shipped")]),
				Actor::User,
			)
			.await
			.unwrap();

		let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
		assert!(
			output.contains(&format!("update_order{{order_id={}}}", id)),
			"{}",
			output
		);
	}

	#[tokio::test]
	async fn test_order_history() {
		let (service, _store, _bus) = service();
		let id = service.place_order(alice(), Actor::User).await.unwrap().order.id;

		let history = service.order_history(id).await.unwrap();
		assert_eq!(history.len(), 1);
		assert_eq!(history[0].notes, "Order created");

		let err = service.order_history(id + 1).await.unwrap_err();
		assert_eq!(err.code(), "ORDER_NOT_FOUND");
	}
}
