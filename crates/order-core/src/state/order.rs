//! Order store implementation.
//!
//! Persists orders, their embedded line items and the append-only status
//! history on top of the typed storage service. Every mutation is one unit of
//! work: the order record, any new history row and the sequence counters are
//! written as a single batch while the commit locks are held, and updates are
//! rejected when the order's version moved since it was read. The commit lock
//! orders writers within this process; the backend lock orders them across
//! every process sharing the same storage.

use chrono::Utc;
use once_cell::sync::Lazy;
use order_storage::{StorageError, StorageService, WriteBatch};
use order_types::{
	Actor, LineItem, NewStatusDetail, Order, OrderId, OrderStatus, OrderStatusDetail,
	PlaceOrderRequest, StorageKey,
};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Sequence holding the highest assigned order id.
const ORDER_SEQUENCE: &str = "orders";
/// Sequence holding the highest assigned line item id.
const LINE_ITEM_SEQUENCE: &str = "line_items";
/// Sequence holding the highest assigned history row id.
const HISTORY_SEQUENCE: &str = "status_history";

/// Note recorded on the history row written at creation.
pub const CREATED_NOTE: &str = "Order created";

/// Errors that can occur during order store operations.
#[derive(Debug, Error)]
pub enum StoreError {
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
	#[error("Order not found: {0}")]
	OrderNotFound(OrderId),
	#[error("Invalid state transition from {from} to {to}")]
	InvalidTransition { from: OrderStatus, to: OrderStatus },
	#[error("Order {order_id} changed during update: expected version {expected}, found {found}")]
	VersionConflict {
		order_id: OrderId,
		expected: u64,
		found: u64,
	},
}

/// Durable store for orders and their status history.
pub struct OrderStore {
	storage: Arc<StorageService>,
	/// Serializes commits in this process. Never held while a caller is
	/// reading or waiting.
	commit_lock: Mutex<()>,
	/// Attempts made by [`OrderStore::update_order_with`] before giving up.
	max_write_attempts: u32,
}

impl OrderStore {
	pub fn new(storage: Arc<StorageService>, max_write_attempts: u32) -> Self {
		Self {
			storage,
			commit_lock: Mutex::new(()),
			max_write_attempts: max_write_attempts.max(1),
		}
	}

	/// Persists a new order with status `CREATED` and its first history row.
	///
	/// The order id, line item ids and history row id are allocated inside the
	/// same unit of work that writes them.
	pub async fn create_order(
		&self,
		request: &PlaceOrderRequest,
		total_amount: Decimal,
		actor: Actor,
	) -> Result<Order, StoreError> {
		let _guard = self.commit_lock.lock().await;
		let _backend_lock = self.storage.lock().await?;

		let order_id = self.sequence(ORDER_SEQUENCE).await? + 1;
		let first_item_id = self.sequence(LINE_ITEM_SEQUENCE).await? + 1;
		let history_id = self.sequence(HISTORY_SEQUENCE).await? + 1;
		let now = Utc::now();

		let items: Vec<LineItem> = request
			.items
			.iter()
			.zip(first_item_id..)
			.map(|(item, id)| LineItem {
				id,
				order_id,
				name: item.name.clone(),
				quantity: item.quantity,
				price: item.price,
			})
			.collect();
		let last_item_id = first_item_id + items.len() as u64 - 1;

		let order = Order {
			id: order_id,
			customer_name: request.customer_name.clone(),
			items,
			total_amount,
			order_time: request.order_time,
			status: OrderStatus::Created,
			created_at: now,
			updated_at: now,
			notes: None,
			version: 1,
		};
		let detail = OrderStatusDetail {
			id: history_id,
			order_id,
			status: OrderStatus::Created,
			updated_by: actor,
			updated_at: now,
			notes: CREATED_NOTE.to_string(),
		};

		let mut batch = WriteBatch::new();
		batch
			.put(StorageKey::Orders, &order_id.to_string(), &order)?
			.put(StorageKey::StatusHistory, &history_id.to_string(), &detail)?
			.put(
				StorageKey::StatusHistoryByOrder,
				&order_id.to_string(),
				&vec![history_id],
			)?
			.put(StorageKey::Sequences, ORDER_SEQUENCE, &order_id)?
			.put(StorageKey::Sequences, LINE_ITEM_SEQUENCE, &last_item_id)?
			.put(StorageKey::Sequences, HISTORY_SEQUENCE, &history_id)?;
		self.storage.commit(batch).await?;

		Ok(order)
	}

	/// Gets an order by id.
	pub async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
		Ok(self
			.storage
			.retrieve_optional(StorageKey::Orders, &order_id.to_string())
			.await?)
	}

	/// Lists one page of orders in insertion order together with the total count.
	///
	/// Orders are never deleted and ids are dense, so the order sequence is the
	/// total and a page maps to a contiguous id range.
	pub async fn list_orders(&self, page: u64, size: u64) -> Result<(Vec<Order>, u64), StoreError> {
		let total = self.sequence(ORDER_SEQUENCE).await?;
		let first = match page.checked_mul(size) {
			Some(offset) if size > 0 && offset < total => offset + 1,
			_ => return Ok((Vec::new(), total)),
		};
		let last = first.saturating_add(size - 1).min(total);

		let mut orders = Vec::with_capacity((last - first + 1) as usize);
		for id in first..=last {
			if let Some(order) = self.get_order(id).await? {
				orders.push(order);
			}
		}
		Ok((orders, total))
	}

	/// Returns the status history of an order, oldest first.
	pub async fn status_history(
		&self,
		order_id: OrderId,
	) -> Result<Vec<OrderStatusDetail>, StoreError> {
		let row_ids: Vec<u64> = self
			.storage
			.retrieve_optional(StorageKey::StatusHistoryByOrder, &order_id.to_string())
			.await?
			.unwrap_or_default();

		let mut rows = Vec::with_capacity(row_ids.len());
		for row_id in row_ids {
			rows.push(
				self.storage
					.retrieve(StorageKey::StatusHistory, &row_id.to_string())
					.await?,
			);
		}
		Ok(rows)
	}

	/// Updates an order with a closure and persists it.
	///
	/// The closure sees the latest stored order and may return a history row to
	/// append in the same unit of work. `updated_at` and `version` are set
	/// here. When another writer commits in between, the order is re-read and
	/// the closure applied again, up to the configured number of attempts.
	pub async fn update_order_with<F>(
		&self,
		order_id: OrderId,
		mut updater: F,
	) -> Result<Order, StoreError>
	where
		F: FnMut(&mut Order) -> Result<Option<NewStatusDetail>, StoreError>,
	{
		let mut attempt = 1;
		loop {
			let current = self
				.get_order(order_id)
				.await?
				.ok_or(StoreError::OrderNotFound(order_id))?;
			let read_version = current.version;

			let mut order = current;
			let detail = updater(&mut order)?;
			order.updated_at = Utc::now();
			order.version = read_version + 1;

			match self.commit_update(&order, read_version, detail).await {
				Ok(()) => return Ok(order),
				Err(StoreError::VersionConflict { .. }) if attempt < self.max_write_attempts => {
					tracing::debug!(
						order_id = %order_id,
						attempt,
						"Order changed concurrently, retrying update"
					);
					attempt += 1;
				},
				Err(e) => return Err(e),
			}
		}
	}

	/// Writes an updated order if its stored version still equals `read_version`.
	pub(crate) async fn commit_update(
		&self,
		order: &Order,
		read_version: u64,
		detail: Option<NewStatusDetail>,
	) -> Result<(), StoreError> {
		let _guard = self.commit_lock.lock().await;
		let _backend_lock = self.storage.lock().await?;
		let key = order.id.to_string();

		let stored: Order = self
			.storage
			.retrieve_optional(StorageKey::Orders, &key)
			.await?
			.ok_or(StoreError::OrderNotFound(order.id))?;
		if stored.version != read_version {
			return Err(StoreError::VersionConflict {
				order_id: order.id,
				expected: read_version,
				found: stored.version,
			});
		}

		let mut batch = WriteBatch::new();
		batch.put(StorageKey::Orders, &key, order)?;

		if let Some(detail) = detail {
			let history_id = self.sequence(HISTORY_SEQUENCE).await? + 1;
			let mut row_ids: Vec<u64> = self
				.storage
				.retrieve_optional(StorageKey::StatusHistoryByOrder, &key)
				.await?
				.unwrap_or_default();
			row_ids.push(history_id);

			let row = OrderStatusDetail {
				id: history_id,
				order_id: order.id,
				status: detail.status,
				updated_by: detail.updated_by,
				updated_at: order.updated_at,
				notes: detail.notes,
			};
			batch
				.put(StorageKey::StatusHistory, &history_id.to_string(), &row)?
				.put(StorageKey::StatusHistoryByOrder, &key, &row_ids)?
				.put(StorageKey::Sequences, HISTORY_SEQUENCE, &history_id)?;
		}

		self.storage.commit(batch).await?;
		Ok(())
	}

	async fn sequence(&self, name: &str) -> Result<u64, StoreError> {
		Ok(self
			.storage
			.retrieve_optional(StorageKey::Sequences, name)
			.await?
			.unwrap_or(0))
	}
}

/// Checks a status change against the lifecycle transition table.
///
/// Keeping the current status is always allowed.
pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
	// Static transition table - each state maps to allowed next states
	static TRANSITIONS: Lazy<HashMap<OrderStatus, HashSet<OrderStatus>>> = Lazy::new(|| {
		let mut m = HashMap::new();
		m.insert(
			OrderStatus::Created,
			HashSet::from([OrderStatus::Processing, OrderStatus::Cancelled]),
		);
		m.insert(
			OrderStatus::Processing,
			HashSet::from([OrderStatus::Shipped, OrderStatus::Cancelled]),
		);
		m.insert(
			OrderStatus::Shipped,
			HashSet::from([OrderStatus::Delivered, OrderStatus::Returned]),
		);
		m.insert(
			OrderStatus::Delivered,
			HashSet::from([OrderStatus::Completed, OrderStatus::Returned]),
		);
		m.insert(OrderStatus::Returned, HashSet::from([OrderStatus::Completed]));
		m.insert(OrderStatus::Completed, HashSet::new()); // terminal
		m.insert(OrderStatus::Cancelled, HashSet::new()); // terminal
		m
	});

	from == to || TRANSITIONS.get(&from).is_some_and(|set| set.contains(&to))
}
