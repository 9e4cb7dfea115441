//! Order aggregate types for the order lifecycle system.
//!
//! This module defines the persisted order aggregate with its owned line items,
//! the status enumeration, the creation request accepted from callers and the
//! read views returned to them.

use chrono::{DateTime, FixedOffset, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::Validate;

/// Identifier assigned to an order on its first persist.
pub type OrderId = u64;

/// Lifecycle status of an order.
///
/// No transition table is implied by this type; any status may follow any
/// other unless strict transitions are enabled in the lifecycle configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
	Created,
	Processing,
	Shipped,
	Delivered,
	Returned,
	Completed,
	Cancelled,
}

impl OrderStatus {
	/// Returns the canonical upper-case name of the status.
	pub fn as_str(&self) -> &'static str {
		match self {
			OrderStatus::Created => "CREATED",
			OrderStatus::Processing => "PROCESSING",
			OrderStatus::Shipped => "SHIPPED",
			OrderStatus::Delivered => "DELIVERED",
			OrderStatus::Returned => "RETURNED",
			OrderStatus::Completed => "COMPLETED",
			OrderStatus::Cancelled => "CANCELLED",
		}
	}

	/// Returns an iterator over all status variants in declaration order.
	pub fn all() -> impl Iterator<Item = Self> {
		[
			Self::Created,
			Self::Processing,
			Self::Shipped,
			Self::Delivered,
			Self::Returned,
			Self::Completed,
			Self::Cancelled,
		]
		.into_iter()
	}
}

impl fmt::Display for OrderStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Error returned when a string does not name an [`OrderStatus`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown order status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for OrderStatus {
	type Err = UnknownStatus;

	/// Parses a status name, ignoring ASCII case.
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let upper = s.to_ascii_uppercase();
		Self::all()
			.find(|status| status.as_str() == upper)
			.ok_or_else(|| UnknownStatus(s.to_string()))
	}
}

/// A single product entry owned by an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
	/// Identifier of the line item.
	pub id: u64,
	/// Back-reference to the owning order.
	pub order_id: OrderId,
	/// Product name.
	pub name: String,
	/// Ordered quantity, at least one.
	pub quantity: u32,
	/// Unit price, strictly positive.
	pub price: Decimal,
}

/// Persisted order aggregate.
///
/// Line items are embedded so that they share the order's lifetime and are
/// written in the same unit of work as the order row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
	/// Identifier assigned on first persist.
	pub id: OrderId,
	/// Name of the ordering customer.
	pub customer_name: String,
	/// Owned line items, never empty once created.
	pub items: Vec<LineItem>,
	/// Order total, strictly positive and not cross-checked against the items.
	pub total_amount: Decimal,
	/// Caller-supplied time the order was placed.
	pub order_time: DateTime<FixedOffset>,
	/// Current lifecycle status.
	pub status: OrderStatus,
	/// Time of the first persist.
	pub created_at: DateTime<Utc>,
	/// Time of the latest mutating write.
	pub updated_at: DateTime<Utc>,
	/// Free-text notes, latest write wins.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub notes: Option<String>,
	/// Optimistic concurrency counter, incremented on every committed write.
	#[serde(default)]
	pub version: u64,
}

impl Order {
	/// Maps the aggregate to the representation returned to callers.
	pub fn view(&self) -> OrderView {
		OrderView {
			id: self.id,
			customer_name: self.customer_name.clone(),
			items: self
				.items
				.iter()
				.map(|item| LineItemView {
					id: item.id,
					name: item.name.clone(),
					quantity: item.quantity,
					price: item.price,
				})
				.collect(),
			total_amount: self.total_amount,
			order_time: self.order_time,
			status: self.status.to_string(),
		}
	}
}

/// Line item as supplied in a creation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct LineItemRequest {
	#[validate(length(min = 1, message = "Product name is required"))]
	pub name: String,
	#[validate(range(min = 1, message = "Quantity must be at least 1"))]
	pub quantity: u32,
	#[validate(custom(function = "positive_decimal", message = "Price must be greater than zero"))]
	pub price: Decimal,
}

/// Request to place a new order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
	#[validate(length(min = 1, message = "Customer name is required"))]
	pub customer_name: String,
	#[validate(length(min = 1, message = "At least one product must be provided"), nested)]
	#[serde(default)]
	pub items: Vec<LineItemRequest>,
	#[serde(default)]
	pub total_amount: Option<Decimal>,
	pub order_time: DateTime<FixedOffset>,
}

fn positive_decimal(value: &Decimal) -> Result<(), validator::ValidationError> {
	if value.is_sign_positive() && !value.is_zero() {
		Ok(())
	} else {
		Err(validator::ValidationError::new("not_positive"))
	}
}

/// Line item as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItemView {
	pub id: u64,
	pub name: String,
	pub quantity: u32,
	pub price: Decimal,
}

/// Order as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
	pub id: OrderId,
	pub customer_name: String,
	pub items: Vec<LineItemView>,
	pub total_amount: Decimal,
	pub order_time: DateTime<FixedOffset>,
	pub status: String,
}

/// One page of a listing together with total-count metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
	/// Entries on this page.
	pub content: Vec<T>,
	/// Zero-based page number.
	pub page: u64,
	/// Requested page size.
	pub size: u64,
	/// Number of entries across all pages.
	pub total_elements: u64,
	/// Number of pages for the given size.
	pub total_pages: u64,
}

impl<T> Page<T> {
	/// Builds a page, deriving the page count from the total and size.
	pub fn new(content: Vec<T>, page: u64, size: u64, total_elements: u64) -> Self {
		let total_pages = if size == 0 {
			0
		} else {
			total_elements.div_ceil(size)
		};
		Self {
			content,
			page,
			size,
			total_elements,
			total_pages,
		}
	}
}
