//! Typed partial-update contract.
//!
//! Callers submit updates as a sparse map of field name to string value. The
//! map is parsed once into an [`OrderPatch`] holding one optional, already
//! typed value per recognized field, so the update path never deals with raw
//! strings.

use crate::{Order, OrderId, OrderStatus};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

/// Key that identifies the order to update.
pub const ID_KEY: &str = "id";
/// Key replacing the customer name.
pub const CUSTOMER_NAME_KEY: &str = "customerName";
/// Key replacing the status.
pub const STATUS_KEY: &str = "status";
/// Key replacing the total amount.
pub const TOTAL_AMOUNT_KEY: &str = "totalAmount";

/// Errors raised while parsing an update field map.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
	#[error("No parameters provided for update")]
	NoParams,
	#[error("Invalid order ID format")]
	InvalidId,
	#[error("No update fields provided other than ID")]
	NoFields,
	#[error("No valid update fields provided")]
	NoValidFields,
	#[error("Invalid status value")]
	InvalidStatus,
	#[error("Invalid totalAmount format")]
	InvalidAmount,
}

/// Parsed partial update of an order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderPatch {
	pub customer_name: Option<String>,
	pub status: Option<OrderStatus>,
	pub total_amount: Option<Decimal>,
}

impl OrderPatch {
	/// Parses a field map into the target order id and a patch.
	///
	/// Unrecognized keys are ignored, but at least one recognized key must be
	/// present besides the identifying key. The id is trimmed and must be an
	/// unsigned integer.
	pub fn from_params(params: &HashMap<String, String>) -> Result<(OrderId, Self), PatchError> {
		if params.is_empty() {
			return Err(PatchError::NoParams);
		}

		let id = params
			.get(ID_KEY)
			.and_then(|raw| raw.trim().parse::<OrderId>().ok())
			.ok_or(PatchError::InvalidId)?;

		if params.len() == 1 {
			return Err(PatchError::NoFields);
		}

		let status = params
			.get(STATUS_KEY)
			.map(|raw| OrderStatus::from_str(raw).map_err(|_| PatchError::InvalidStatus))
			.transpose()?;

		let total_amount = params
			.get(TOTAL_AMOUNT_KEY)
			.map(|raw| parse_amount(raw))
			.transpose()?;

		let patch = Self {
			customer_name: params.get(CUSTOMER_NAME_KEY).cloned(),
			status,
			total_amount,
		};

		if patch.is_empty() {
			return Err(PatchError::NoValidFields);
		}

		Ok((id, patch))
	}

	/// Returns true when no field is set.
	pub fn is_empty(&self) -> bool {
		self.customer_name.is_none() && self.status.is_none() && self.total_amount.is_none()
	}

	/// Applies the present fields to an order.
	///
	/// Timestamps and versioning are left to the caller.
	pub fn apply_to(&self, order: &mut Order) {
		if let Some(name) = &self.customer_name {
			order.customer_name = name.clone();
		}
		if let Some(status) = self.status {
			order.status = status;
		}
		if let Some(amount) = self.total_amount {
			order.total_amount = amount;
		}
	}
}

/// Parses a strictly positive decimal, accepting plain and scientific notation.
fn parse_amount(raw: &str) -> Result<Decimal, PatchError> {
	let raw = raw.trim();
	let amount = Decimal::from_str(raw)
		.or_else(|_| Decimal::from_scientific(raw))
		.map_err(|_| PatchError::InvalidAmount)?;
	if amount <= Decimal::ZERO {
		return Err(PatchError::InvalidAmount);
	}
	Ok(amount)
}
