//! Operations against the order service.
//!
//! An [`Operation`] is one service call, decoded either from a command-line
//! subcommand or from a JSON request line while serving. Results are rendered
//! as JSON; failures carry the service's stable error code.

use clap::Subcommand;
use order_core::{EventDelivery, OrderError, OrderService};
use order_types::{patch::ID_KEY, Actor, OrderId, PlaceOrderRequest};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

/// Subcommands available from the command line.
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
	/// Read JSON requests from stdin, one per line, until end of input
	Serve,
	/// Place an order described by a JSON file
	Place {
		/// Path to the order request JSON
		file: PathBuf,
	},
	/// Show one order
	Get { id: OrderId },
	/// List orders in insertion order
	List {
		/// Zero-based page number
		#[arg(long, default_value_t = 0)]
		page: u64,
		/// Page size, defaults to the configured page size
		#[arg(long)]
		size: Option<u64>,
	},
	/// Update fields of an order, e.g. `update 5 status=shipped customerName=Alicia`
	Update {
		/// Order id
		id: String,
		/// Fields to update as key=value pairs
		#[arg(value_parser = parse_field)]
		fields: Vec<(String, String)>,
	},
	/// Show the status history of an order
	History { id: OrderId },
}

/// A single service call.
///
/// Serve mode reads these as tagged JSON, e.g.
/// `{"op":"update","params":{"id":"5","status":"shipped"}}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Operation {
	Place {
		order: PlaceOrderRequest,
	},
	Get {
		id: OrderId,
	},
	List {
		#[serde(default)]
		page: u64,
		#[serde(default)]
		size: Option<u64>,
	},
	Update {
		params: HashMap<String, String>,
	},
	History {
		id: OrderId,
	},
}

/// Errors raised while executing an operation.
#[derive(Debug, Error)]
pub enum CommandError {
	#[error("Failed to read {path:?}: {source}")]
	Read {
		path: PathBuf,
		source: std::io::Error,
	},
	#[error("Invalid request: {0}")]
	Request(#[from] serde_json::Error),
	#[error("{0}")]
	Order(#[from] OrderError),
}

impl CommandError {
	/// Renders the error for output.
	pub fn to_json(&self) -> Value {
		match self {
			CommandError::Order(e) => json!({ "code": e.code(), "message": e.to_string() }),
			other => json!({ "code": "INVALID_REQUEST", "message": other.to_string() }),
		}
	}
}

impl Command {
	/// Resolves the subcommand into the operation it runs.
	///
	/// Returns `None` for `Serve`, which takes its operations from stdin.
	pub async fn into_operation(self) -> Result<Option<Operation>, CommandError> {
		let operation = match self {
			Command::Serve => return Ok(None),
			Command::Place { file } => {
				let content =
					tokio::fs::read_to_string(&file)
						.await
						.map_err(|source| CommandError::Read {
							path: file.clone(),
							source,
						})?;
				Operation::Place {
					order: serde_json::from_str(&content)?,
				}
			},
			Command::Get { id } => Operation::Get { id },
			Command::List { page, size } => Operation::List { page, size },
			Command::Update { id, fields } => {
				let mut params: HashMap<String, String> = fields.into_iter().collect();
				params.insert(ID_KEY.to_string(), id);
				Operation::Update { params }
			},
			Command::History { id } => Operation::History { id },
		};
		Ok(Some(operation))
	}
}

/// Parses a `key=value` argument.
pub fn parse_field(raw: &str) -> Result<(String, String), String> {
	raw.split_once('=')
		.map(|(key, value)| (key.to_string(), value.to_string()))
		.ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

/// Executes a single service operation and returns its JSON rendering.
pub async fn execute(service: &OrderService, operation: Operation) -> Result<Value, CommandError> {
	match operation {
		Operation::Place { order } => {
			let placed = service.place_order(order, Actor::User).await?;
			if let EventDelivery::Failed { reason } = &placed.event {
				tracing::warn!(order_id = %placed.order.id, "Order placed without processing event: {}", reason);
			}
			render(&placed.order)
		},
		Operation::Get { id } => render(&service.get_order(id).await?),
		Operation::List { page, size } => render(&service.list_orders(page, size).await?),
		Operation::Update { params } => render(&service.update_order(&params, Actor::User).await?),
		Operation::History { id } => {
			let rows = service.order_history(id).await?;
			Ok(Value::Array(
				rows.iter()
					.map(|row| {
						json!({
							"id": row.id,
							"status": row.status,
							"updatedBy": row.updated_by.as_str(),
							"updatedAt": row.updated_at,
							"notes": row.notes,
						})
					})
					.collect(),
			))
		},
	}
}

fn render<T: Serialize>(value: &T) -> Result<Value, CommandError> {
	Ok(serde_json::to_value(value)?)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::factory_registry::build_system_from_config;
	use order_config::Config;

	const ALICE: &str = r#"{
		"customerName": "Alice",
		"items": [{"name": "Widget", "quantity": 2, "price": "9.99"}],
		"totalAmount": "19.98",
		"orderTime": "2024-05-01T10:00:00+02:00"
	}"#;

	#[test]
	fn test_parse_field() {
		assert_eq!(
			parse_field("customerName=a=b"),
			Ok(("customerName".to_string(), "a=b".to_string()))
		);
		assert!(parse_field("status").is_err());
	}

	#[test]
	fn test_operation_from_json() {
		let operation: Operation =
			serde_json::from_str(r#"{"op":"update","params":{"id":"5","status":"shipped"}}"#)
				.unwrap();
		let expected: HashMap<String, String> = [
			("id".to_string(), "5".to_string()),
			("status".to_string(), "shipped".to_string()),
		]
		.into_iter()
		.collect();
		assert_eq!(operation, Operation::Update { params: expected });

		let operation: Operation = serde_json::from_str(r#"{"op":"list"}"#).unwrap();
		assert_eq!(operation, Operation::List { page: 0, size: None });

		assert!(serde_json::from_str::<Operation>(r#"{"op":"delete","id":1}"#).is_err());
	}

	#[tokio::test]
	async fn test_update_command_carries_id() {
		let operation = Command::Update {
			id: "7".to_string(),
			fields: vec![("status".to_string(), "shipped".to_string())],
		}
		.into_operation()
		.await
		.unwrap();
		let Some(Operation::Update { params }) = operation else {
			panic!("expected an update operation");
		};
		assert_eq!(params.get("id").map(String::as_str), Some("7"));
		assert_eq!(params.get("status").map(String::as_str), Some("shipped"));

		assert_eq!(Command::Serve.into_operation().await.unwrap(), None);
	}

	#[tokio::test]
	async fn test_place_update_and_history() {
		let system = build_system_from_config(Config::for_testing()).unwrap();
		let handle = system.start_worker();
		let service = system.service();

		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("order.json");
		std::fs::write(&path, ALICE).unwrap();

		let place = Command::Place { file: path }
			.into_operation()
			.await
			.unwrap()
			.unwrap();
		let placed = execute(service, place).await.unwrap();
		assert_eq!(placed["status"], "CREATED");
		assert_eq!(placed["customerName"], "Alice");
		let id = placed["id"].as_u64().unwrap();
		handle.shutdown().await.unwrap();

		let mut params = HashMap::new();
		params.insert("id".to_string(), id.to_string());
		params.insert("status".to_string(), "shipped".to_string());
		let updated = execute(service, Operation::Update { params }).await.unwrap();
		assert_eq!(updated["status"], "SHIPPED");

		let history = execute(service, Operation::History { id }).await.unwrap();
		let statuses: Vec<_> = history
			.as_array()
			.unwrap()
			.iter()
			.map(|row| row["status"].as_str().unwrap().to_string())
			.collect();
		assert_eq!(statuses, vec!["CREATED", "PROCESSING", "SHIPPED"]);
		assert_eq!(history[1]["updatedBy"], "System");

		let page = execute(service, Operation::List { page: 0, size: None })
			.await
			.unwrap();
		assert_eq!(page["totalElements"], 1);
		assert_eq!(page["size"], 10);
	}

	#[tokio::test]
	async fn test_errors_carry_codes() {
		let system = build_system_from_config(Config::for_testing()).unwrap();

		let err = execute(system.service(), Operation::Get { id: 5 })
			.await
			.unwrap_err();
		assert_eq!(err.to_json()["code"], "ORDER_NOT_FOUND");

		let mut params = HashMap::new();
		params.insert("id".to_string(), "5".to_string());
		let err = execute(system.service(), Operation::Update { params })
			.await
			.unwrap_err();
		assert_eq!(err.to_json()["code"], "NO_UPDATE_FIELDS");

		let err = Command::Place {
			file: PathBuf::from("/nonexistent/order.json"),
		}
		.into_operation()
		.await
		.unwrap_err();
		assert!(matches!(err, CommandError::Read { .. }));
		assert_eq!(err.to_json()["code"], "INVALID_REQUEST");
	}
}
