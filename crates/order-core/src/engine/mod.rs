//! Core order engine that ties the service to its background worker.
//!
//! The engine owns the order service used by callers and drives the status
//! worker from the event bus. Worker handling runs in spawned tasks bounded by
//! a semaphore, so a slow handler never stops the receive loop.

pub mod event_bus;

use crate::service::OrderService;
use crate::state::OrderStore;
use crate::worker::StatusWorker;
use order_config::Config;
use order_types::OrderEvent;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
	#[error("Worker loop failed: {0}")]
	Worker(String),
}

/// Order engine coordinating the service and the status worker.
#[derive(Clone)]
pub struct OrderSystem {
	config: Config,
	service: Arc<OrderService>,
	worker: Arc<StatusWorker>,
	event_bus: event_bus::EventBus,
}

impl OrderSystem {
	pub fn new(config: Config, store: Arc<OrderStore>, event_bus: event_bus::EventBus) -> Self {
		let service = Arc::new(OrderService::new(
			store.clone(),
			Arc::new(event_bus.clone()),
			config.lifecycle.clone(),
		));
		let worker = Arc::new(StatusWorker::new(
			store,
			config.worker.processing_delay(),
			config.lifecycle.strict_transitions,
		));

		Self {
			config,
			service,
			worker,
			event_bus,
		}
	}

	/// Returns the order service used by callers.
	pub fn service(&self) -> &Arc<OrderService> {
		&self.service
	}

	/// Starts the status worker in the background.
	///
	/// The worker subscribes before this returns, so every order placed
	/// afterwards is delivered to it.
	pub fn start_worker(&self) -> WorkerHandle {
		let receiver = self.event_bus.subscribe();
		let (shutdown_tx, shutdown_rx) = oneshot::channel();
		let engine = self.clone();
		let task = tokio::spawn(async move { engine.worker_loop(receiver, shutdown_rx).await });
		tracing::debug!(service_id = %self.config.service.id, "Status worker started");

		WorkerHandle {
			shutdown: Some(shutdown_tx),
			task,
		}
	}

	async fn worker_loop(
		&self,
		mut receiver: mpsc::UnboundedReceiver<OrderEvent>,
		mut shutdown: oneshot::Receiver<()>,
	) {
		let semaphore = Arc::new(Semaphore::new(self.config.worker.max_concurrent));
		let mut tasks = JoinSet::new();

		loop {
			tokio::select! {
				event = receiver.recv() => match event {
					Some(event) => self.dispatch(&semaphore, &mut tasks, event),
					None => break,
				},

				Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
					if let Err(e) = joined {
						tracing::error!("Worker task failed: {}", e);
					}
				},

				_ = &mut shutdown => break,
			}
		}

		// Later publishes fail; events already queued belong to placed orders
		receiver.close();
		while let Some(event) = receiver.recv().await {
			self.dispatch(&semaphore, &mut tasks, event);
		}

		let in_flight = tasks.len();
		if in_flight > 0 {
			tracing::info!(in_flight, "Waiting for worker tasks to finish");
		}
		while let Some(joined) = tasks.join_next().await {
			if let Err(e) = joined {
				tracing::error!("Worker task failed: {}", e);
			}
		}
	}

	fn dispatch(&self, semaphore: &Arc<Semaphore>, tasks: &mut JoinSet<()>, event: OrderEvent) {
		match event {
			OrderEvent::Placed { order_id } => {
				self.spawn_handler(semaphore, tasks, move |engine| async move {
					engine
						.worker
						.handle_placed(order_id)
						.await
						.map_err(|e| EngineError::Worker(format!("order {}: {}", order_id, e)))
				});
			},
		}
	}

	/// Spawns a handler task that runs once a semaphore permit is available.
	///
	/// The permit is awaited inside the task, so the receive loop never
	/// waits on a busy worker. Handler errors are logged and never escalated.
	fn spawn_handler<F, Fut>(&self, semaphore: &Arc<Semaphore>, tasks: &mut JoinSet<()>, handler: F)
	where
		F: FnOnce(OrderSystem) -> Fut + Send + 'static,
		Fut: Future<Output = Result<(), EngineError>> + Send + 'static,
	{
		let engine = self.clone();
		let semaphore = semaphore.clone();
		tasks.spawn(async move {
			let _permit = match semaphore.acquire_owned().await {
				Ok(permit) => permit, // Keep permit alive for duration of task
				Err(e) => {
					tracing::error!("Failed to acquire semaphore permit: {}", e);
					return;
				},
			};
			if let Err(e) = handler(engine).await {
				tracing::error!("Handler error: {}", e);
			}
		});
	}
}

/// Handle to a running status worker.
pub struct WorkerHandle {
	shutdown: Option<oneshot::Sender<()>>,
	task: JoinHandle<()>,
}

impl WorkerHandle {
	/// Stops receiving new events and waits for queued and in-flight work.
	pub async fn shutdown(mut self) -> Result<(), EngineError> {
		if let Some(tx) = self.shutdown.take() {
			// The loop may already have exited on a closed channel
			let _ = tx.send(());
		}
		(&mut self.task)
			.await
			.map_err(|e| EngineError::Worker(e.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::service::EventDelivery;
	use chrono::DateTime;
	use order_storage::{implementations::memory::MemoryStorage, StorageService};
	use order_types::{Actor, LineItemRequest, OrderStatus, PlaceOrderRequest};
	use rust_decimal::Decimal;
	use std::collections::HashMap;
	use std::time::Duration;

	fn system(delay_ms: u64) -> OrderSystem {
		system_with(delay_ms, 8)
	}

	fn system_with(delay_ms: u64, max_concurrent: usize) -> OrderSystem {
		let mut config = Config::for_testing();
		config.worker.processing_delay_ms = delay_ms;
		config.worker.max_concurrent = max_concurrent;
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let store = Arc::new(OrderStore::new(storage, config.lifecycle.max_write_attempts));
		OrderSystem::new(config, store, event_bus::EventBus::new())
	}

	fn alice() -> PlaceOrderRequest {
		PlaceOrderRequest {
			customer_name: "Alice".into(),
			items: vec![LineItemRequest {
				name: "Widget".into(),
				quantity: 2,
				price: Decimal::new(999, 2),
			}],
			total_amount: Some(Decimal::new(1998, 2)),
			order_time: DateTime::parse_from_rfc3339("2024-05-01T10:00:00+02:00").unwrap(),
		}
	}

	#[tokio::test(start_paused = true)]
	async fn test_placed_order_reaches_processing() {
		let system = system(2000);
		let handle = system.start_worker();
		let service = system.service();

		let placed = service.place_order(alice(), Actor::User).await.unwrap();
		assert_eq!(placed.order.status, "CREATED");
		assert_eq!(placed.order.items.len(), 1);
		assert_eq!(placed.order.items[0].quantity, 2);
		assert_eq!(placed.event, EventDelivery::Published { receivers: 1 });

		// Still waiting on the processing delay
		tokio::time::sleep(Duration::from_millis(1500)).await;
		let id = placed.order.id;
		assert_eq!(service.get_order(id).await.unwrap().status, "CREATED");

		tokio::time::sleep(Duration::from_secs(1)).await;
		assert_eq!(service.get_order(id).await.unwrap().status, "PROCESSING");

		let history = service.order_history(id).await.unwrap();
		assert_eq!(
			history.iter().map(|row| row.status).collect::<Vec<_>>(),
			vec![OrderStatus::Created, OrderStatus::Processing]
		);
		assert_eq!(history[0].updated_by, Actor::User);
		assert_eq!(history[1].updated_by, Actor::System);

		handle.shutdown().await.unwrap();
	}

	#[tokio::test(start_paused = true)]
	async fn test_delay_does_not_serialize_events() {
		let system = system(2000);
		let handle = system.start_worker();

		let started = tokio::time::Instant::now();
		let mut ids = Vec::new();
		for _ in 0..5 {
			ids.push(
				system
					.service()
					.place_order(alice(), Actor::User)
					.await
					.unwrap()
					.order
					.id,
			);
		}
		handle.shutdown().await.unwrap();

		// Five delays ran side by side
		assert!(started.elapsed() < Duration::from_secs(4));
		for id in ids {
			assert_eq!(
				system.service().get_order(id).await.unwrap().status,
				"PROCESSING"
			);
		}
	}

	#[tokio::test(start_paused = true)]
	async fn test_shutdown_drains_in_flight_work() {
		let system = system(2000);
		let handle = system.start_worker();
		let id = system
			.service()
			.place_order(alice(), Actor::User)
			.await
			.unwrap()
			.order
			.id;

		handle.shutdown().await.unwrap();
		assert_eq!(
			system.service().get_order(id).await.unwrap().status,
			"PROCESSING"
		);
	}

	#[tokio::test(start_paused = true)]
	async fn test_user_update_during_delay_survives() {
		let system = system(2000);
		let handle = system.start_worker();
		let service = system.service();
		let id = service.place_order(alice(), Actor::User).await.unwrap().order.id;

		let params: HashMap<String, String> = [
			("id".to_string(), id.to_string()),
			("customerName".to_string(), "Alicia".to_string()),
		]
		.into_iter()
		.collect();
		service.update_order(&params, Actor::User).await.unwrap();

		handle.shutdown().await.unwrap();
		let view = service.get_order(id).await.unwrap();
		assert_eq!(view.customer_name, "Alicia");
		assert_eq!(view.status, "PROCESSING");
	}

	async fn place_many(system: &OrderSystem, count: usize) -> Vec<u64> {
		let mut ids = Vec::with_capacity(count);
		for _ in 0..count {
			let placed = system
				.service()
				.place_order(alice(), Actor::User)
				.await
				.unwrap();
			assert_eq!(placed.event, EventDelivery::Published { receivers: 1 });
			ids.push(placed.order.id);
		}
		ids
	}

	async fn statuses(system: &OrderSystem, ids: &[u64]) -> Vec<String> {
		let mut statuses = Vec::with_capacity(ids.len());
		for id in ids {
			statuses.push(system.service().get_order(*id).await.unwrap().status);
		}
		statuses
	}

	#[tokio::test(start_paused = true)]
	async fn test_saturated_worker_keeps_receiving() {
		let system = system_with(2000, 1);
		let handle = system.start_worker();
		let ids = place_many(&system, 4).await;

		// One slot, four delays back to back
		tokio::time::sleep(Duration::from_secs(10)).await;
		assert_eq!(statuses(&system, &ids).await, vec!["PROCESSING"; 4]);

		handle.shutdown().await.unwrap();
	}

	#[tokio::test(start_paused = true)]
	async fn test_shutdown_drains_queued_events() {
		let system = system_with(2000, 1);
		let handle = system.start_worker();
		let ids = place_many(&system, 6).await;

		handle.shutdown().await.unwrap();
		assert_eq!(statuses(&system, &ids).await, vec!["PROCESSING"; 6]);

		// The worker is gone, so later events have no receiver
		let placed = system
			.service()
			.place_order(alice(), Actor::User)
			.await
			.unwrap();
		assert!(matches!(placed.event, EventDelivery::Failed { .. }));
	}
}
