//! Core of the order lifecycle system.
//!
//! This crate provides the order store, the lifecycle service callers interact
//! with, the background status worker and the engine that connects them over
//! the event bus. The synchronous update path and the worker both mutate
//! orders; versioned commits in the store keep either side from losing the
//! other's changes.

pub mod builder;
pub mod engine;
pub mod service;
pub mod state;
pub mod worker;

pub use builder::{BuilderError, OrderFactories, OrderSystemBuilder};
pub use engine::event_bus::{ChannelError, EventBus, EventChannel};
pub use engine::{EngineError, OrderSystem, WorkerHandle};
pub use service::{EventDelivery, OrderError, OrderService, PlacedOrder, UPDATE_NOTE};
pub use state::{OrderStore, StoreError};
pub use worker::{StatusWorker, PROCESSING_NOTE};
