//! Holdfast queue layer
//!
//! [`JobQueueGateway`] publishes lifecycle intents onto durable named queues,
//! directly or through exchanges. Every publish acquires its own broker
//! channel and releases it when done. [`IntentConsumer`] is the worker pool
//! that claims those messages and hands them to an [`IntentHandler`].

pub mod broker;
pub mod consumer;
pub mod gateway;
pub mod memory;

pub use broker::{Broker, BrokerChannel, MessageSource, PgBroker};
pub use consumer::{ConsumerConfig, IntentConsumer, IntentHandler, Outcome};
pub use gateway::JobQueueGateway;
pub use memory::MemoryBroker;
