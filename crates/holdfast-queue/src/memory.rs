//! In-process broker.
//!
//! Implements both the publishing and the consuming side so the gateway,
//! the consumer pool and the services built on them can be exercised without
//! Postgres. Claims never expire; released messages go back to the tail of
//! their queue.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

use holdfast_core::constants::DEFAULT_BINDINGS;
use holdfast_core::models::{LifecycleIntent, QueueMessage};
use holdfast_core::{PinError, PinResult};

use crate::broker::{Broker, BrokerChannel, MessageSource};

#[derive(Default)]
struct State {
    next_id: i64,
    queues: BTreeMap<String, VecDeque<QueueMessage>>,
    bindings: HashMap<String, BTreeSet<String>>,
    in_flight: HashMap<i64, QueueMessage>,
    dead_letters: Vec<QueueMessage>,
}

impl State {
    fn enqueue(&mut self, queue_name: &str, exchange_name: Option<&str>, payload: &serde_json::Value) {
        self.next_id += 1;
        let message = QueueMessage {
            id: self.next_id,
            queue_name: queue_name.to_string(),
            exchange_name: exchange_name.map(String::from),
            payload: payload.clone(),
            delivery_count: 0,
            visible_at: Utc::now(),
            locked_by: None,
            last_error: None,
            created_at: Utc::now(),
        };
        self.queues
            .entry(queue_name.to_string())
            .or_default()
            .push_back(message);
    }
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    unavailable: AtomicBool,
    open_channels: AtomicUsize,
    channels_opened: AtomicUsize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone, Default)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl MemoryBroker {
    /// Broker with no bindings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Broker with the standard exchange bindings already declared.
    pub fn with_default_topology() -> Self {
        let broker = Self::new();
        {
            let mut state = broker.shared.lock();
            for (exchange, queue) in DEFAULT_BINDINGS {
                state
                    .bindings
                    .entry(exchange.to_string())
                    .or_default()
                    .insert(queue.to_string());
            }
        }
        broker
    }

    /// Simulate an outage: while set, opening channels and publishing fail.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.shared.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Messages waiting on `queue_name` (not claimed).
    pub fn pending(&self, queue_name: &str) -> Vec<QueueMessage> {
        self.shared
            .lock()
            .queues
            .get(queue_name)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn pending_count(&self, queue_name: &str) -> usize {
        self.pending(queue_name).len()
    }

    /// Decoded intents waiting on `queue_name`.
    pub fn intents(&self, queue_name: &str) -> Vec<LifecycleIntent> {
        self.pending(queue_name)
            .iter()
            .filter_map(|m| m.intent().ok())
            .collect()
    }

    pub fn dead_letters(&self) -> Vec<QueueMessage> {
        self.shared.lock().dead_letters.clone()
    }

    pub fn in_flight_count(&self) -> usize {
        self.shared.lock().in_flight.len()
    }

    /// Channels currently held by callers.
    pub fn open_channels(&self) -> usize {
        self.shared.open_channels.load(Ordering::SeqCst)
    }

    /// Channels handed out since creation.
    pub fn channels_opened(&self) -> usize {
        self.shared.channels_opened.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> PinResult<()> {
        if self.shared.unavailable.load(Ordering::SeqCst) {
            return Err(PinError::QueueInitialization(
                "broker connection refused".to_string(),
            ));
        }
        Ok(())
    }
}

struct MemoryChannel {
    shared: Arc<Shared>,
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        self.shared.open_channels.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryChannel {
    fn check_available(&self, target: &str) -> PinResult<()> {
        if self.shared.unavailable.load(Ordering::SeqCst) {
            return Err(PinError::publish(target, "broker connection lost"));
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn publish(&mut self, queue_name: &str, payload: &serde_json::Value) -> PinResult<()> {
        self.check_available(queue_name)?;
        self.shared.lock().enqueue(queue_name, None, payload);
        Ok(())
    }

    async fn publish_to_exchange(
        &mut self,
        exchange_name: &str,
        payload: &serde_json::Value,
    ) -> PinResult<usize> {
        self.check_available(exchange_name)?;
        let mut state = self.shared.lock();
        let queues: Vec<String> = state
            .bindings
            .get(exchange_name)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default();
        if queues.is_empty() {
            return Err(PinError::publish(
                exchange_name,
                "exchange has no bound queues",
            ));
        }
        for queue in &queues {
            state.enqueue(queue, Some(exchange_name), payload);
        }
        Ok(queues.len())
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn open_channel(&self) -> PinResult<Box<dyn BrokerChannel>> {
        self.check_available()?;
        self.shared.open_channels.fetch_add(1, Ordering::SeqCst);
        self.shared.channels_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryChannel {
            shared: self.shared.clone(),
        }))
    }

    async fn bind_queue(&self, exchange_name: &str, queue_name: &str) -> PinResult<()> {
        self.check_available()?;
        self.shared
            .lock()
            .bindings
            .entry(exchange_name.to_string())
            .or_default()
            .insert(queue_name.to_string());
        Ok(())
    }
}

#[async_trait]
impl MessageSource for MemoryBroker {
    async fn claim(
        &self,
        queues: &[String],
        consumer_id: Uuid,
        _visibility: Duration,
    ) -> PinResult<Option<QueueMessage>> {
        let mut state = self.shared.lock();
        let now = Utc::now();

        // Oldest visible message across the requested queues.
        let candidate = queues
            .iter()
            .filter_map(|name| {
                state
                    .queues
                    .get(name)
                    .and_then(|q| q.iter().position(|m| m.visible_at <= now).map(|i| (name, i)))
            })
            .min_by_key(|(name, i)| state.queues[name.as_str()][*i].id)
            .map(|(name, i)| (name.clone(), i));

        let Some((name, index)) = candidate else {
            return Ok(None);
        };
        let Some(mut message) = state.queues.get_mut(&name).and_then(|q| q.remove(index)) else {
            return Ok(None);
        };
        message.delivery_count += 1;
        message.locked_by = Some(consumer_id);
        state.in_flight.insert(message.id, message.clone());
        Ok(Some(message))
    }

    async fn ack(&self, message_id: i64, consumer_id: Uuid) -> PinResult<bool> {
        let mut state = self.shared.lock();
        match state.in_flight.get(&message_id) {
            Some(m) if m.locked_by == Some(consumer_id) => {
                state.in_flight.remove(&message_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(
        &self,
        message_id: i64,
        consumer_id: Uuid,
        delay: Duration,
        error: &str,
    ) -> PinResult<()> {
        let mut state = self.shared.lock();
        if let Some(mut message) = state.in_flight.remove(&message_id) {
            if message.locked_by != Some(consumer_id) {
                state.in_flight.insert(message_id, message);
                return Ok(());
            }
            message.locked_by = None;
            message.last_error = Some(error.to_string());
            message.visible_at = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            state
                .queues
                .entry(message.queue_name.clone())
                .or_default()
                .push_back(message);
        }
        Ok(())
    }

    async fn dead_letter(&self, message_id: i64, consumer_id: Uuid, error: &str) -> PinResult<()> {
        let mut state = self.shared.lock();
        if let Some(mut message) = state.in_flight.remove(&message_id) {
            if message.locked_by != Some(consumer_id) {
                state.in_flight.insert(message_id, message);
                return Ok(());
            }
            message.last_error = Some(error.to_string());
            state.dead_letters.push(message);
        }
        Ok(())
    }
}
