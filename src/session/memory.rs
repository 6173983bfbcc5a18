//! In-process broker
//!
//! A small topic exchange with the AMQP behaviours the dispatcher and the
//! command publisher rely on:
//! - exchanges and queues must be declared up front (binding is passive)
//! - binding keys support `*` (one word) and `#` (zero or more words)
//! - one consumer per queue; messages published before the consumer starts
//!   are buffered, and the queue is handed back when the consumer is dropped
//!   or cancelled
//! - a consumer tag stays registered until `cancel`, even after its stream is
//!   dropped, like a client-side consumer on a live AMQP channel
//! - deliveries stay unacknowledged until settled; a requeue puts the message
//!   back on its queue flagged as redelivered, a plain reject drops it
//! - `disconnect` fails every active consumer, like a dropped connection
//!
//! All state sits behind one lock. Nothing here awaits while holding it.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, ready};

use async_trait::async_trait;
use futures::Stream;
use futures_util::StreamExt;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use crate::session::{Acknowledger, Broker, Delivery, DeliveryStream};
use crate::topic::{KEY_DELIMITER, Topic, queue_for};
use crate::utils::{FleetError, Result};

/// A message as it crossed the exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    /// Milliseconds since the UNIX epoch.
    pub timestamp: i64,
}

#[derive(Debug, Clone)]
struct PendingDelivery {
    queue: String,
    message: PublishedMessage,
}

#[derive(Debug)]
enum Feed {
    Message {
        tag: u64,
        message: PublishedMessage,
        redelivered: bool,
    },
    Lost(String),
    /// Wakes a waiting consumer so it can notice a cancel.
    Wake,
}

#[derive(Debug)]
struct Queue {
    bindings: HashSet<(String, String)>,
    sender: UnboundedSender<Feed>,
    receiver: Option<UnboundedReceiver<Feed>>,
}

impl Queue {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            bindings: HashSet::new(),
            sender,
            receiver: Some(receiver),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    exchanges: HashSet<String>,
    queues: HashMap<String, Queue>,
    pending_acks: HashMap<u64, PendingDelivery>,
    /// consumer tag -> queue
    consumers: HashMap<String, String>,
    published: Vec<PublishedMessage>,
    dropped: Vec<PublishedMessage>,
    next_tag: u64,
    closed: bool,
}

impl State {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(FleetError::SessionClosed);
        }
        Ok(())
    }

    fn enqueue(&mut self, queue: &str, message: PublishedMessage, redelivered: bool) {
        self.next_tag += 1;
        let tag = self.next_tag;
        if let Some(q) = self.queues.get(queue) {
            let feed = Feed::Message {
                tag,
                message,
                redelivered,
            };
            // the queue owns its receiver whenever no consumer holds it
            if q.sender.send(feed).is_err() {
                warn!("Queue '{queue}' has no receiver; message lost");
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A broker with `exchange` and the four telemetry queues already
    /// declared, as the upstream ingestion service would leave them.
    pub fn with_vehicle_topology(exchange: &str) -> Self {
        let broker = Self::new();
        broker.declare_exchange(exchange);
        for topic in Topic::TELEMETRY {
            if let Ok(queue) = queue_for(topic) {
                broker.declare_queue(queue);
            }
        }
        broker
    }

    pub fn declare_exchange(&self, exchange: &str) {
        self.lock().exchanges.insert(exchange.to_string());
    }

    pub fn declare_queue(&self, queue: &str) {
        self.lock()
            .queues
            .entry(queue.to_string())
            .or_insert_with(Queue::new);
    }

    /// Every message accepted by `publish`, in order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.lock().published.clone()
    }

    /// Messages rejected without requeue.
    pub fn dropped(&self) -> Vec<PublishedMessage> {
        self.lock().dropped.clone()
    }

    /// Deliveries handed to a consumer and not yet settled.
    pub fn unacked(&self) -> usize {
        self.lock().pending_acks.len()
    }

    /// Registered consumer tags, sorted.
    pub fn consumer_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.lock().consumers.keys().cloned().collect();
        tags.sort();
        tags
    }

    pub fn has_consumer(&self, queue: &str) -> bool {
        self.lock()
            .queues
            .get(queue)
            .is_some_and(|q| q.receiver.is_none())
    }

    /// Binding keys of `queue` on `exchange`.
    pub fn bindings(&self, queue: &str, exchange: &str) -> Vec<String> {
        let state = self.lock();
        let mut keys: Vec<String> = state
            .queues
            .get(queue)
            .map(|q| {
                q.bindings
                    .iter()
                    .filter(|(ex, _)| ex == exchange)
                    .map(|(_, key)| key.clone())
                    .collect()
            })
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Simulate connection loss: active consumers yield an error and every
    /// later operation fails with `SessionClosed`.
    pub fn disconnect(&self) {
        let mut state = self.lock();
        state.closed = true;
        for (name, queue) in &state.queues {
            if queue.receiver.is_none() {
                let _ = queue.sender.send(Feed::Lost("connection reset by peer".to_string()));
                debug!("Consumer on '{name}' notified of connection loss");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("MemoryBroker")
            .field("exchanges", &state.exchanges.len())
            .field("queues", &state.queues.len())
            .field("unacked", &state.pending_acks.len())
            .field("closed", &state.closed)
            .finish()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        let mut state = self.lock();
        state.ensure_open()?;

        let topology_error = |reason: &str| FleetError::Topology {
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            reason: reason.to_string(),
        };
        if !state.exchanges.contains(exchange) {
            return Err(topology_error("NOT_FOUND - no exchange"));
        }
        let q = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| topology_error("NOT_FOUND - no queue"))?;

        q.bindings
            .insert((exchange.to_string(), routing_key.to_string()));
        debug!("Bound '{queue}' to '{exchange}' with key '{routing_key}'");
        Ok(())
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream> {
        let mut state = self.lock();
        state.ensure_open()?;

        let consume_error = |reason: &str| FleetError::Consume {
            queue: queue.to_string(),
            reason: reason.to_string(),
        };
        if state.consumers.contains_key(consumer_tag) {
            return Err(consume_error("NOT_ALLOWED - reused consumer tag"));
        }
        let receiver = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| consume_error("NOT_FOUND - no queue"))?
            .receiver
            .take()
            .ok_or_else(|| consume_error("queue already has a consumer"))?;

        state
            .consumers
            .insert(consumer_tag.to_string(), queue.to_string());

        let consumer = QueueConsumer {
            queue: queue.to_string(),
            tag: consumer_tag.to_string(),
            receiver: Some(receiver),
            state: self.state.clone(),
        };
        Ok(consumer.boxed())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<()> {
        let mut state = self.lock();
        state.ensure_open()?;

        let Some(queue) = state.consumers.remove(consumer_tag) else {
            return Ok(());
        };
        if let Some(q) = state.queues.get(&queue) {
            let _ = q.sender.send(Feed::Wake);
        }
        debug!("Consumer {consumer_tag} on '{queue}' cancelled");
        Ok(())
    }

    async fn publish(&self, exchange: &str, routing_key: &str, body: &[u8]) -> Result<()> {
        let mut state = self.lock();
        state.ensure_open()?;

        if !state.exchanges.contains(exchange) {
            return Err(FleetError::Publish {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                reason: "NOT_FOUND - no exchange".to_string(),
            });
        }

        let message = PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body: body.to_vec(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        state.published.push(message.clone());

        let targets: Vec<String> = state
            .queues
            .iter()
            .filter(|(_, q)| {
                q.bindings
                    .iter()
                    .any(|(ex, key)| ex == exchange && binding_matches(key, routing_key))
            })
            .map(|(name, _)| name.clone())
            .collect();

        if targets.is_empty() {
            debug!("Message with key '{routing_key}' on '{exchange}' was unroutable");
        }
        for queue in targets {
            state.enqueue(&queue, message.clone(), false);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.lock().closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// AMQP topic-exchange matching of a binding key against a routing key.
pub fn binding_matches(binding: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = binding.split(KEY_DELIMITER).collect();
    let words: Vec<&str> = routing_key.split(KEY_DELIMITER).collect();
    words_match(&pattern, &words)
}

fn words_match(pattern: &[&str], words: &[&str]) -> bool {
    match pattern.split_first() {
        None => words.is_empty(),
        Some((&"#", rest)) => (0..=words.len()).any(|skip| words_match(rest, &words[skip..])),
        Some((&"*", rest)) => !words.is_empty() && words_match(rest, &words[1..]),
        Some((word, rest)) => words.first() == Some(word) && words_match(rest, &words[1..]),
    }
}

struct QueueConsumer {
    queue: String,
    tag: String,
    receiver: Option<UnboundedReceiver<Feed>>,
    state: Arc<Mutex<State>>,
}

impl Stream for QueueConsumer {
    type Item = Result<Delivery>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if this.receiver.is_none() {
                return Poll::Ready(None);
            }
            if !this.is_registered() {
                // cancelled: later messages stay on the queue
                this.hand_back();
                return Poll::Ready(None);
            }
            let Some(receiver) = this.receiver.as_mut() else {
                return Poll::Ready(None);
            };

            match ready!(receiver.poll_recv(cx)) {
                Some(Feed::Message {
                    tag,
                    message,
                    redelivered,
                }) => {
                    let delivery = Delivery::new(
                        message.routing_key.clone(),
                        message.body.clone(),
                        redelivered,
                        Box::new(MemoryAcker {
                            tag,
                            state: this.state.clone(),
                            settled: AtomicBool::new(false),
                        }),
                    );
                    this.lock().pending_acks.insert(
                        tag,
                        PendingDelivery {
                            queue: this.queue.clone(),
                            message,
                        },
                    );
                    return Poll::Ready(Some(Ok(delivery)));
                }
                Some(Feed::Lost(reason)) => {
                    // a lost consumer yields nothing further
                    this.receiver = None;
                    return Poll::Ready(Some(Err(FleetError::Consume {
                        queue: this.queue.clone(),
                        reason,
                    })));
                }
                Some(Feed::Wake) => continue,
                None => return Poll::Ready(None),
            }
        }
    }
}

impl QueueConsumer {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_registered(&self) -> bool {
        self.lock().consumers.contains_key(&self.tag)
    }

    fn hand_back(&mut self) {
        if let Some(receiver) = self.receiver.take() {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(queue) = state.queues.get_mut(&self.queue) {
                queue.receiver = Some(receiver);
            }
        }
    }
}

impl Drop for QueueConsumer {
    fn drop(&mut self) {
        self.hand_back();
    }
}

struct MemoryAcker {
    tag: u64,
    state: Arc<Mutex<State>>,
    settled: AtomicBool,
}

impl MemoryAcker {
    fn take_pending(&self) -> Result<Option<PendingDelivery>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.ensure_open()?;
        if self.settled.swap(true, Ordering::SeqCst) {
            return Err(FleetError::Acknowledge {
                reason: format!("delivery {} already settled", self.tag),
            });
        }
        let pending = state.pending_acks.remove(&self.tag);
        if pending.is_none() {
            warn!("Settled unknown delivery tag {}", self.tag);
        }
        Ok(pending)
    }
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<()> {
        self.take_pending()?;
        Ok(())
    }

    async fn reject(&self, requeue: bool) -> Result<()> {
        let Some(pending) = self.take_pending()? else {
            return Ok(());
        };

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if requeue {
            state.enqueue(&pending.queue, pending.message, true);
        } else {
            state.dropped.push(pending.message);
        }
        Ok(())
    }
}
