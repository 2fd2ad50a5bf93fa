//! InMemoryBroker - in-process broker with at-least-once delivery.
//!
//! - `HashMap<String, VecDeque<_>>` holds one FIFO per queue name.
//! - Polled messages move to an unacked table owned by the polling channel.
//! - Closing or dropping a channel puts its unacked messages back at the
//!   head of their queue, flagged as redelivered.
//! - Queues are created on first use.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::domain::BrokerError;
use crate::ports::{BrokerChannel, Connector, Delivery, DeliveryTag, Message};

#[derive(Debug)]
struct Queued {
    message: Message,
    redelivered: bool,
}

#[derive(Debug)]
struct Unacked {
    channel: u64,
    queue: String,
    message: Message,
}

#[derive(Debug)]
struct BrokerState {
    queues: HashMap<String, VecDeque<Queued>>,
    unacked: HashMap<DeliveryTag, Unacked>,
    acked: HashMap<String, usize>,
    next_tag: u64,
    next_channel: u64,
    reachable: bool,
}

impl BrokerState {
    fn new() -> Self {
        Self {
            queues: HashMap::new(),
            unacked: HashMap::new(),
            acked: HashMap::new(),
            next_tag: 1,
            next_channel: 1,
            reachable: true,
        }
    }

    fn ensure_reachable(&self) -> Result<(), BrokerError> {
        if self.reachable {
            Ok(())
        } else {
            Err(BrokerError::Unreachable("in-memory broker is down".to_string()))
        }
    }

    /// Requeue everything `channel` polled but never acknowledged.
    fn release(&mut self, channel: u64) {
        let mut tags: Vec<DeliveryTag> = self
            .unacked
            .iter()
            .filter(|(_, u)| u.channel == channel)
            .map(|(tag, _)| *tag)
            .collect();
        // 新しい順に push_front すれば元の並びに戻る
        tags.sort_unstable_by(|a, b| b.cmp(a));

        for tag in tags {
            if let Some(unacked) = self.unacked.remove(&tag) {
                debug!(queue = %unacked.queue, %tag, "requeueing unacknowledged delivery");
                self.queues
                    .entry(unacked.queue)
                    .or_default()
                    .push_front(Queued {
                        message: unacked.message,
                        redelivered: true,
                    });
            }
        }
    }
}

/// Shared broker; clone it to hand the same broker to several components.
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Simulate an outage. Existing channels fail with `Unreachable` and new
    /// connections are refused until reachability is restored.
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    /// Messages currently waiting in `queue` (excluding unacked ones).
    pub fn queue_len(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, VecDeque::len)
    }

    /// Deliveries handed out and not yet acknowledged, across all queues.
    pub fn unacked_len(&self) -> usize {
        self.lock().unacked.len()
    }

    /// How many deliveries from `queue` have been acknowledged so far.
    pub fn acked_count(&self, queue: &str) -> usize {
        self.lock().acked.get(queue).copied().unwrap_or(0)
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for InMemoryBroker {
    async fn connect(&self) -> Result<Box<dyn BrokerChannel>, BrokerError> {
        let mut state = self.lock();
        state.ensure_reachable()?;
        let id = state.next_channel;
        state.next_channel += 1;
        debug!(channel = id, "opened in-memory broker channel");
        Ok(Box::new(InMemoryChannel {
            id,
            state: Arc::clone(&self.state),
            closed: false,
        }))
    }
}

pub struct InMemoryChannel {
    id: u64,
    state: Arc<Mutex<BrokerState>>,
    closed: bool,
}

impl InMemoryChannel {
    fn open_state(&self) -> Result<MutexGuard<'_, BrokerState>, BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.ensure_reachable()?;
        Ok(state)
    }
}

#[async_trait]
impl BrokerChannel for InMemoryChannel {
    async fn reset(&mut self, queue: &str) -> Result<(), BrokerError> {
        let mut state = self.open_state()?;
        state.unacked.retain(|_, u| u.queue != queue);
        state.queues.insert(queue.to_string(), VecDeque::new());
        debug!(channel = self.id, queue, "queue reset");
        Ok(())
    }

    async fn publish(&mut self, queue: &str, message: Message) -> Result<(), BrokerError> {
        let mut state = self.open_state()?;
        state
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(Queued {
                message,
                redelivered: false,
            });
        trace!(channel = self.id, queue, "published");
        Ok(())
    }

    async fn poll(&mut self, queue: &str) -> Result<Option<Delivery>, BrokerError> {
        let mut state = self.open_state()?;
        let Some(queued) = state.queues.get_mut(queue).and_then(VecDeque::pop_front) else {
            return Ok(None);
        };

        let tag = DeliveryTag(state.next_tag);
        state.next_tag += 1;
        state.unacked.insert(
            tag,
            Unacked {
                channel: self.id,
                queue: queue.to_string(),
                message: queued.message.clone(),
            },
        );

        Ok(Some(Delivery {
            tag,
            message: queued.message,
            redelivered: queued.redelivered,
        }))
    }

    async fn ack(&mut self, tag: DeliveryTag) -> Result<(), BrokerError> {
        let mut state = self.open_state()?;
        match state.unacked.get(&tag) {
            Some(unacked) if unacked.channel == self.id => {}
            _ => return Err(BrokerError::UnknownDelivery(tag.0)),
        }
        if let Some(unacked) = state.unacked.remove(&tag) {
            *state.acked.entry(unacked.queue).or_default() += 1;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .release(self.id);
        debug!(channel = self.id, "closed in-memory broker channel");
        Ok(())
    }
}

impl Drop for InMemoryChannel {
    fn drop(&mut self) {
        if !self.closed {
            self.state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .release(self.id);
        }
    }
}
