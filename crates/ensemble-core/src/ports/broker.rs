//! Broker port - session-scoped named queues.
//!
//! This is the only path between the controller and the dispatch worker.
//! Delivery is at-least-once: a polled message stays owned by the channel
//! that polled it until `ack`, and is redelivered if that channel goes away
//! first.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::BrokerError;

/// Handle of a polled, not yet acknowledged message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryTag(pub u64);

impl fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub body: Vec<u8>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
}

impl Message {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            correlation_id: None,
            reply_to: None,
        }
    }

    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_vec(value).map(Self::new)
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_reply_to(mut self, queue: impl Into<String>) -> Self {
        self.reply_to = Some(queue.into());
        self
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub message: Message,
    /// Set when this message was handed out before and never acknowledged.
    pub redelivered: bool,
}

/// One component's connection to the broker.
#[async_trait]
pub trait BrokerChannel: Send {
    /// Delete and recreate `queue`, dropping everything in it.
    async fn reset(&mut self, queue: &str) -> Result<(), BrokerError>;

    /// Fire-and-forget enqueue.
    async fn publish(&mut self, queue: &str, message: Message) -> Result<(), BrokerError>;

    /// Non-blocking: one message or `None`, never waits for arrival.
    async fn poll(&mut self, queue: &str) -> Result<Option<Delivery>, BrokerError>;

    async fn ack(&mut self, tag: DeliveryTag) -> Result<(), BrokerError>;

    /// Release the connection; unacknowledged deliveries are requeued.
    async fn close(&mut self) -> Result<(), BrokerError>;
}

/// Opens independent channels, one per component.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn BrokerChannel>, BrokerError>;
}
