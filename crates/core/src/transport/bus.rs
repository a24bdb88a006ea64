//! In-process durable-queue path.
//!
//! Messages are JSON-encoded and published under a routing key. A
//! [`QueueConsumer`] drains one routing key into a [`MessageHandler`] and
//! applies its acknowledgement: accepted messages are dropped, rejected ones
//! are dead-lettered immediately, requeued ones are redelivered until the
//! redelivery budget is spent and then dead-lettered.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::retry::RetryPolicy;
use crate::transport::messages::{encode, EXCHANGE_NAME, REQUEST_ROUTING_KEY, RESULT_ROUTING_KEY};
use crate::transport::{
    ApprovalRequest, ApprovalResult, RequestDelivery, ResultDelivery, TransportError,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub routing_key: &'static str,
    pub payload: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct QueueBus {
    requests: mpsc::Sender<Envelope>,
    results: mpsc::Sender<Envelope>,
}

/// Receiving ends handed to the consumers.
#[derive(Debug)]
pub struct Subscriptions {
    pub requests: mpsc::Receiver<Envelope>,
    pub results: mpsc::Receiver<Envelope>,
}

impl QueueBus {
    pub fn new(capacity: usize) -> (Self, Subscriptions) {
        let capacity = capacity.max(1);
        let (requests, request_rx) = mpsc::channel(capacity);
        let (results, result_rx) = mpsc::channel(capacity);
        (Self { requests, results }, Subscriptions { requests: request_rx, results: result_rx })
    }

    pub async fn publish(
        &self,
        routing_key: &'static str,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        let sender = match routing_key {
            REQUEST_ROUTING_KEY => &self.requests,
            RESULT_ROUTING_KEY => &self.results,
            other => {
                return Err(TransportError::Rejected {
                    status: 404,
                    message: format!("no queue bound to routing key `{other}`"),
                })
            }
        };
        sender
            .send(Envelope { routing_key, payload })
            .await
            .map_err(|_| TransportError::Closed(format!("consumer for `{routing_key}` stopped")))
    }
}

#[async_trait]
impl RequestDelivery for QueueBus {
    async fn deliver_request(&self, request: &ApprovalRequest) -> Result<(), TransportError> {
        self.publish(REQUEST_ROUTING_KEY, encode(request)?).await
    }
}

#[async_trait]
impl ResultDelivery for QueueBus {
    async fn deliver_result(&self, result: &ApprovalResult) -> Result<(), TransportError> {
        self.publish(RESULT_ROUTING_KEY, encode(result)?).await
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Ack {
    Accept,
    /// Permanently undeliverable, e.g. a payload that does not decode.
    Reject(String),
    /// Worth another delivery.
    Requeue(String),
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, payload: &[u8]) -> Ack;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeadLetter {
    pub routing_key: &'static str,
    pub payload: Vec<u8>,
    pub reason: String,
    pub deliveries: u32,
}

/// Shared record of messages the consumers gave up on.
#[derive(Clone, Debug, Default)]
pub struct DeadLetterLog {
    entries: Arc<Mutex<Vec<DeadLetter>>>,
}

impl DeadLetterLog {
    pub fn record(&self, letter: DeadLetter) {
        match self.entries.lock() {
            Ok(mut entries) => entries.push(letter),
            Err(poisoned) => poisoned.into_inner().push(letter),
        }
    }

    pub fn entries(&self) -> Vec<DeadLetter> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        match self.entries.lock() {
            Ok(entries) => entries.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct QueueConsumer {
    routing_key: &'static str,
    receiver: mpsc::Receiver<Envelope>,
    handler: Arc<dyn MessageHandler>,
    redelivery: RetryPolicy,
    dead_letters: DeadLetterLog,
}

impl QueueConsumer {
    pub fn new(
        routing_key: &'static str,
        receiver: mpsc::Receiver<Envelope>,
        handler: Arc<dyn MessageHandler>,
        redelivery: RetryPolicy,
        dead_letters: DeadLetterLog,
    ) -> Self {
        Self { routing_key, receiver, handler, redelivery, dead_letters }
    }

    /// Drains the queue until every publisher has been dropped.
    pub async fn run(mut self) {
        info!(
            event_name = "transport.consumer.started",
            exchange = EXCHANGE_NAME,
            routing_key = self.routing_key,
            "queue consumer started"
        );
        while let Some(envelope) = self.receiver.recv().await {
            self.process(envelope).await;
        }
        info!(
            event_name = "transport.consumer.stopped",
            routing_key = self.routing_key,
            "queue consumer stopped"
        );
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn process(&self, envelope: Envelope) {
        let max_deliveries = self.redelivery.attempts();
        let mut delivery = 1;
        loop {
            match self.handler.handle(&envelope.payload).await {
                Ack::Accept => return,
                Ack::Reject(reason) => {
                    error!(
                        event_name = "transport.message.rejected",
                        routing_key = envelope.routing_key,
                        reason = %reason,
                        "message rejected without requeue"
                    );
                    self.dead_letter(envelope, reason, delivery);
                    return;
                }
                Ack::Requeue(reason) if delivery < max_deliveries => {
                    warn!(
                        event_name = "transport.message.requeued",
                        routing_key = envelope.routing_key,
                        delivery,
                        max_deliveries,
                        reason = %reason,
                        "message requeued"
                    );
                    self.redelivery.pause().await;
                    delivery += 1;
                }
                Ack::Requeue(reason) => {
                    error!(
                        event_name = "transport.message.redelivery_exhausted",
                        routing_key = envelope.routing_key,
                        deliveries = delivery,
                        reason = %reason,
                        "message dead-lettered after repeated failures"
                    );
                    self.dead_letter(envelope, reason, delivery);
                    return;
                }
            }
        }
    }

    fn dead_letter(&self, envelope: Envelope, reason: String, deliveries: u32) {
        self.dead_letters.record(DeadLetter {
            routing_key: envelope.routing_key,
            payload: envelope.payload,
            reason,
            deliveries,
        });
    }
}
