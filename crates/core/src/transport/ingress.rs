use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::dispatcher::Dispatcher;
use crate::orchestrator::RequestOrchestrator;
use crate::transport::bus::{Ack, MessageHandler};
use crate::transport::messages::decode;
use crate::transport::{ApprovalRequest, ApprovalResult};

/// Queue adapter feeding propagated requests into the dispatcher.
pub struct RequestIngress {
    dispatcher: Arc<Dispatcher>,
}

impl RequestIngress {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl MessageHandler for RequestIngress {
    async fn handle(&self, payload: &[u8]) -> Ack {
        match decode::<ApprovalRequest>(payload) {
            Ok(request) => {
                self.dispatcher.accept_request(request);
                Ack::Accept
            }
            Err(error) => Ack::Reject(error.to_string()),
        }
    }
}

/// Queue adapter feeding approver results into the orchestrator.
///
/// Business-rule failures are acknowledged and dropped; a later resend
/// reconciles the processing side. Transient failures are requeued. When the
/// processing side runs in the same process, an applied result is also
/// acknowledged to its dispatcher. Split deployments reach the same
/// acknowledgement through `POST /internal/process/results`.
pub struct ResultIngress {
    orchestrator: Arc<RequestOrchestrator>,
    dispatcher: Option<Arc<Dispatcher>>,
}

impl ResultIngress {
    pub fn new(orchestrator: Arc<RequestOrchestrator>) -> Self {
        Self { orchestrator, dispatcher: None }
    }

    pub fn acknowledging(mut self, dispatcher: Arc<Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }
}

#[async_trait]
impl MessageHandler for ResultIngress {
    async fn handle(&self, payload: &[u8]) -> Ack {
        let result = match decode::<ApprovalResult>(payload) {
            Ok(result) => result,
            Err(error) => return Ack::Reject(error.to_string()),
        };

        match self.orchestrator.update_result(&result).await {
            Ok(_) => {
                if let Some(dispatcher) = &self.dispatcher {
                    dispatcher.accept_result(&result);
                }
                Ack::Accept
            }
            Err(error) if error.is_transient() => Ack::Requeue(error.to_string()),
            Err(error) => {
                warn!(
                    event_name = "approval.result.dropped",
                    request_id = result.request_id.0,
                    approver_id = result.approver_id.0,
                    step = result.step,
                    error = %error,
                    "approval result dropped"
                );
                Ack::Accept
            }
        }
    }
}
