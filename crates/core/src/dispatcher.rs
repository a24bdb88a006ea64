//! Processing-side coordinator.
//!
//! Holds the per-approver queues, enforces that an approver may only act on
//! the head of their queue, and forwards recorded results to the request side.

use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::approval::{ApprovalStatus, RequestId, ResultStatus};
use crate::domain::employee::{Caller, EmployeeId};
use crate::errors::{ApplicationError, ApprovalError};
use crate::queue::ApprovalQueue;
use crate::retry::RetryPolicy;
use crate::transport::{ApprovalRequest, ApprovalResult, ResultDelivery, TransportError};

pub struct Dispatcher {
    queue: ApprovalQueue,
    results: Arc<dyn ResultDelivery>,
    retry: RetryPolicy,
}

impl Dispatcher {
    pub fn new(results: Arc<dyn ResultDelivery>, retry: RetryPolicy) -> Self {
        Self { queue: ApprovalQueue::new(), results, retry }
    }

    /// Ingestion point for propagated requests, from either transport path.
    pub fn accept_request(&self, request: ApprovalRequest) {
        let request_id = request.request_id;
        match self.queue.enqueue(request) {
            Some(approver_id) => info!(
                event_name = "processing.request.queued",
                request_id = request_id.0,
                approver_id = approver_id.0,
                "approval request queued"
            ),
            None => info!(
                event_name = "processing.request.skipped",
                request_id = request_id.0,
                "approval request has no active step"
            ),
        }
    }

    pub fn queue_for(
        &self,
        caller: &Caller,
        approver_id: EmployeeId,
    ) -> Result<Vec<ApprovalRequest>, ApprovalError> {
        ensure_acts_for(caller, approver_id)?;
        Ok(self.queue.snapshot(approver_id))
    }

    /// Records `status` for the request at the head of `approver_id`'s queue
    /// and forwards it to the request side.
    pub async fn handle(
        &self,
        caller: &Caller,
        approver_id: EmployeeId,
        request_id: RequestId,
        status: ApprovalStatus,
    ) -> Result<ApprovalResult, ApplicationError> {
        ensure_acts_for(caller, approver_id)?;
        let status = ResultStatus::try_from(status)?;

        let snapshot = self.queue.snapshot(approver_id);
        let head = snapshot.first().ok_or(ApprovalError::QueueEmpty(approver_id))?;
        if head.request_id != request_id {
            return Err(ApprovalError::InvalidStatus(format!(
                "request {request_id} is not at the head of approver {approver_id}'s queue \
                 (head is {})",
                head.request_id
            ))
            .into());
        }

        let queued = self
            .queue
            .remove(approver_id, request_id)
            .ok_or(ApprovalError::QueueEntryNotFound { approver_id, request_id })?;

        let Some(step) = queued.pending_step_for(approver_id).map(|step| step.step) else {
            return Err(ApprovalError::InvalidStatus(format!(
                "request {request_id} has no pending step for approver {approver_id}"
            ))
            .into());
        };

        let result = ApprovalResult { approver_id, request_id, step, status };
        let delivered = self
            .retry
            .run_if("processing.result.deliver", TransportError::is_retryable, |_| {
                self.results.deliver_result(&result)
            })
            .await;

        match delivered {
            Ok(()) => {
                info!(
                    event_name = "processing.result.forwarded",
                    request_id = request_id.0,
                    approver_id = approver_id.0,
                    step,
                    status = status.as_str(),
                    "approval result forwarded"
                );
                Ok(result)
            }
            Err(error) => {
                if error.is_retryable() {
                    self.queue.enqueue(queued);
                }
                warn!(
                    event_name = "processing.result.delivery_failed",
                    request_id = request_id.0,
                    approver_id = approver_id.0,
                    error = %error,
                    "approval result could not be forwarded"
                );
                Err(error.into())
            }
        }
    }

    /// Drops a queue entry still waiting on the step a result has decided,
    /// such as a resend that arrived while the result was in flight. Returns
    /// whether one existed.
    pub fn accept_result(&self, result: &ApprovalResult) -> bool {
        let removed = self
            .queue
            .remove_at_step(result.approver_id, result.request_id, result.step)
            .is_some();
        info!(
            event_name = "processing.result.accepted",
            request_id = result.request_id.0,
            approver_id = result.approver_id.0,
            removed,
            "approval result acknowledged"
        );
        removed
    }
}

fn ensure_acts_for(caller: &Caller, approver_id: EmployeeId) -> Result<(), ApprovalError> {
    if caller.acts_for(approver_id) {
        Ok(())
    } else {
        Err(ApprovalError::Forbidden(format!(
            "employee {} cannot act for approver {approver_id}",
            caller.id
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::Dispatcher;
    use crate::domain::approval::{ApprovalStatus, RequestId, ResultStatus};
    use crate::domain::employee::{Caller, EmployeeId, Role};
    use crate::errors::{ApplicationError, ApprovalError};
    use crate::retry::RetryPolicy;
    use crate::transport::{
        ApprovalRequest, ApprovalResult, ResultDelivery, StepMessage, TransportError,
    };

    #[derive(Default)]
    struct ScriptedResults {
        state: Mutex<ScriptedState>,
    }

    #[derive(Default)]
    struct ScriptedState {
        script: VecDeque<Result<(), TransportError>>,
        delivered: Vec<ApprovalResult>,
        attempts: usize,
    }

    impl ScriptedResults {
        fn with_script(script: Vec<Result<(), TransportError>>) -> Self {
            Self {
                state: Mutex::new(ScriptedState { script: script.into(), ..ScriptedState::default() }),
            }
        }
    }

    #[async_trait]
    impl ResultDelivery for ScriptedResults {
        async fn deliver_result(&self, result: &ApprovalResult) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.attempts += 1;
            let outcome = state.script.pop_front().unwrap_or(Ok(()));
            if outcome.is_ok() {
                state.delivered.push(*result);
            }
            outcome
        }
    }

    fn request(id: i64, approvers: &[i64]) -> ApprovalRequest {
        ApprovalRequest {
            request_id: RequestId(id),
            requester_id: EmployeeId(1),
            title: "purchase".into(),
            content: "monitor".into(),
            steps: approvers
                .iter()
                .enumerate()
                .map(|(index, approver)| StepMessage {
                    step: index as u32 + 1,
                    approver_id: EmployeeId(*approver),
                    status: ApprovalStatus::Pending,
                })
                .collect(),
        }
    }

    fn approver(id: i64) -> Caller {
        Caller::new(EmployeeId(id), Role::Approver)
    }

    fn dispatcher(results: Arc<ScriptedResults>, attempts: u32) -> Dispatcher {
        Dispatcher::new(results, RetryPolicy::new(attempts, 0))
    }

    #[tokio::test]
    async fn head_of_queue_is_forwarded() {
        let results = Arc::new(ScriptedResults::default());
        let dispatcher = dispatcher(results.clone(), 3);
        dispatcher.accept_request(request(1, &[10, 20]));

        let forwarded = dispatcher
            .handle(&approver(10), EmployeeId(10), RequestId(1), ApprovalStatus::Approved)
            .await
            .expect("head of queue");

        assert_eq!(forwarded.step, 1);
        assert_eq!(forwarded.status, ResultStatus::Approved);
        assert!(dispatcher.queue_for(&approver(10), EmployeeId(10)).expect("own queue").is_empty());
        assert_eq!(results.state.lock().await.delivered, vec![forwarded]);
    }

    #[tokio::test]
    async fn non_head_request_is_refused_and_queue_untouched() {
        let results = Arc::new(ScriptedResults::default());
        let dispatcher = dispatcher(results.clone(), 3);
        dispatcher.accept_request(request(1, &[10]));
        dispatcher.accept_request(request(2, &[10]));

        let error = dispatcher
            .handle(&approver(10), EmployeeId(10), RequestId(2), ApprovalStatus::Approved)
            .await
            .expect_err("request 2 is behind request 1");

        assert!(matches!(error, ApplicationError::Approval(ApprovalError::InvalidStatus(_))));
        let queue = dispatcher.queue_for(&approver(10), EmployeeId(10)).expect("own queue");
        assert_eq!(queue.len(), 2);
        assert_eq!(results.state.lock().await.attempts, 0);
    }

    #[tokio::test]
    async fn pending_status_is_rejected_before_touching_the_queue() {
        let dispatcher = dispatcher(Arc::new(ScriptedResults::default()), 3);
        dispatcher.accept_request(request(1, &[10]));

        let error = dispatcher
            .handle(&approver(10), EmployeeId(10), RequestId(1), ApprovalStatus::Pending)
            .await
            .expect_err("PENDING is not a result");

        assert!(matches!(error, ApplicationError::Approval(ApprovalError::InvalidStatus(_))));
        assert_eq!(dispatcher.queue_for(&approver(10), EmployeeId(10)).map(|q| q.len()), Ok(1));
    }

    #[tokio::test]
    async fn empty_queue_is_not_found() {
        let dispatcher = dispatcher(Arc::new(ScriptedResults::default()), 3);

        let error = dispatcher
            .handle(&approver(10), EmployeeId(10), RequestId(1), ApprovalStatus::Rejected)
            .await
            .expect_err("nothing queued");

        assert_eq!(error, ApplicationError::Approval(ApprovalError::QueueEmpty(EmployeeId(10))));
    }

    #[tokio::test]
    async fn other_approvers_are_forbidden_but_admin_is_not() {
        let dispatcher = dispatcher(Arc::new(ScriptedResults::default()), 3);
        dispatcher.accept_request(request(1, &[10]));

        let error = dispatcher
            .queue_for(&approver(11), EmployeeId(10))
            .expect_err("not the owner");
        assert!(matches!(error, ApprovalError::Forbidden(_)));

        let admin = Caller::new(EmployeeId(99), Role::Admin);
        dispatcher
            .handle(&admin, EmployeeId(10), RequestId(1), ApprovalStatus::Approved)
            .await
            .expect("admin may act for any approver");
    }

    #[tokio::test]
    async fn delivery_is_retried_until_success() {
        let results = Arc::new(ScriptedResults::with_script(vec![
            Err(TransportError::Unreachable("refused".into())),
            Err(TransportError::Closed("restarting".into())),
            Ok(()),
        ]));
        let dispatcher = dispatcher(results.clone(), 3);
        dispatcher.accept_request(request(1, &[10]));

        dispatcher
            .handle(&approver(10), EmployeeId(10), RequestId(1), ApprovalStatus::Approved)
            .await
            .expect("third attempt succeeds");

        assert_eq!(results.state.lock().await.attempts, 3);
    }

    #[tokio::test]
    async fn exhausted_delivery_fails_and_restores_the_entry() {
        let results = Arc::new(ScriptedResults::with_script(vec![
            Err(TransportError::Unreachable("refused".into())),
            Err(TransportError::Unreachable("refused".into())),
        ]));
        let dispatcher = dispatcher(results.clone(), 2);
        dispatcher.accept_request(request(1, &[10]));

        let error = dispatcher
            .handle(&approver(10), EmployeeId(10), RequestId(1), ApprovalStatus::Approved)
            .await
            .expect_err("transport down");

        assert!(matches!(error, ApplicationError::Transport(TransportError::Unreachable(_))));
        assert_eq!(dispatcher.queue_for(&approver(10), EmployeeId(10)).map(|q| q.len()), Ok(1));
    }

    #[tokio::test]
    async fn refused_delivery_is_not_retried_or_restored() {
        let results = Arc::new(ScriptedResults::with_script(vec![Err(TransportError::Rejected {
            status: 400,
            message: "not the active step".into(),
        })]));
        let dispatcher = dispatcher(results.clone(), 3);
        dispatcher.accept_request(request(1, &[10]));

        dispatcher
            .handle(&approver(10), EmployeeId(10), RequestId(1), ApprovalStatus::Approved)
            .await
            .expect_err("request side refused");

        assert_eq!(results.state.lock().await.attempts, 1);
        assert_eq!(dispatcher.queue_for(&approver(10), EmployeeId(10)).map(|q| q.len()), Ok(0));
    }

    #[tokio::test]
    async fn accept_result_removes_matching_entry() {
        let dispatcher = dispatcher(Arc::new(ScriptedResults::default()), 1);
        dispatcher.accept_request(request(1, &[10]));

        let result = ApprovalResult {
            approver_id: EmployeeId(10),
            request_id: RequestId(1),
            step: 1,
            status: ResultStatus::Approved,
        };
        assert!(dispatcher.accept_result(&result));
        assert!(!dispatcher.accept_result(&result));
    }

    #[tokio::test]
    async fn accept_result_keeps_the_copy_queued_for_a_later_step() {
        let dispatcher = dispatcher(Arc::new(ScriptedResults::default()), 1);
        let mut next = request(1, &[10, 10]);
        next.steps[0].status = ApprovalStatus::Approved;
        dispatcher.accept_request(next);

        let result = ApprovalResult {
            approver_id: EmployeeId(10),
            request_id: RequestId(1),
            step: 1,
            status: ResultStatus::Approved,
        };
        assert!(!dispatcher.accept_result(&result));
        assert_eq!(dispatcher.queue_for(&approver(10), EmployeeId(10)).map(|q| q.len()), Ok(1));
    }
}
