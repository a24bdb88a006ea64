//! Request-side coordinator and owner of the versioned approval documents.
//!
//! Documents are never locked. `update_result` loads, applies the step
//! transition, and saves with a version check; a lost race reloads and tries
//! again until the lock retry budget runs out.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::approvals::{check_eligible, check_plan_entry, pending_steps, NewApproval, StepPlan};
use crate::domain::approval::{ApprovalDocument, RequestId, Transition};
use crate::domain::employee::{Caller, EmployeeId};
use crate::errors::{ApplicationError, ApprovalError};
use crate::ports::{
    ApprovalStore, EmployeeDirectory, NotificationPayload, NotificationSink, SequenceGenerator,
    StoreError,
};
use crate::retry::RetryPolicy;
use crate::transport::{ApprovalRequest, ApprovalResult, RequestDelivery, TransportError};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Budget for publishing a document to the processing side.
    pub propagation: RetryPolicy,
    /// Budget for optimistic-lock conflicts in `update_result`.
    pub lock: RetryPolicy,
}

pub struct RequestOrchestrator {
    store: Arc<dyn ApprovalStore>,
    sequence: Arc<dyn SequenceGenerator>,
    directory: Arc<dyn EmployeeDirectory>,
    notifications: Arc<dyn NotificationSink>,
    requests: Arc<dyn RequestDelivery>,
    settings: OrchestratorSettings,
}

enum Attempt {
    Done(Transition),
    Contended,
}

impl RequestOrchestrator {
    pub fn new(
        store: Arc<dyn ApprovalStore>,
        sequence: Arc<dyn SequenceGenerator>,
        directory: Arc<dyn EmployeeDirectory>,
        notifications: Arc<dyn NotificationSink>,
        requests: Arc<dyn RequestDelivery>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self { store, sequence, directory, notifications, requests, settings }
    }

    /// Validates the plan, persists a fresh document with every step pending
    /// and publishes it to the first approver.
    ///
    /// Publication failure surfaces to the caller but the document stays
    /// persisted; `resend_pending` recovers it.
    pub async fn create(
        &self,
        caller: &Caller,
        draft: NewApproval,
    ) -> Result<ApprovalDocument, ApplicationError> {
        let requester = self.directory.lookup(caller.id).await?;
        self.validate_steps(requester.id, &draft.steps).await?;

        let request_id = self.sequence.next_request_id().await?;
        let document = ApprovalDocument::open(
            request_id,
            requester.id,
            draft.title,
            draft.content,
            pending_steps(&draft.steps),
            Utc::now(),
        );
        self.store.insert(&document).await?;
        info!(
            event_name = "approval.request.created",
            request_id = request_id.0,
            requester_id = requester.id.0,
            steps = document.steps.len(),
            "approval request created"
        );

        self.publish(&document).await?;
        Ok(document)
    }

    /// Everything for admins; otherwise documents the caller requested or approves.
    pub async fn list_for(&self, caller: &Caller) -> Result<Vec<ApprovalDocument>, ApplicationError> {
        let documents = if caller.is_admin() {
            self.store.list_all().await?
        } else {
            self.store.list_involving(caller.id).await?
        };
        Ok(documents)
    }

    pub async fn find_one(
        &self,
        caller: &Caller,
        request_id: RequestId,
    ) -> Result<ApprovalDocument, ApplicationError> {
        let document = self.load(request_id).await?;
        ensure_access(caller, &document)?;
        Ok(document)
    }

    /// Republishes the active step. Final documents publish nothing.
    pub async fn resend_pending(
        &self,
        caller: &Caller,
        request_id: RequestId,
    ) -> Result<ApprovalDocument, ApplicationError> {
        let document = self.load(request_id).await?;
        ensure_access(caller, &document)?;
        self.publish(&document).await?;
        info!(
            event_name = "approval.request.resent",
            request_id = request_id.0,
            caller_id = caller.id.0,
            "approval request resent"
        );
        Ok(document)
    }

    /// Applies a result from the processing side.
    pub async fn update_result(
        &self,
        result: &ApprovalResult,
    ) -> Result<Transition, ApplicationError> {
        let max_attempts = self.settings.lock.attempts();
        for attempt in 1..=max_attempts {
            match self.try_update(result).await? {
                Attempt::Done(transition) => return Ok(transition),
                Attempt::Contended if attempt < max_attempts => {
                    debug!(
                        event_name = "approval.result.conflict",
                        request_id = result.request_id.0,
                        attempt,
                        max_attempts,
                        "version conflict; reloading"
                    );
                    self.settings.lock.pause().await;
                }
                Attempt::Contended => {}
            }
        }

        warn!(
            event_name = "approval.result.conflict_exhausted",
            request_id = result.request_id.0,
            attempts = max_attempts,
            "gave up applying result after repeated conflicts"
        );
        Err(ApprovalError::Conflict { request_id: result.request_id, attempts: max_attempts }.into())
    }

    async fn try_update(&self, result: &ApprovalResult) -> Result<Attempt, ApplicationError> {
        let mut document = self.load(result.request_id).await?;
        let transition =
            document.apply_result(result.approver_id, result.step, result.status, Utc::now())?;

        if transition.is_duplicate() {
            debug!(
                event_name = "approval.result.duplicate",
                request_id = result.request_id.0,
                approver_id = result.approver_id.0,
                step = result.step,
                "result already applied"
            );
            return Ok(Attempt::Done(transition));
        }

        match self.store.save(&document).await {
            Ok(version) => document.version = version,
            Err(StoreError::VersionConflict { .. }) => return Ok(Attempt::Contended),
            Err(error) => return Err(error.into()),
        }

        info!(
            event_name = "approval.result.applied",
            request_id = result.request_id.0,
            approver_id = result.approver_id.0,
            step = result.step,
            status = result.status.as_str(),
            final_status = document.final_status.as_str(),
            version = document.version,
            "approval result applied"
        );

        match &transition {
            Transition::Rejected { by } => {
                let payload = NotificationPayload::rejected(document.request_id, *by);
                self.notifications.notify(document.requester_id, &payload).await;
            }
            Transition::Approved => {
                let payload = NotificationPayload::approved(document.request_id);
                self.notifications.notify(document.requester_id, &payload).await;
            }
            Transition::Advanced { .. } => self.publish(&document).await?,
            Transition::Duplicate => {}
        }

        Ok(Attempt::Done(transition))
    }

    async fn load(&self, request_id: RequestId) -> Result<ApprovalDocument, ApplicationError> {
        self.store
            .find(request_id)
            .await?
            .ok_or_else(|| ApprovalError::RequestNotFound(request_id).into())
    }

    async fn validate_steps(
        &self,
        requester: EmployeeId,
        steps: &[StepPlan],
    ) -> Result<(), ApplicationError> {
        if steps.is_empty() {
            return Err(ApprovalError::InvalidStep("at least one step is required".into()).into());
        }
        for (position, plan) in steps.iter().enumerate() {
            check_plan_entry(position, requester, plan)?;
            let approver = self.directory.lookup(plan.approver_id).await?;
            check_eligible(&approver)?;
        }
        Ok(())
    }

    async fn publish(&self, document: &ApprovalDocument) -> Result<(), ApplicationError> {
        let Some(active) = document.active_step() else {
            return Ok(());
        };
        let request = ApprovalRequest::from_document(document);
        self.settings
            .propagation
            .run_if("approval.request.publish", TransportError::is_retryable, |_| {
                self.requests.deliver_request(&request)
            })
            .await?;
        info!(
            event_name = "approval.request.published",
            request_id = document.request_id.0,
            approver_id = active.approver_id.0,
            step = active.step,
            "approval request published"
        );
        Ok(())
    }
}

fn ensure_access(caller: &Caller, document: &ApprovalDocument) -> Result<(), ApprovalError> {
    if caller.is_admin() || document.involves(caller.id) {
        Ok(())
    } else {
        Err(ApprovalError::Forbidden(format!(
            "employee {} is not a party to request {}",
            caller.id, document.request_id
        )))
    }
}
