//! Route-level test harness: in-memory repositories and recording transports.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::Value;
use signoff_core::config::AppConfig;
use signoff_core::domain::employee::{Caller, Employee, EmployeeId, Role};
use signoff_core::transport::{
    ApprovalRequest, ApprovalResult, RequestDelivery, ResultDelivery, TransportError,
};
use signoff_core::{Dispatcher, OrchestratorSettings, RequestOrchestrator, RetryPolicy};
use signoff_db::{InMemoryApprovalStore, InMemoryEmployeeDirectory, InMemorySequenceGenerator};
use tokio::sync::Mutex;
use tower::ServiceExt;

use crate::clients::LoggingNotificationSink;
use crate::context::{INTERNAL_TOKEN_HEADER, USER_ID_HEADER, USER_ROLE_HEADER};
use crate::state::AppState;
use crate::{approvals, processing};

pub const REQUESTER: Caller = Caller { id: EmployeeId(1), role: Role::Employee };
pub const APPROVER: Caller = Caller { id: EmployeeId(10), role: Role::Approver };
pub const OUTSIDER: Caller = Caller { id: EmployeeId(30), role: Role::Employee };
pub const ADMIN: Caller = Caller { id: EmployeeId(99), role: Role::Admin };

pub struct Recorder<T> {
    delivered: Mutex<Vec<T>>,
}

impl<T> Default for Recorder<T> {
    fn default() -> Self {
        Self { delivered: Mutex::new(Vec::new()) }
    }
}

impl<T: Clone> Recorder<T> {
    pub async fn delivered(&self) -> Vec<T> {
        self.delivered.lock().await.clone()
    }
}

#[async_trait]
impl RequestDelivery for Recorder<ApprovalRequest> {
    async fn deliver_request(&self, request: &ApprovalRequest) -> Result<(), TransportError> {
        self.delivered.lock().await.push(request.clone());
        Ok(())
    }
}

#[async_trait]
impl ResultDelivery for Recorder<ApprovalResult> {
    async fn deliver_result(&self, result: &ApprovalResult) -> Result<(), TransportError> {
        self.delivered.lock().await.push(*result);
        Ok(())
    }
}

pub struct Harness {
    pub router: Router,
    pub state: AppState,
    pub requests: Arc<Recorder<ApprovalRequest>>,
    pub results: Arc<Recorder<ApprovalResult>>,
}

pub async fn harness() -> Harness {
    build(AppConfig::default()).await
}

pub async fn harness_with_secret(secret: &str) -> Harness {
    let mut config = AppConfig::default();
    config.transport.shared_secret = Some(secret.to_string().into());
    build(config).await
}

async fn build(config: AppConfig) -> Harness {
    let directory = InMemoryEmployeeDirectory::with_employees(
        [REQUESTER, APPROVER, OUTSIDER, ADMIN].into_iter().map(|caller| Employee {
            id: caller.id,
            name: format!("employee-{}", caller.id),
            role: caller.role,
        }),
    );
    let requests = Arc::new(Recorder::<ApprovalRequest>::default());
    let results = Arc::new(Recorder::<ApprovalResult>::default());

    let state = AppState {
        orchestrator: Arc::new(RequestOrchestrator::new(
            Arc::new(InMemoryApprovalStore::default()),
            Arc::new(InMemorySequenceGenerator::default()),
            Arc::new(directory),
            Arc::new(LoggingNotificationSink),
            requests.clone(),
            OrchestratorSettings {
                propagation: RetryPolicy::new(1, 0),
                lock: RetryPolicy::new(3, 0),
            },
        )),
        dispatcher: Arc::new(Dispatcher::new(results.clone(), RetryPolicy::new(1, 0))),
        transport: Arc::new(config.transport),
    };
    let router = Router::new()
        .merge(approvals::router())
        .merge(processing::router())
        .with_state(state.clone());

    Harness { router, state, requests, results }
}

async fn send(h: &Harness, request: Request<Body>) -> (StatusCode, Value) {
    let response = h.router.clone().oneshot(request).await.expect("route call");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("read body");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, body)
}

/// Calls a route as `caller`, or anonymously when `None`.
pub async fn call(
    h: &Harness,
    method: Method,
    uri: &str,
    caller: Option<Caller>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(caller) = caller {
        builder = builder
            .header(USER_ID_HEADER, caller.id.to_string())
            .header(USER_ROLE_HEADER, caller.role.as_str());
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    };
    send(h, request).await
}

pub async fn call_internal(
    h: &Harness,
    uri: &str,
    token: Option<&str>,
    body: Value,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header(INTERNAL_TOKEN_HEADER, token);
    }
    send(h, builder.body(Body::from(body.to_string())).expect("request")).await
}
