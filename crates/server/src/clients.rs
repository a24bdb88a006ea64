//! HTTP collaborators: the synchronous call path between the two sides, the
//! remote employee directory, and the notification service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use signoff_core::domain::employee::{Employee, EmployeeId, Role};
use signoff_core::ports::{
    DirectoryError, EmployeeDirectory, NotificationPayload, NotificationSink,
};
use signoff_core::retry::RetryPolicy;
use signoff_core::transport::{
    ApprovalRequest, ApprovalResult, RequestDelivery, ResultDelivery, TransportError,
};
use tracing::{debug, info, warn};

use crate::context::INTERNAL_TOKEN_HEADER;

const MAX_ERROR_BODY: usize = 512;

pub fn build_client(timeout_secs: u64) -> Result<Client, reqwest::Error> {
    Client::builder().timeout(Duration::from_secs(timeout_secs.max(1))).build()
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{path}", base_url.trim_end_matches('/'))
}

/// POSTs a JSON message to a peer and classifies the outcome for the retry policy.
async fn post_json<T: Serialize + ?Sized>(
    client: &Client,
    url: &str,
    token: Option<&SecretString>,
    body: &T,
) -> Result<(), TransportError> {
    let mut request = client.post(url).json(body);
    if let Some(token) = token {
        request = request.header(INTERNAL_TOKEN_HEADER, token.expose_secret());
    }

    let response =
        request.send().await.map_err(|error| TransportError::Unreachable(error.to_string()))?;
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let mut message = response.text().await.unwrap_or_default();
    truncate_on_char_boundary(&mut message, MAX_ERROR_BODY);
    Err(TransportError::Rejected { status: status.as_u16(), message })
}

/// Shortens `text` to at most `limit` bytes without splitting a character.
fn truncate_on_char_boundary(text: &mut String, limit: usize) {
    if text.len() <= limit {
        return;
    }
    let cut = (0..=limit).rev().find(|&index| text.is_char_boundary(index)).unwrap_or(0);
    text.truncate(cut);
}

/// Request side to processing side over HTTP.
pub struct HttpRequestDelivery {
    client: Client,
    url: String,
    token: Option<SecretString>,
}

impl HttpRequestDelivery {
    pub fn new(client: Client, processing_base_url: &str, token: Option<SecretString>) -> Self {
        Self { client, url: endpoint(processing_base_url, "/internal/process/requests"), token }
    }
}

#[async_trait]
impl RequestDelivery for HttpRequestDelivery {
    async fn deliver_request(&self, request: &ApprovalRequest) -> Result<(), TransportError> {
        post_json(&self.client, &self.url, self.token.as_ref(), request).await
    }
}

/// Processing side to request side over HTTP.
pub struct HttpResultDelivery {
    client: Client,
    url: String,
    token: Option<SecretString>,
}

impl HttpResultDelivery {
    pub fn new(client: Client, request_base_url: &str, token: Option<SecretString>) -> Self {
        Self { client, url: endpoint(request_base_url, "/internal/approvals/results"), token }
    }
}

#[async_trait]
impl ResultDelivery for HttpResultDelivery {
    async fn deliver_result(&self, result: &ApprovalResult) -> Result<(), TransportError> {
        post_json(&self.client, &self.url, self.token.as_ref(), result).await
    }
}

#[derive(Debug, Deserialize)]
struct EmployeeRecord {
    id: EmployeeId,
    #[serde(default)]
    name: String,
    role: Role,
}

pub struct HttpEmployeeDirectory {
    client: Client,
    base_url: String,
}

impl HttpEmployeeDirectory {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self { client, base_url: base_url.trim_end_matches('/').to_string() }
    }
}

#[async_trait]
impl EmployeeDirectory for HttpEmployeeDirectory {
    async fn lookup(&self, id: EmployeeId) -> Result<Employee, DirectoryError> {
        let url = format!("{}/internal/employees/{id}", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|error| DirectoryError::Unavailable(error.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(DirectoryError::NotFound(id)),
            status if status.is_success() => {
                let record: EmployeeRecord = response
                    .json()
                    .await
                    .map_err(|error| DirectoryError::Unavailable(error.to_string()))?;
                Ok(Employee { id: record.id, name: record.name, role: record.role })
            }
            status => Err(DirectoryError::Unavailable(format!(
                "directory answered {status} for employee {id}"
            ))),
        }
    }
}

/// Delivers outcome notices with its own retry budget; failures end in a warning.
pub struct HttpNotificationSink {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl HttpNotificationSink {
    pub fn new(client: Client, base_url: &str, retry: RetryPolicy) -> Self {
        Self { client, base_url: base_url.trim_end_matches('/').to_string(), retry }
    }
}

#[async_trait]
impl NotificationSink for HttpNotificationSink {
    async fn notify(&self, recipient: EmployeeId, payload: &NotificationPayload) {
        let url = format!("{}/internal/notifications/{recipient}", self.base_url);
        let delivered = self
            .retry
            .run_if("notification.deliver", TransportError::is_retryable, |_| {
                post_json(&self.client, &url, None, payload)
            })
            .await;

        match delivered {
            Ok(()) => debug!(
                event_name = "notification.delivered",
                request_id = payload.request_id.0,
                recipient = recipient.0,
                "notification delivered"
            ),
            Err(error) => warn!(
                event_name = "notification.dropped",
                request_id = payload.request_id.0,
                recipient = recipient.0,
                error = %error,
                "notification could not be delivered"
            ),
        }
    }
}

/// Used when no notification service is configured.
#[derive(Default)]
pub struct LoggingNotificationSink;

#[async_trait]
impl NotificationSink for LoggingNotificationSink {
    async fn notify(&self, recipient: EmployeeId, payload: &NotificationPayload) {
        info!(
            event_name = "notification.logged",
            request_id = payload.request_id.0,
            recipient = recipient.0,
            result = payload.result,
            rejected_by = payload.rejected_by.map(|id| id.0),
            "approval outcome"
        );
    }
}
