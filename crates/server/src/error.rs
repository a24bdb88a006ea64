use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use signoff_core::errors::{ApplicationError, InterfaceError};
use tracing::{error, warn};

/// JSON error body shared by every route.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    pub correlation_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    pub fn from_application(error: ApplicationError, correlation_id: &str) -> Self {
        let business = matches!(error, ApplicationError::Approval(_));
        let interface = error.into_interface(correlation_id);
        if !business {
            error!(
                event_name = "http.request.failed",
                correlation_id,
                code = interface.code(),
                error = %interface,
                "request failed on an infrastructure error"
            );
        } else {
            warn!(
                event_name = "http.request.refused",
                correlation_id,
                code = interface.code(),
                error = %interface,
                "request refused"
            );
        }
        Self::from(interface)
    }

    pub fn unauthorized(message: impl Into<String>, correlation_id: &str) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            body: ErrorBody {
                code: "unauthenticated",
                message: message.into(),
                correlation_id: correlation_id.to_string(),
            },
        }
    }
}

impl From<InterfaceError> for ApiError {
    fn from(error: InterfaceError) -> Self {
        let status = match &error {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::Forbidden { .. } => StatusCode::FORBIDDEN,
            InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        // Business errors carry a specific, caller-safe description.
        let message = match &error {
            InterfaceError::BadRequest { message, .. }
            | InterfaceError::NotFound { message, .. }
            | InterfaceError::Forbidden { message, .. } => message.clone(),
            _ => error.user_message().to_string(),
        };
        Self {
            status,
            body: ErrorBody {
                code: error.code(),
                message,
                correlation_id: error.correlation_id().to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use signoff_core::domain::approval::RequestId;
    use signoff_core::domain::employee::EmployeeId;
    use signoff_core::errors::{ApplicationError, ApprovalError};
    use signoff_core::transport::TransportError;

    use super::ApiError;

    fn status_of(error: ApplicationError) -> StatusCode {
        ApiError::from_application(error, "corr-1").status
    }

    #[test]
    fn business_errors_map_to_client_statuses() {
        assert_eq!(
            status_of(ApprovalError::RequestNotFound(RequestId(1)).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(ApprovalError::InvalidStatus("not head".into()).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(ApprovalError::SelfApprovalNotAllowed(EmployeeId(1)).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(ApprovalError::Forbidden("no".into()).into()), StatusCode::FORBIDDEN);
        assert_eq!(
            status_of(ApprovalError::Conflict { request_id: RequestId(1), attempts: 3 }.into()),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn infrastructure_errors_hide_details_behind_a_generic_message() {
        let error = ApiError::from_application(
            TransportError::Unreachable("10.0.0.7:8080 refused".into()).into(),
            "corr-2",
        );
        assert_eq!(error.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(error.body.correlation_id, "corr-2");
        assert!(!error.body.message.contains("10.0.0.7"));
    }
}
