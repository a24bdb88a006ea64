//! Per-request identity extracted from headers.
//!
//! Authentication happens upstream; the gateway forwards the verified
//! identity in `X-User-Id` / `X-User-Role`. Internal routes instead present
//! the shared transport secret in `X-Internal-Token`.

use axum::{extract::FromRequestParts, http::request::Parts};
use signoff_core::domain::employee::{Caller, EmployeeId, Role};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
pub const INTERNAL_TOKEN_HEADER: &str = "x-internal-token";
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestContext {
    pub caller: Caller,
    pub correlation_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InternalContext {
    pub correlation_id: String,
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|value| value.to_str().ok()).map(str::trim)
}

fn correlation_id(parts: &Parts) -> String {
    header(parts, CORRELATION_ID_HEADER)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

impl<S: Send + Sync> FromRequestParts<S> for RequestContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let correlation_id = correlation_id(parts);

        let id = header(parts, USER_ID_HEADER)
            .and_then(|value| value.parse::<i64>().ok())
            .ok_or_else(|| {
                ApiError::unauthorized("missing or malformed X-User-Id header", &correlation_id)
            })?;
        let role = header(parts, USER_ROLE_HEADER).and_then(Role::parse).ok_or_else(|| {
            ApiError::unauthorized("missing or malformed X-User-Role header", &correlation_id)
        })?;

        Ok(Self { caller: Caller::new(EmployeeId(id), role), correlation_id })
    }
}

impl FromRequestParts<AppState> for InternalContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let correlation_id = correlation_id(parts);
        if !state.transport.shared_secret_matches(header(parts, INTERNAL_TOKEN_HEADER)) {
            return Err(ApiError::unauthorized("invalid internal token", &correlation_id));
        }
        Ok(Self { correlation_id })
    }
}
