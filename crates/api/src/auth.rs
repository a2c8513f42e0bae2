//! Caller identity supplied by the upstream authentication layer.

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use common::UserId;
use domain::{RequestContext, Role};

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

const DEFAULT_CLIENT_IP: &str = "127.0.0.1";

/// Extracts the [`RequestContext`] of the authenticated caller.
///
/// `x-user-id` is required; `x-user-role` defaults to `customer`.
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub RequestContext);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        context_from_headers(&parts.headers).map(Caller)
    }
}

pub fn context_from_headers(headers: &HeaderMap) -> Result<RequestContext, ApiError> {
    let user_id = header(headers, USER_ID_HEADER)
        .ok_or_else(|| ApiError::Unauthorized(format!("missing {USER_ID_HEADER} header")))?
        .parse::<UserId>()
        .map_err(|e| ApiError::Unauthorized(e.to_string()))?;

    let role = match header(headers, USER_ROLE_HEADER) {
        Some(role) => role.parse::<Role>().map_err(ApiError::BadRequest)?,
        None => Role::Customer,
    };

    Ok(RequestContext { user_id, role })
}

/// The client address reported to the payment gateway.
pub fn client_ip(headers: &HeaderMap) -> String {
    header(headers, "x-forwarded-for")
        .and_then(|value| value.split(',').next())
        .or_else(|| header(headers, "x-real-ip"))
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .unwrap_or(DEFAULT_CLIENT_IP)
        .to_string()
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
