//! Authenticated-identity extraction.
//!
//! Token validation happens upstream of this service; by the time a request
//! arrives here the boundary has resolved it to a user id carried in the
//! `x-user-id` header. This extractor only refuses requests where that id
//! is absent.

use crate::errors::AppError;
use axum::{extract::FromRequestParts, http::request::Parts};

/// Header carrying the authenticated user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The caller's authenticated user id.
#[derive(Debug, Clone)]
pub struct UserId(pub String);

impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| UserId(value.to_string()))
            .ok_or_else(|| AppError::unauthorized("missing authenticated user id"))
    }
}
