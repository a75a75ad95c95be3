//! Request owner
//!
//! Every request acts on behalf of the owner named in the `x-user-id`
//! header. Authentication happens upstream.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use super::error::ApiError;

pub const OWNER_HEADER: &str = "x-user-id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner(pub String);

impl Owner {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<S> FromRequestParts<S> for Owner
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ApiError::BadRequest(format!("missing {} header", OWNER_HEADER)))?;

        Ok(Owner(value.to_string()))
    }
}
