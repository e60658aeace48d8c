mod identity;

pub use identity::{Identities, Identity, IdentityResolver, UserInfo};

use axum::http::{header::AUTHORIZATION, HeaderMap};

use crate::{AppError, AppResult};

pub fn bearer_token(headers: &HeaderMap) -> AppResult<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)
}
