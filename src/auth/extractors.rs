use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
};
use tracing::warn;

use crate::auth::jwt::{SessionClaims, TokenError};
use crate::error::ApiError;
use crate::state::AppState;

/// Extracts and validates the bearer token, yielding the session claims.
/// Reset tokens are not accepted here.
pub struct AuthUser(pub SessionClaims);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or(ApiError::TokenInvalid)?;

        let token = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            .ok_or(ApiError::TokenInvalid)?;

        let claims = state.auth.keys().verify_session(token).map_err(|e| {
            warn!(error = %e, "bearer token rejected");
            match e {
                TokenError::Expired => ApiError::TokenExpired,
                TokenError::Invalid => ApiError::TokenInvalid,
            }
        })?;

        Ok(AuthUser(claims))
    }
}
