use std::sync::Arc;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::error::AppError;
use crate::services::auth::{AuthService, Claims};
use crate::AppState;

/// Authenticated caller, extracted from the `Authorization: Bearer` header.
pub struct AuthUser(pub Claims);

impl AuthUser {
    /// Allow only the user the path is about.
    pub fn require_user(&self, user_id: &str) -> Result<(), AppError> {
        if self.0.sub != user_id {
            tracing::debug!("User {} denied access to user {}", self.0.sub, user_id);
            return Err(AppError::Forbidden);
        }
        Ok(())
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if !self.0.is_admin {
            tracing::debug!("User {} is not an admin", self.0.sub);
            return Err(AppError::Forbidden);
        }
        Ok(())
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                tracing::debug!("Missing or invalid Authorization header");
                AppError::Unauthorized
            })?;

        if !auth_header.to_ascii_lowercase().starts_with("bearer ") {
            tracing::debug!("Authorization header doesn't start with 'Bearer '");
            return Err(AppError::Unauthorized);
        }

        let token = auth_header[7..].trim();
        if token.is_empty() {
            tracing::debug!("Empty bearer token in Authorization header");
            return Err(AppError::Unauthorized);
        }

        let claims = AuthService::decode_jwt(&state.config.jwt.secret, token)?;
        tracing::debug!("Authenticated user: {}", claims.sub);
        Ok(AuthUser(claims))
    }
}
