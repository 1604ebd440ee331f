use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;

/// Session token claims. Tokens are issued by the login service; this service
/// only verifies them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub is_admin: bool,
    pub exp: usize,
    pub iat: usize,
}

pub struct AuthService;

impl AuthService {
    /// Create a signed JWT for a user id. Production tokens come from the
    /// login service, so only tests mint their own.
    #[cfg(test)]
    pub fn create_jwt(
        secret: &str,
        user_id: &str,
        is_admin: bool,
        ttl: chrono::Duration,
    ) -> AppResult<String> {
        use jsonwebtoken::{encode, EncodingKey, Header};

        let now = chrono::Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            is_admin,
            iat: now.timestamp() as usize,
            exp: (now + ttl).timestamp() as usize,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )?;
        Ok(token)
    }

    /// Decode and validate a JWT, returning the claims
    pub fn decode_jwt(secret: &str, token: &str) -> AppResult<Claims> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::default(),
        )?;
        Ok(token_data.claims)
    }
}
