//! Verification of identity tokens.
//!
//! Tokens are issued by the external identity provider; this server only
//! checks them. `create_token` exists for tests and local development.

use crate::error::{AppError, Result};
use crate::state::AppState;
use axum::{extract::FromRequestParts, http::request::Parts, RequestPartsExt};
use axum_extra::{headers, TypedHeader};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,       // User ID
    pub name: String,    // Display name
    pub exp: i64,        // Expiration time
    pub iat: i64,        // Issued at
}

impl Claims {
    pub fn new(user_id: Uuid, name: String, expires_in_hours: i64) -> Self {
        let now = Utc::now();
        Self {
            sub: user_id,
            name,
            exp: (now + Duration::hours(expires_in_hours)).timestamp(),
            iat: now.timestamp(),
        }
    }
}

pub fn create_token(user_id: Uuid, display_name: &str, secret: &str) -> Result<String> {
    let claims = Claims::new(user_id, display_name.to_string(), 24);

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

pub fn verify_token(token: &str, secret: &str) -> Result<Claims> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}

/// Extractor for authenticated requests
pub struct AuthUser {
    pub user_id: Uuid,
    pub display_name: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let TypedHeader(auth_header) = parts
            .extract::<TypedHeader<headers::Authorization<headers::authorization::Bearer>>>()
            .await
            .map_err(|_| AppError::Unauthorized)?;

        let claims = verify_token(auth_header.token(), &state.config.jwt_secret)?;

        Ok(AuthUser {
            user_id: claims.sub,
            display_name: claims.name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips_identity() {
        let user_id = Uuid::new_v4();
        let token = create_token(user_id, "Ada", "secret").unwrap();

        let claims = verify_token(&token, "secret").unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.name, "Ada");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = create_token(Uuid::new_v4(), "Ada", "secret").unwrap();
        assert!(matches!(
            verify_token(&token, "other"),
            Err(AppError::Jwt(_))
        ));
    }
}
