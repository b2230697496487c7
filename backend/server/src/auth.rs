//! # Sessions
//!
//! Login hands out an HS256 JWT. Every protected handler takes a [`Session`],
//! which reads `Authorization: Bearer <token>` and resolves which shop the
//! caller works in.
//!
//! Passwords are stored as argon2 PHC strings.
use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{extract::FromRequestParts, http::header::AUTHORIZATION, http::request::Parts};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{Role, User},
    state::State,
};

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: Uuid,
    role: Role,
    owner: Option<Uuid>,
    iat: i64,
    exp: i64,
}

/// The authenticated caller.
#[derive(Debug, Clone, Copy)]
pub struct Session {
    pub user_id: Uuid,
    pub role: Role,
    /// Shop the caller reads and writes.
    pub owner_id: Uuid,
}

impl Session {
    pub fn require_owner(&self, message: &'static str) -> Result<(), AppError> {
        match self.role {
            Role::Owner => Ok(()),
            Role::Staff => Err(AppError::Forbidden(message)),
        }
    }
}

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

pub fn issue_token(user: &User, secret: &str, ttl: std::time::Duration) -> Result<String, AppError> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user.id,
        role: user.role,
        owner: user.owner_id,
        iat: now,
        exp: now + ttl.as_secs() as i64,
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("token signing failed: {e}")))
}

pub fn verify_token(token: &str, secret: &str) -> Result<Session, AppError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|_| AppError::Unauthorized)?;

    let claims = data.claims;
    let owner_id = match claims.role {
        Role::Owner => claims.sub,
        Role::Staff => claims.owner.ok_or(AppError::Unauthorized)?,
    };

    Ok(Session {
        user_id: claims.sub,
        role: claims.role,
        owner_id,
    })
}

impl FromRequestParts<Arc<State>> for Session {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<State>) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .ok_or(AppError::Unauthorized)?;

        verify_token(token, &state.config.jwt_secret)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::models::ShopConfig;

    fn user(role: Role, owner_id: Option<Uuid>) -> User {
        User {
            id: Uuid::new_v4(),
            name: "Mohan".into(),
            email: "mohan@example.com".into(),
            password_hash: String::new(),
            mobile: "9999999999".into(),
            role,
            shop_config: ShopConfig::default(),
            owner_id,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn passwords_round_trip_through_argon2() {
        let hash = hash_password("khaad@123").unwrap();

        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("khaad@123", &hash));
        assert!(!verify_password("khaad@124", &hash));
        assert!(!verify_password("khaad@123", "not a hash"));
    }

    #[test]
    fn staff_tokens_resolve_to_the_owners_shop() {
        let owner = Uuid::new_v4();
        let staff = user(Role::Staff, Some(owner));
        let token = issue_token(&staff, "secret", Duration::from_secs(60)).unwrap();

        let session = verify_token(&token, "secret").unwrap();

        assert_eq!(session.user_id, staff.id);
        assert_eq!(session.owner_id, owner);
        assert!(session.require_owner("nope").is_err());
    }

    #[test]
    fn tokens_signed_with_another_secret_are_rejected() {
        let owner = user(Role::Owner, None);
        let token = issue_token(&owner, "secret", Duration::from_secs(60)).unwrap();

        assert!(matches!(
            verify_token(&token, "other"),
            Err(AppError::Unauthorized)
        ));
        assert_eq!(verify_token(&token, "secret").unwrap().owner_id, owner.id);
    }
}
