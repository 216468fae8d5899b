//! Caller identity.
//!
//! Users present `Bearer <user_uuid>.<hex hmac-sha256(user_uuid)>` signed with
//! the token secret. The admin and carrier-integration keys are plain bearer
//! values.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use crate::domain::Actor;
use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

/// Secrets used to resolve a bearer value into an [`Actor`].
#[derive(Clone)]
pub struct AuthKeys {
    token_secret: String,
    admin_api_key: String,
    system_api_key: Option<String>,
}

impl AuthKeys {
    pub fn new(token_secret: String, admin_api_key: String, system_api_key: Option<String>) -> Self {
        Self {
            token_secret,
            admin_api_key,
            system_api_key,
        }
    }

    pub fn issue(&self, user_id: Uuid) -> Result<String, AppError> {
        issue_token(&self.token_secret, user_id)
    }

    pub fn resolve(&self, bearer: &str) -> Result<Actor, AppError> {
        if constant_time_eq(bearer, &self.admin_api_key) {
            return Ok(Actor::Admin);
        }
        if let Some(system) = &self.system_api_key {
            if constant_time_eq(bearer, system) {
                return Ok(Actor::System);
            }
        }
        verify_token(&self.token_secret, bearer).map(Actor::User)
    }
}

fn mac_for(secret: &str, user_id: &str) -> Result<HmacSha256, AppError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Internal("invalid token secret".to_string()))?;
    mac.update(user_id.as_bytes());
    Ok(mac)
}

pub fn issue_token(secret: &str, user_id: Uuid) -> Result<String, AppError> {
    let id = user_id.to_string();
    let signature = mac_for(secret, &id)?.finalize().into_bytes();
    Ok(format!("{}.{}", id, hex::encode(signature)))
}

pub fn verify_token(secret: &str, token: &str) -> Result<Uuid, AppError> {
    let (id, signature) = token
        .split_once('.')
        .ok_or_else(|| AppError::Unauthenticated("malformed token".to_string()))?;
    let user_id = Uuid::parse_str(id)
        .map_err(|_| AppError::Unauthenticated("malformed token".to_string()))?;
    let signature = hex::decode(signature)
        .map_err(|_| AppError::Unauthenticated("malformed token signature".to_string()))?;

    mac_for(secret, id)?
        .verify_slice(&signature)
        .map_err(|_| AppError::Unauthenticated("token signature mismatch".to_string()))?;
    Ok(user_id)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a
            .bytes()
            .zip(b.bytes())
            .fold(0u8, |acc, (x, y)| acc | (x ^ y))
            == 0
}

fn bearer(parts: &Parts) -> Result<&str, AppError> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::Unauthenticated("missing Authorization header".to_string()))?;
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .ok_or_else(|| AppError::Unauthenticated("expected a bearer token".to_string()))
}

/// Any authenticated caller.
pub struct Caller(pub Actor);

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    AuthKeys: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = AuthKeys::from_ref(state);
        let actor = keys.resolve(bearer(parts)?).map_err(|e| {
            tracing::warn!(uri = %parts.uri, "Authentication failed: {}", e);
            e
        })?;
        Ok(Caller(actor))
    }
}

/// An authenticated end user; admin and system keys are refused.
pub struct UserId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for UserId
where
    AuthKeys: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Caller(actor) = Caller::from_request_parts(parts, state).await?;
        actor.user_id().map(UserId).ok_or_else(|| {
            AppError::Lifecycle(crate::error::LifecycleError::Unauthorized(
                "a user token is required".to_string(),
            ))
        })
    }
}

/// The admin key holder.
pub struct AdminCaller;

#[async_trait]
impl<S> FromRequestParts<S> for AdminCaller
where
    AuthKeys: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Caller::from_request_parts(parts, state).await? {
            Caller(Actor::Admin) => Ok(AdminCaller),
            _ => Err(AppError::Lifecycle(
                crate::error::LifecycleError::Unauthorized("admin key required".to_string()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef-secret";

    fn keys() -> AuthKeys {
        AuthKeys::new(SECRET.to_string(), "admin-key".to_string(), Some("carrier-key".to_string()))
    }

    #[test]
    fn test_issued_token_verifies() {
        let user = Uuid::new_v4();
        let token = issue_token(SECRET, user).unwrap();
        assert_eq!(verify_token(SECRET, &token).unwrap(), user);
    }

    #[test]
    fn test_token_signed_with_other_secret_is_rejected() {
        let token = issue_token("another-secret-value", Uuid::new_v4()).unwrap();
        assert!(matches!(
            verify_token(SECRET, &token),
            Err(AppError::Unauthenticated(_))
        ));
    }

    #[test]
    fn test_tampered_user_id_is_rejected() {
        let token = issue_token(SECRET, Uuid::new_v4()).unwrap();
        let (_, signature) = token.split_once('.').unwrap();
        let forged = format!("{}.{}", Uuid::new_v4(), signature);
        assert!(verify_token(SECRET, &forged).is_err());
    }

    #[test]
    fn test_malformed_tokens_are_rejected() {
        assert!(verify_token(SECRET, "no-dot").is_err());
        assert!(verify_token(SECRET, "not-a-uuid.abcd").is_err());
        assert!(verify_token(SECRET, &format!("{}.zz", Uuid::new_v4())).is_err());
    }

    #[test]
    fn test_resolve_admin_and_system_keys() {
        let keys = keys();
        assert_eq!(keys.resolve("admin-key").unwrap(), Actor::Admin);
        assert_eq!(keys.resolve("carrier-key").unwrap(), Actor::System);

        let user = Uuid::new_v4();
        let token = keys.issue(user).unwrap();
        assert_eq!(keys.resolve(&token).unwrap(), Actor::User(user));
        assert!(keys.resolve("guess").is_err());
    }

    #[test]
    fn test_system_key_absent_means_no_system_actor() {
        let keys = AuthKeys::new(SECRET.to_string(), "admin-key".to_string(), None);
        assert!(keys.resolve("carrier-key").is_err());
    }
}
