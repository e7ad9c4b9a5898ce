//! Bearer-token authentication. §4.L.
//!
//! Tokens are opaque and pre-provisioned (issuing them is out of scope);
//! this module only resolves a presented token to a `(userId, role)` pair,
//! the way the reference server resolves a packet's device key against its
//! `known_keys` registry rather than verifying a self-contained credential.

use std::sync::Arc;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use dashmap::DashMap;

use crate::errors::QueueError;
use crate::models::{Role, UserId};

#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: UserId,
    pub role: Role,
}

pub struct SessionStore {
    tokens: DashMap<String, AuthUser>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self { tokens: DashMap::new() }
    }

    pub fn issue(&self, token: impl Into<String>, user_id: UserId, role: Role) {
        self.tokens.insert(token.into(), AuthUser { user_id, role });
    }

    pub fn revoke(&self, token: &str) {
        self.tokens.remove(token);
    }

    fn resolve(&self, token: &str) -> Option<AuthUser> {
        self.tokens.get(token).map(|e| e.clone())
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedSessionStore = Arc<SessionStore>;

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    SharedSessionStore: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = QueueError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(QueueError::Unauthorized)?;
        let sessions = SharedSessionStore::from_ref(state);
        sessions.resolve(token).ok_or(QueueError::Unauthorized)
    }
}

/// Requires the caller to hold the `venue_owner` role; used on handlers
/// that manage a venue's own queue (notify, verify, update-status).
pub struct VenueOwner(pub AuthUser);

#[axum::async_trait]
impl<S> FromRequestParts<S> for VenueOwner
where
    SharedSessionStore: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = QueueError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if user.role != Role::VenueOwner {
            return Err(QueueError::Forbidden);
        }
        Ok(VenueOwner(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_issued_token() {
        let store = SessionStore::new();
        store.issue("tok1", "u1".to_string(), Role::Customer);
        let user = store.resolve("tok1").unwrap();
        assert_eq!(user.user_id, "u1");
    }

    #[test]
    fn revoked_token_no_longer_resolves() {
        let store = SessionStore::new();
        store.issue("tok1", "u1".to_string(), Role::Customer);
        store.revoke("tok1");
        assert!(store.resolve("tok1").is_none());
    }

    #[test]
    fn unknown_token_does_not_resolve() {
        let store = SessionStore::new();
        assert!(store.resolve("ghost").is_none());
    }
}
