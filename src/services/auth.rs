//! API-key authentication with a small role hierarchy
//!
//! Keys arrive in the `X-API-Key` header. Roles form a strict ladder:
//! admin > developer > user.

use std::collections::HashMap;
use std::sync::RwLock;

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{errors::AppError, AppState};

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Developer,
    Admin,
}

impl Role {
    pub fn permits(self, required: Role) -> bool {
        self >= required
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Developer => "developer",
            Self::Admin => "admin",
        }
    }
}

/// Identity attached to an authenticated request.
#[derive(Debug, Clone, Serialize)]
pub struct AuthContext {
    pub user_id: String,
    pub role: Role,
    pub key_created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct KeyRecord {
    user_id: String,
    role: Role,
    created_at: DateTime<Utc>,
    last_used: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct AuthService {
    keys: RwLock<HashMap<String, KeyRecord>>,
}

impl AuthService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with the configured admin key so the first real key
    /// can be issued over the API.
    pub fn with_bootstrap_admin(key: impl Into<String>) -> Self {
        let service = Self::new();
        service.insert(key.into(), "bootstrap-admin".to_string(), Role::Admin);
        service
    }

    fn insert(&self, key: String, user_id: String, role: Role) {
        self.keys.write().expect("auth key lock poisoned").insert(
            key,
            KeyRecord {
                user_id,
                role,
                created_at: Utc::now(),
                last_used: None,
            },
        );
    }

    pub fn issue_key(&self, user_id: &str, role: Role) -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let key = hex::encode(bytes);
        self.insert(key.clone(), user_id.to_string(), role);
        info!(user_id = %user_id, role = role.as_str(), "issued api key");
        key
    }

    /// Validate a key and stamp its last-used time.
    pub fn validate(&self, key: &str) -> Option<AuthContext> {
        let mut keys = self.keys.write().expect("auth key lock poisoned");
        let record = keys.get_mut(key)?;
        record.last_used = Some(Utc::now());
        Some(AuthContext {
            user_id: record.user_id.clone(),
            role: record.role,
            key_created_at: record.created_at,
        })
    }

    pub fn revoke(&self, key: &str) -> bool {
        self.keys
            .write()
            .expect("auth key lock poisoned")
            .remove(key)
            .is_some()
    }

    pub fn key_count(&self) -> usize {
        self.keys.read().expect("auth key lock poisoned").len()
    }
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<AuthContext, AppError> {
    let key = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .ok_or_else(|| AppError::authentication_required("API key required"))?;

    state
        .auth
        .validate(key)
        .ok_or_else(|| AppError::authentication_required("Invalid API key"))
}

pub async fn require_api_key(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let context = authenticate(&state, request.headers())?;
    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

pub async fn require_developer(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let context = authenticate(&state, request.headers())?;
    if !context.role.permits(Role::Developer) {
        return Err(AppError::authorization_denied(
            "Insufficient permissions. Developer role required.",
        ));
    }
    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

pub async fn require_admin(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let context = authenticate(&state, request.headers())?;
    if !context.role.permits(Role::Admin) {
        return Err(AppError::authorization_denied(
            "Insufficient permissions. Admin role required.",
        ));
    }
    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_key_validates_and_stamps_last_used() {
        let service = AuthService::new();
        let key = service.issue_key("user-1", Role::Developer);

        let context = service.validate(&key).expect("key is valid");
        assert_eq!(context.user_id, "user-1");
        assert_eq!(context.role, Role::Developer);

        let keys = service.keys.read().expect("lock");
        assert!(keys[&key].last_used.is_some());
    }

    #[test]
    fn unknown_key_fails_validation() {
        let service = AuthService::new();
        assert!(service.validate("nope").is_none());
    }

    #[test]
    fn revoked_key_stops_validating() {
        let service = AuthService::new();
        let key = service.issue_key("user-1", Role::User);

        assert!(service.revoke(&key));
        assert!(service.validate(&key).is_none());
        assert!(!service.revoke(&key));
    }

    #[test]
    fn bootstrap_admin_key_is_admin() {
        let service = AuthService::with_bootstrap_admin("root-key");
        let context = service.validate("root-key").expect("key is valid");
        assert_eq!(context.role, Role::Admin);
        assert_eq!(service.key_count(), 1);
    }

    #[test]
    fn role_ladder_permits_downward_only() {
        assert!(Role::Admin.permits(Role::User));
        assert!(Role::Admin.permits(Role::Developer));
        assert!(Role::Admin.permits(Role::Admin));
        assert!(Role::Developer.permits(Role::User));
        assert!(!Role::Developer.permits(Role::Admin));
        assert!(!Role::User.permits(Role::Developer));
    }

    #[test]
    fn issued_keys_are_unique_and_hex() {
        let service = AuthService::new();
        let first = service.issue_key("a", Role::User);
        let second = service.issue_key("a", Role::User);

        assert_ne!(first, second);
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
