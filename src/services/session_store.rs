//! Session store
//!
//! The only code that reads or writes persisted session state. Two keys are
//! kept, always written and cleared together in one storage call:
//! - `auth_session`: token, expiry, user id and the embedded profile
//! - `user_profile`: a copy of the profile for fast UI rendering
//!
//! Reads fail closed. Anything short of a complete, self-consistent record
//! reads as "no session".

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{AuthError, AuthResult};
use crate::models::{decode_claims, Session, UserProfile};
use crate::storage::KeyValueStore;

/// Storage key of the session record
pub const SESSION_KEY: &str = "auth_session";
/// Storage key of the denormalised profile
pub const PROFILE_KEY: &str = "user_profile";

/// Persisted session state over a key-value store
#[derive(Clone)]
pub struct SessionStore {
    storage: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore").finish_non_exhaustive()
    }
}

impl SessionStore {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self { storage }
    }

    /// Read the stored session.
    ///
    /// Returns `None` when either key is missing, a record does not parse,
    /// the token does not decode, the stored expiry or user id disagrees with
    /// the token, the profile copy belongs to another user, or storage fails.
    /// Expiry is not checked here; see `SessionManager`.
    pub async fn read(&self) -> Option<Session> {
        let values = match self.storage.get_many(&[SESSION_KEY, PROFILE_KEY]).await {
            Ok(values) => values,
            Err(e) => {
                tracing::warn!("Failed to read session from storage: {:#}", e);
                return None;
            }
        };
        validate_record(values)
    }

    /// Read only the profile copy, if it matches a stored session
    pub async fn read_profile(&self) -> Option<UserProfile> {
        self.read().await.map(|session| session.user_profile)
    }

    /// Replace both keys with `session`
    pub async fn write(&self, session: &Session) -> AuthResult<()> {
        let record = serde_json::to_value(session)
            .map_err(|e| AuthError::Storage(format!("failed to serialize session: {}", e)))?;
        let profile = serde_json::to_value(&session.user_profile)
            .map_err(|e| AuthError::Storage(format!("failed to serialize profile: {}", e)))?;

        self.storage
            .set_many(vec![
                (SESSION_KEY.to_string(), record),
                (PROFILE_KEY.to_string(), profile),
            ])
            .await
            .map_err(|e| AuthError::Storage(format!("{:#}", e)))?;

        tracing::debug!("Stored session for user {}", session.user_id);
        Ok(())
    }

    /// Remove both keys. Clearing an empty store is a no-op.
    pub async fn clear(&self) -> AuthResult<()> {
        self.storage
            .remove_many(&[SESSION_KEY, PROFILE_KEY])
            .await
            .map_err(|e| AuthError::Storage(format!("{:#}", e)))?;

        tracing::debug!("Cleared stored session");
        Ok(())
    }
}

fn validate_record(mut values: HashMap<String, Value>) -> Option<Session> {
    let record = values.remove(SESSION_KEY)?;
    let profile = values.remove(PROFILE_KEY)?;

    let session: Session = match serde_json::from_value(record) {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!("Discarding unreadable session record: {}", e);
            return None;
        }
    };
    let profile: UserProfile = match serde_json::from_value(profile) {
        Ok(profile) => profile,
        Err(e) => {
            tracing::warn!("Discarding unreadable profile record: {}", e);
            return None;
        }
    };

    let claims = match decode_claims(&session.token) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::warn!("Discarding session with undecodable token: {}", e);
            return None;
        }
    };

    if claims.sub != session.user_id
        || claims.exp != session.expires_at
        || session.user_profile.id != session.user_id
        || profile.id != session.user_id
    {
        tracing::warn!("Discarding inconsistent session record");
        return None;
    }

    Some(Session {
        user_profile: profile,
        ..session
    })
}
