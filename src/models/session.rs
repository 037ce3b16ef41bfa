//! Session model

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::models::token::decode_claims;
use crate::models::UserProfile;

/// Where a session sits relative to its expiry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// More than the refresh threshold remains
    Fresh,
    /// Still usable, but within the refresh threshold
    NearExpiry,
    /// Past its expiry; treated as absent
    Expired,
}

/// The local record of an authenticated user.
///
/// `expires_at` and `user_id` are always derived from the token claims when
/// a session is built, so they cannot drift from the token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque bearer credential
    pub token: String,
    /// Expiry taken from the token's `exp` claim
    pub expires_at: DateTime<Utc>,
    /// Authenticated principal, equal to the token's `sub` claim
    pub user_id: i64,
    /// Cached profile snapshot for display
    pub user_profile: UserProfile,
}

impl Session {
    /// Build a session from a freshly acquired token and profile.
    ///
    /// # Errors
    ///
    /// - `MalformedToken` if the token cannot be decoded
    /// - `MalformedResponse` if the profile does not belong to the token's subject
    pub fn from_token(token: impl Into<String>, profile: UserProfile) -> Result<Self, AuthError> {
        let token = token.into();
        let claims = decode_claims(&token)?;

        if claims.sub != profile.id {
            return Err(AuthError::MalformedResponse(format!(
                "token subject {} does not match user {}",
                claims.sub, profile.id
            )));
        }

        Ok(Self {
            token,
            expires_at: claims.exp,
            user_id: claims.sub,
            user_profile: profile,
        })
    }

    /// Build the session that replaces this one after a refresh.
    ///
    /// The user id and profile carry over; token and expiry come from the
    /// new token.
    ///
    /// # Errors
    ///
    /// - `MalformedToken` if the new token cannot be decoded
    /// - `MalformedResponse` if the subject changed or the expiry did not move forward
    pub fn with_refreshed_token(&self, token: impl Into<String>) -> Result<Self, AuthError> {
        let token = token.into();
        let claims = decode_claims(&token)?;

        if claims.sub != self.user_id {
            return Err(AuthError::MalformedResponse(format!(
                "refreshed token belongs to user {} instead of {}",
                claims.sub, self.user_id
            )));
        }
        if claims.exp <= self.expires_at {
            return Err(AuthError::MalformedResponse(
                "refreshed token does not extend the session".to_string(),
            ));
        }

        Ok(Self {
            token,
            expires_at: claims.exp,
            user_id: self.user_id,
            user_profile: self.user_profile.clone(),
        })
    }

    /// Replace the cached profile.
    ///
    /// # Errors
    ///
    /// Returns `MalformedResponse` if the profile belongs to another user.
    pub fn with_profile(&self, profile: UserProfile) -> Result<Self, AuthError> {
        if profile.id != self.user_id {
            return Err(AuthError::MalformedResponse(format!(
                "profile {} does not belong to user {}",
                profile.id, self.user_id
            )));
        }
        Ok(Self {
            user_profile: profile,
            ..self.clone()
        })
    }

    /// Check if the session has expired
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Classify the session against the clock and refresh threshold
    pub fn phase(&self, now: DateTime<Utc>, threshold: Duration) -> SessionPhase {
        if self.is_expired(now) {
            SessionPhase::Expired
        } else if self.expires_at - now <= threshold {
            SessionPhase::NearExpiry
        } else {
            SessionPhase::Fresh
        }
    }
}
