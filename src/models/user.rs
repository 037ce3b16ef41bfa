//! User profile model
//!
//! The profile is a denormalised snapshot of user-facing fields returned by
//! the backend alongside a token. It is advisory: surfaces render it while a
//! fresh fetch is pending, and it never takes part in authorization.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Cached user-facing fields for the signed-in user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// User id, equal to the token subject
    pub id: i64,
    /// Unique handle
    pub username: String,
    /// Email address, when the backend includes it
    #[serde(default)]
    pub email: Option<String>,
    /// Display name
    #[serde(default)]
    pub display_name: Option<String>,
    /// Avatar image URL
    #[serde(default, alias = "avatar")]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub gifs_count: u64,
    #[serde(default)]
    pub followers_count: u64,
    #[serde(default)]
    pub following_count: u64,
    /// Fields this client does not model, kept so nothing is lost on rewrite
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserProfile {
    /// Create a minimal profile
    pub fn new(id: i64, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            email: None,
            display_name: None,
            avatar_url: None,
            gifs_count: 0,
            followers_count: 0,
            following_count: 0,
            extra: Map::new(),
        }
    }

    /// Name to show in the UI: display name if set, otherwise the username
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.username)
    }
}
