//! Hook record
//!
//! The on-disk and on-the-wire shape of a hook. Field names are snake_case to
//! match the persisted store format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named, token-guarded trigger that maps to a flag file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hook {
    /// Unique identifier, also the URL path segment at trigger time
    pub id: String,
    /// Human-readable label
    pub name: String,
    /// Free text
    #[serde(default)]
    pub description: String,
    /// Secret trigger token
    #[serde(default)]
    pub token: String,
    /// Path of the flag file, relative to the flags root
    pub flag_file: String,
    /// Disabled hooks refuse every trigger
    #[serde(default)]
    pub enabled: bool,
    /// Set once at creation
    #[serde(default = "epoch")]
    pub created_at: DateTime<Utc>,
    /// Refreshed on every mutation
    #[serde(default = "epoch")]
    pub updated_at: DateTime<Utc>,
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

impl Hook {
    /// Create an enabled hook with no token and unset timestamps.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        flag_file: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            token: String::new(),
            flag_file: flag_file.into(),
            enabled: true,
            created_at: epoch(),
            updated_at: epoch(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}
