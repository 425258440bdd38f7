//! Common types used across TexHub

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::features::FeatureSet;

// =============================================================================
// ID Wrappers
// =============================================================================

/// User ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a webhook account code into a user id. Provider accounts are
    /// keyed by our user id, but test accounts and manually created accounts
    /// carry arbitrary codes, so a parse failure is an expected outcome.
    pub fn parse(code: &str) -> Option<Self> {
        Uuid::parse_str(code).ok().map(Self)
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for UserId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Subscription document ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SubscriptionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// User model
// =============================================================================

/// User document, as returned by the user store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Numeric id from the pre-migration accounts system. Accounts below the
    /// configured cutoff keep their legacy perks.
    pub legacy_id: Option<i64>,
    /// The currently persisted effective feature set
    pub features: FeatureSet,
    pub signed_up_at: OffsetDateTime,
}

impl User {
    /// Display name used in invite emails: "First Last (email)" when a name
    /// is set, bare email otherwise.
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{} {} ({})", first, last, self.email),
            (Some(first), None) => format!("{} ({})", first, self.email),
            (None, Some(last)) => format!("{} ({})", last, self.email),
            (None, None) => self.email.clone(),
        }
    }
}
