//! Collaborator interfaces
//!
//! The billing services talk to persistence, the payment provider, analytics,
//! email and audit logging through these traits. Implementations live at the
//! application edge; everything here is `dyn`-safe so services hold
//! `Arc<dyn Trait>` handles.
//!
//! ## Design Principles
//!
//! - Absence of expected state is a `None`/empty return, not an error.
//!   `StoreError` means the collaborator itself failed and the operation
//!   should surface the failure to its caller.
//! - Analytics is fire-and-forget: sinks must not fail the business
//!   operation, so those methods return nothing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use texhub_shared::{FeatureSet, SubscriptionId, User, UserId};

use crate::error::StoreError;
use crate::subscription::{ChangeRequest, ProviderService, SavedAddOn, UpdateRequest};

// =============================================================================
// Documents
// =============================================================================

/// A pending invitation to join a group subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamInvite {
    pub email: String,
    pub token: String,
    pub inviter_name: String,
    pub sent_at: OffsetDateTime,
}

/// The subscription document as persisted on our side. Individual
/// subscriptions use the same shape with `group_plan = false` and no members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSubscription {
    pub id: SubscriptionId,
    pub admin_id: UserId,
    pub manager_ids: Vec<UserId>,
    pub member_ids: Vec<UserId>,
    pub team_invites: Vec<TeamInvite>,
    pub members_limit: u32,
    pub group_plan: bool,
    pub plan_code: String,
    /// Which provider bills this subscription; `None` for free groups
    pub payment_service: Option<ProviderService>,
    /// Add-ons from the last successfully billed state
    pub add_ons: Vec<SavedAddOn>,
    pub sso_config_id: Option<String>,
    pub sso_enabled: bool,
    pub managed_users_enabled: bool,
    pub domain_capture_enabled: bool,
    /// Managed groups can switch off per-user feature grants; members then
    /// get nothing from this subscription.
    pub user_features_disabled: bool,
}

impl GroupSubscription {
    pub fn new(admin_id: UserId, plan_code: impl Into<String>, group_plan: bool) -> Self {
        Self {
            id: SubscriptionId::new(),
            admin_id,
            manager_ids: Vec::new(),
            member_ids: Vec::new(),
            team_invites: Vec::new(),
            members_limit: 0,
            group_plan,
            plan_code: plan_code.into(),
            payment_service: None,
            add_ons: Vec::new(),
            sso_config_id: None,
            sso_enabled: false,
            managed_users_enabled: false,
            domain_capture_enabled: false,
            user_features_disabled: false,
        }
    }

    pub fn is_member(&self, user_id: UserId) -> bool {
        self.member_ids.contains(&user_id)
    }

    /// Pending invitations count against the seat limit alongside members.
    pub fn team_limit_reached(&self) -> bool {
        self.member_ids.len() + self.team_invites.len() >= self.members_limit as usize
    }

    pub fn has_add_on(&self, code: &str) -> bool {
        self.add_ons.iter().any(|add_on| add_on.add_on_code == code)
    }

    pub fn find_invite(&self, email: &str) -> Option<&TeamInvite> {
        self.team_invites.iter().find(|invite| invite.email == email)
    }

    pub fn find_invite_by_token(&self, token: &str) -> Option<&TeamInvite> {
        self.team_invites.iter().find(|invite| invite.token == token)
    }
}

/// Result of persisting a freshly computed feature set.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureUpdateResult {
    pub features: FeatureSet,
    /// Whether the persisted set differs from what was stored before
    pub changed: bool,
}

// =============================================================================
// Stores
// =============================================================================

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// The subscription the user administers, if any.
    async fn get_users_subscription(
        &self,
        user_id: UserId,
    ) -> Result<Option<GroupSubscription>, StoreError>;

    /// Group subscriptions the user is a member of.
    async fn get_member_subscriptions(
        &self,
        user_id: UserId,
    ) -> Result<Vec<GroupSubscription>, StoreError>;

    async fn get_subscription(
        &self,
        id: SubscriptionId,
    ) -> Result<Option<GroupSubscription>, StoreError>;

    async fn get_subscription_by_invite_token(
        &self,
        token: &str,
    ) -> Result<Option<GroupSubscription>, StoreError>;

    async fn add_member(&self, id: SubscriptionId, user_id: UserId) -> Result<(), StoreError>;

    /// Insert the invite, or replace an existing invite for the same email.
    async fn upsert_invite(&self, id: SubscriptionId, invite: TeamInvite)
        -> Result<(), StoreError>;

    async fn remove_invite(&self, id: SubscriptionId, email: &str) -> Result<(), StoreError>;

    async fn delete_subscription(&self, id: SubscriptionId) -> Result<(), StoreError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user(&self, user_id: UserId) -> Result<Option<User>, StoreError>;

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
}

#[async_trait]
pub trait FeatureStore: Send + Sync {
    /// Persist the user's effective feature set, reporting whether anything
    /// actually changed.
    async fn update_features(
        &self,
        user_id: UserId,
        features: FeatureSet,
    ) -> Result<FeatureUpdateResult, StoreError>;
}

// =============================================================================
// Payment provider
// =============================================================================

#[async_trait]
pub trait PaymentProviderClient: Send + Sync {
    async fn apply_change(&self, request: &ChangeRequest) -> Result<(), StoreError>;

    async fn apply_update(&self, request: &UpdateRequest) -> Result<(), StoreError>;
}

// =============================================================================
// Side channels
// =============================================================================

#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn record_event(&self, user_id: UserId, event: &str, properties: Value);

    async fn set_user_property(&self, user_id: UserId, name: &str, value: Value);
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_team_invite(
        &self,
        to: &str,
        inviter_name: &str,
        invite_url: &str,
    ) -> Result<(), StoreError>;

    async fn send_trial_onboarding(&self, user_id: UserId) -> Result<(), StoreError>;
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Append a group audit entry, e.g. `group-invite-sent`.
    async fn record(
        &self,
        subscription_id: SubscriptionId,
        operation: &str,
        initiator: Option<UserId>,
        info: Value,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait DropboxUnlinkHook: Send + Sync {
    /// Called when a feature refresh takes the dropbox feature away.
    async fn unlink(&self, user_id: UserId) -> Result<(), StoreError>;
}

#[async_trait]
pub trait SsoInviteHandler: Send + Sync {
    /// Build the invite link for an SSO-enabled group. Non-SSO groups use the
    /// standard token link and never call this.
    async fn invite_link(
        &self,
        subscription_id: SubscriptionId,
        token: &str,
    ) -> Result<String, StoreError>;
}

/// Feature grants earned through the referral programme.
#[async_trait]
pub trait ReferralFeaturesProvider: Send + Sync {
    async fn bonus_features(&self, user_id: UserId) -> Result<FeatureSet, StoreError>;
}

/// Feature grants from confirmed institutional affiliations.
#[async_trait]
pub trait InstitutionFeaturesProvider: Send + Sync {
    async fn institution_features(&self, user_id: UserId) -> Result<FeatureSet, StoreError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use std::sync::{Arc, Mutex};

    use crate::subscription::{ProviderSubscription, Timeframe};

    #[test]
    fn test_group_subscription_invite_lookup() {
        let mut group = GroupSubscription::new(UserId::new(), "group_collaborator", true);
        group.team_invites.push(TeamInvite {
            email: "grace@example.com".to_string(),
            token: "tok123".to_string(),
            inviter_name: "Ada Lovelace (ada@example.com)".to_string(),
            sent_at: OffsetDateTime::UNIX_EPOCH,
        });

        assert!(group.find_invite("grace@example.com").is_some());
        assert!(group.find_invite("nobody@example.com").is_none());
        assert_eq!(
            group.find_invite_by_token("tok123").map(|i| i.email.as_str()),
            Some("grace@example.com")
        );
    }

    #[test]
    fn test_group_subscription_membership_and_add_ons() {
        let member = UserId::new();
        let mut group = GroupSubscription::new(UserId::new(), "group_professional", true);
        group.member_ids.push(member);
        group.add_ons.push(SavedAddOn {
            add_on_code: "assistant".to_string(),
            quantity: 1,
            unit_amount_in_cents: 900,
        });

        assert!(group.is_member(member));
        assert!(!group.is_member(UserId::new()));
        assert!(group.has_add_on("assistant"));
        assert!(!group.has_add_on("additional-license"));
    }

    #[test]
    fn test_team_limit_counts_members_and_pending_invites() {
        let mut group = GroupSubscription::new(UserId::new(), "group_collaborator", true);
        group.members_limit = 2;
        group.member_ids.push(UserId::new());
        assert!(!group.team_limit_reached());

        group.team_invites.push(TeamInvite {
            email: "grace@example.com".to_string(),
            token: "tok123".to_string(),
            inviter_name: "Ada Lovelace (ada@example.com)".to_string(),
            sent_at: OffsetDateTime::UNIX_EPOCH,
        });
        assert!(group.team_limit_reached());
    }

    #[derive(Default)]
    struct RecordingProviderClient {
        changes: Mutex<Vec<ChangeRequest>>,
        updates: Mutex<Vec<UpdateRequest>>,
    }

    #[async_trait]
    impl PaymentProviderClient for RecordingProviderClient {
        async fn apply_change(&self, request: &ChangeRequest) -> Result<(), StoreError> {
            self.changes.lock().unwrap().push(request.clone());
            Ok(())
        }

        async fn apply_update(&self, request: &UpdateRequest) -> Result<(), StoreError> {
            self.updates.lock().unwrap().push(request.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_provider_client_receives_built_requests() {
        let subscription =
            ProviderSubscription::builder(SubscriptionId::new(), UserId::new(), "collaborator")
                .build();
        let recording = Arc::new(RecordingProviderClient::default());
        let client: Arc<dyn PaymentProviderClient> = recording.clone();

        let change = subscription.request_for_plan_change("professional", 1, false);
        client.apply_change(&change).await.unwrap();

        let update = subscription.request_for_terms_update("net 30");
        client.apply_update(&update).await.unwrap();

        let changes = recording.changes.lock().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].plan_code.as_deref(), Some("professional"));
        assert_eq!(changes[0].timeframe, Timeframe::Now);
        let updates = recording.updates.lock().unwrap();
        assert_eq!(updates[0].terms_and_conditions.as_deref(), Some("net 30"));
    }
}
