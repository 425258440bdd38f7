//! Group invitation workflow
//!
//! Inviting a user to a group subscription, accepting an invitation, and
//! revoking one. Invitations are keyed by lowercase email within a group and
//! carry an opaque token used in the invite link.

use std::sync::Arc;

use rand::{distributions::Alphanumeric, Rng};
use serde_json::json;
use time::OffsetDateTime;
use tracing::info;

use texhub_shared::{SubscriptionId, UserId};

use crate::error::InviteError;
use crate::features::FeaturesService;
use crate::stores::{
    AuditLog, EmailSender, GroupSubscription, SsoInviteHandler, SubscriptionStore, TeamInvite,
    UserStore,
};

const INVITE_TOKEN_LENGTH: usize = 32;

/// What `create_invite` did: inviting yourself joins the group directly,
/// anyone else gets an emailed invitation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateInviteOutcome {
    MemberAdded { user_id: UserId },
    InviteSent { invite: TeamInvite },
}

/// A pending invitation together with the group it belongs to, as shown on
/// the invite landing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteView {
    pub subscription_id: SubscriptionId,
    pub plan_code: String,
    pub invite: TeamInvite,
}

pub struct TeamInviteService {
    subscriptions: Arc<dyn SubscriptionStore>,
    users: Arc<dyn UserStore>,
    features: Arc<FeaturesService>,
    email: Arc<dyn EmailSender>,
    audit: Arc<dyn AuditLog>,
    sso: Arc<dyn SsoInviteHandler>,
}

impl TeamInviteService {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        users: Arc<dyn UserStore>,
        features: Arc<FeaturesService>,
        email: Arc<dyn EmailSender>,
        audit: Arc<dyn AuditLog>,
        sso: Arc<dyn SsoInviteHandler>,
    ) -> Self {
        Self {
            subscriptions,
            users,
            features,
            email,
            audit,
            sso,
        }
    }

    /// Invite `email` to the group. Re-inviting an already invited address
    /// refreshes the token and timestamp; inviting your own address joins
    /// the group without an email round-trip.
    pub async fn create_invite(
        &self,
        subscription_id: SubscriptionId,
        inviter_id: UserId,
        email: &str,
    ) -> Result<CreateInviteOutcome, InviteError> {
        let email = email.to_lowercase();
        let group = self
            .subscriptions
            .get_subscription(subscription_id)
            .await?
            .ok_or_else(|| InviteError::NotFound(format!("subscription {subscription_id}")))?;

        if group.team_limit_reached() {
            return Err(InviteError::LimitReached);
        }
        if !group.group_plan {
            return Err(InviteError::WrongPlan);
        }
        let invited_user = self.users.get_user_by_email(&email).await?;
        if let Some(user) = &invited_user {
            if group.is_member(user.id) {
                return Err(InviteError::AlreadyInTeam);
            }
        }

        let inviter = self
            .users
            .get_user(inviter_id)
            .await?
            .ok_or_else(|| InviteError::NotFound(format!("user {inviter_id}")))?;

        if inviter.email.to_lowercase() == email {
            self.subscriptions.add_member(group.id, inviter_id).await?;
            self.features
                .refresh_features(inviter_id, "joined-group")
                .await
                .map_err(|err| crate::error::StoreError::new(err.to_string()))?;
            info!(subscription_id = %group.id, user_id = %inviter_id, "self-invite joined group");
            return Ok(CreateInviteOutcome::MemberAdded { user_id: inviter_id });
        }

        let invite = TeamInvite {
            email: email.clone(),
            token: generate_token(),
            inviter_name: inviter.display_name(),
            sent_at: OffsetDateTime::now_utc(),
        };
        self.subscriptions.upsert_invite(group.id, invite.clone()).await?;

        let invite_url = if group.sso_enabled {
            self.sso.invite_link(group.id, &invite.token).await?
        } else {
            format!("/subscription/invites/{}", invite.token)
        };
        self.email
            .send_team_invite(&email, &invite.inviter_name, &invite_url)
            .await?;

        self.audit_managed(&group, "group-invite-sent", Some(inviter_id), &email)
            .await?;
        info!(subscription_id = %group.id, email = %email, "sent group invite");
        Ok(CreateInviteOutcome::InviteSent { invite })
    }

    /// Look up a pending invitation by token.
    pub async fn get_invite(&self, token: &str) -> Result<InviteView, InviteError> {
        let group = self
            .subscriptions
            .get_subscription_by_invite_token(token)
            .await?
            .ok_or_else(|| InviteError::NotFound("invite token".to_string()))?;
        let invite = group
            .find_invite_by_token(token)
            .cloned()
            .ok_or_else(|| InviteError::NotFound("invite token".to_string()))?;
        Ok(InviteView {
            subscription_id: group.id,
            plan_code: group.plan_code,
            invite,
        })
    }

    /// Join the group behind the invitation.
    ///
    /// Joining a managed group replaces the user's own subscription: their
    /// prior subscription is deleted unless it is the group being joined.
    pub async fn accept_invite(&self, token: &str, user_id: UserId) -> Result<(), InviteError> {
        let group = self
            .subscriptions
            .get_subscription_by_invite_token(token)
            .await?
            .ok_or_else(|| InviteError::NotFound("invite token".to_string()))?;
        let invite = group
            .find_invite_by_token(token)
            .cloned()
            .ok_or_else(|| InviteError::NotFound("invite token".to_string()))?;

        self.subscriptions.add_member(group.id, user_id).await?;
        self.subscriptions.remove_invite(group.id, &invite.email).await?;

        if group.managed_users_enabled {
            if let Some(own) = self.subscriptions.get_users_subscription(user_id).await? {
                if own.id != group.id {
                    self.subscriptions.delete_subscription(own.id).await?;
                }
            }
        }

        self.features
            .refresh_features(user_id, "joined-group")
            .await
            .map_err(|err| crate::error::StoreError::new(err.to_string()))?;

        self.audit_managed(&group, "group-invite-accepted", Some(user_id), &invite.email)
            .await?;
        info!(subscription_id = %group.id, user_id = %user_id, "accepted group invite");
        Ok(())
    }

    /// Remove a pending invitation. Revoking is not validated against group
    /// state; removing an absent invite is a no-op at the store.
    pub async fn revoke_invite(
        &self,
        subscription_id: SubscriptionId,
        initiator: UserId,
        email: &str,
    ) -> Result<(), InviteError> {
        let email = email.to_lowercase();
        let group = self
            .subscriptions
            .get_subscription(subscription_id)
            .await?
            .ok_or_else(|| InviteError::NotFound(format!("subscription {subscription_id}")))?;

        self.subscriptions.remove_invite(group.id, &email).await?;
        self.audit_managed(&group, "group-invite-revoked", Some(initiator), &email)
            .await?;
        info!(subscription_id = %group.id, email = %email, "revoked group invite");
        Ok(())
    }

    async fn audit_managed(
        &self,
        group: &GroupSubscription,
        operation: &str,
        initiator: Option<UserId>,
        email: &str,
    ) -> Result<(), InviteError> {
        if group.managed_users_enabled {
            self.audit
                .record(group.id, operation, initiator, json!({ "email": email }))
                .await?;
        }
        Ok(())
    }
}

fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(INVITE_TOKEN_LENGTH)
        .map(char::from)
        .collect()
}
