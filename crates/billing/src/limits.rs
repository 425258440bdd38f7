//! Collaborator and seat limit checks
//!
//! Answers "can this happen" questions against the collaborator limit in a
//! user's effective features and the seat limit on a group subscription.
//! A limit of `-1` means unlimited and always allows.

use std::sync::Arc;

use texhub_shared::{FeatureKey, FeatureSet, Settings, UserId};

use crate::error::StoreError;
use crate::stores::{GroupSubscription, UserStore};

pub struct LimitationsService {
    settings: Arc<Settings>,
    users: Arc<dyn UserStore>,
}

impl LimitationsService {
    pub fn new(settings: Arc<Settings>, users: Arc<dyn UserStore>) -> Self {
        Self { settings, users }
    }

    /// The collaborator limit from the user's persisted features. Unknown
    /// users and users without the feature fall back to the default set.
    pub async fn allowed_collaborators_for_user(
        &self,
        user_id: UserId,
    ) -> Result<i64, StoreError> {
        let features = self
            .users
            .get_user(user_id)
            .await?
            .map(|user| user.features)
            .unwrap_or_default();
        Ok(self.collaborator_limit(&features))
    }

    /// Whether one more editor fits on a project owned by `project_owner`.
    pub async fn can_accept_edit_collaborator_invite(
        &self,
        project_owner: UserId,
        current_editors: u32,
    ) -> Result<bool, StoreError> {
        self.can_add_x_edit_collaborators(project_owner, current_editors, 0, 1)
            .await
    }

    /// Whether `requested` more editors fit, counting both current editors
    /// and invites that are still pending.
    pub async fn can_add_x_edit_collaborators(
        &self,
        project_owner: UserId,
        current_editors: u32,
        pending_invites: u32,
        requested: u32,
    ) -> Result<bool, StoreError> {
        let allowed = self.allowed_collaborators_for_user(project_owner).await?;
        if allowed == -1 {
            return Ok(true);
        }
        let needed = i64::from(current_editors) + i64::from(pending_invites) + i64::from(requested);
        Ok(needed <= allowed)
    }

    /// Whether the group is full, counting members and pending invites.
    pub fn team_limit_reached(&self, group: &GroupSubscription) -> bool {
        group.team_limit_reached()
    }

    fn collaborator_limit(&self, features: &FeatureSet) -> i64 {
        features
            .get(FeatureKey::Collaborators)
            .and_then(|value| value.as_limit())
            .or_else(|| {
                self.settings
                    .default_features
                    .get(FeatureKey::Collaborators)
                    .and_then(|value| value.as_limit())
            })
            .unwrap_or(0)
    }
}
