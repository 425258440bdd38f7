//! Effective feature computation
//!
//! A user's effective features are the union of every entitlement source:
//! defaults, their own paid subscription, group memberships, referral
//! bonuses, legacy account perks and institutional affiliations. The union
//! is a fold of the shared merge engine, so order never matters.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info};

use texhub_shared::{
    compute_feature_set, FeatureKey, FeatureSet, FeatureValue, Settings, UserId,
};

use crate::catalog::PlanCatalog;
use crate::error::FeaturesError;
use crate::stores::{
    AnalyticsSink, DropboxUnlinkHook, FeatureStore, FeatureUpdateResult,
    InstitutionFeaturesProvider, ReferralFeaturesProvider, SubscriptionStore, UserStore,
};
use crate::subscription::{is_standalone_ai_plan_code, AI_ADD_ON_CODE};

pub struct FeaturesService {
    settings: Arc<Settings>,
    subscriptions: Arc<dyn SubscriptionStore>,
    users: Arc<dyn UserStore>,
    feature_store: Arc<dyn FeatureStore>,
    analytics: Arc<dyn AnalyticsSink>,
    dropbox: Arc<dyn DropboxUnlinkHook>,
    referrals: Arc<dyn ReferralFeaturesProvider>,
    institutions: Arc<dyn InstitutionFeaturesProvider>,
}

impl FeaturesService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Arc<Settings>,
        subscriptions: Arc<dyn SubscriptionStore>,
        users: Arc<dyn UserStore>,
        feature_store: Arc<dyn FeatureStore>,
        analytics: Arc<dyn AnalyticsSink>,
        dropbox: Arc<dyn DropboxUnlinkHook>,
        referrals: Arc<dyn ReferralFeaturesProvider>,
        institutions: Arc<dyn InstitutionFeaturesProvider>,
    ) -> Self {
        Self {
            settings,
            subscriptions,
            users,
            feature_store,
            analytics,
            dropbox,
            referrals,
            institutions,
        }
    }

    /// Compute the user's effective feature set from current state, without
    /// persisting anything.
    pub async fn compute_features(&self, user_id: UserId) -> Result<FeatureSet, FeaturesError> {
        let user = self
            .users
            .get_user(user_id)
            .await?
            .ok_or_else(|| FeaturesError::UserNotFound(user_id.to_string()))?;

        let catalog = PlanCatalog::new(&self.settings);
        let mut sources: Vec<FeatureSet> = vec![self.settings.default_features.clone()];

        // Own subscription. Group plan features reach the admin through
        // membership, not through administration, so a group-plan
        // subscription contributes nothing here.
        let own_subscription = self.subscriptions.get_users_subscription(user_id).await?;
        if let Some(subscription) = &own_subscription {
            if !subscription.user_features_disabled && !subscription.group_plan {
                if let Some(plan) = catalog.find_plan(&subscription.plan_code) {
                    sources.push(plan.features.clone());
                }
            }
        }

        // Group memberships. The AI assistant is licensed per user, so
        // member-derived sets never carry it.
        for group in self.subscriptions.get_member_subscriptions(user_id).await? {
            if group.user_features_disabled {
                continue;
            }
            if let Some(plan) = catalog.find_plan(&group.plan_code) {
                let mut features = plan.features.clone();
                features.remove(FeatureKey::AiErrorAssistant);
                sources.push(features);
            }
        }

        sources.push(self.referrals.bonus_features(user_id).await?);

        if let Some(legacy_id) = user.legacy_id {
            if legacy_id < self.settings.grandfather_cutoff {
                sources.push(self.settings.grandfathered_features.clone());
            }
        }

        sources.push(self.institutions.institution_features(user_id).await?);

        // The AI add-on on the user's own subscription grants the assistant,
        // whether attached to a regular plan or sold standalone.
        if let Some(subscription) = &own_subscription {
            if !subscription.user_features_disabled
                && (subscription.has_add_on(AI_ADD_ON_CODE)
                    || is_standalone_ai_plan_code(&subscription.plan_code))
            {
                sources.push(
                    FeatureSet::new()
                        .with(FeatureKey::AiErrorAssistant, FeatureValue::Flag(true)),
                );
            }
        }

        let features = compute_feature_set(sources.iter());
        debug!(user_id = %user_id, source_count = sources.len(), "computed features");
        Ok(features)
    }

    /// Recompute and persist the user's features, updating the analytics
    /// `feature-set` property and unlinking dropbox when the refresh takes
    /// the feature away. Returns the persisted set and whether it changed.
    pub async fn refresh_features(
        &self,
        user_id: UserId,
        reason: &str,
    ) -> Result<FeatureUpdateResult, FeaturesError> {
        let user = self
            .users
            .get_user(user_id)
            .await?
            .ok_or_else(|| FeaturesError::UserNotFound(user_id.to_string()))?;
        let had_dropbox = user.features.has_flag(FeatureKey::Dropbox);

        let features = self.compute_features(user_id).await?;
        let result = self
            .feature_store
            .update_features(user_id, features.clone())
            .await?;

        let feature_set_tag = if features == self.settings.all_features {
            "all"
        } else {
            "mixed"
        };
        self.analytics
            .set_user_property(user_id, "feature-set", json!(feature_set_tag))
            .await;

        if had_dropbox && !features.has_flag(FeatureKey::Dropbox) {
            self.dropbox.unlink(user_id).await?;
        }

        info!(
            user_id = %user_id,
            reason,
            changed = result.changed,
            feature_set = feature_set_tag,
            "refreshed features"
        );
        Ok(result)
    }
}
