//! Plan catalog types
//!
//! Plans are loaded once from static configuration and read-only for the
//! process lifetime. Components receive a reference to `Settings` at
//! construction time; nothing reads mutable global state.

use serde::{Deserialize, Serialize};

use crate::features::{CompileGroup, FeatureKey, FeatureSet, FeatureValue};

/// A catalog entry for a purchasable plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Unique plan code, e.g. `collaborator-annual`
    pub code: String,
    pub name: String,
    pub price_in_cents: i64,
    pub annual: bool,
    pub features: FeatureSet,
    pub group_plan: bool,
    pub members_limit: Option<u32>,
    /// Add-on code used to extend the seat count past `members_limit`
    pub members_limit_add_on: Option<String>,
    /// Legacy and internal plans stay purchasable but are not advertised
    pub hide_from_users: bool,
}

impl Plan {
    fn individual(code: &str, name: &str, price_in_cents: i64, features: FeatureSet) -> Self {
        Self {
            code: code.to_string(),
            name: name.to_string(),
            price_in_cents,
            annual: code.ends_with("-annual"),
            features,
            group_plan: false,
            members_limit: None,
            members_limit_add_on: None,
            hide_from_users: false,
        }
    }

    fn group(code: &str, name: &str, price_in_cents: i64, features: FeatureSet) -> Self {
        Self {
            code: code.to_string(),
            name: name.to_string(),
            price_in_cents,
            annual: true,
            features,
            group_plan: true,
            members_limit: Some(2),
            members_limit_add_on: Some("additional-license".to_string()),
            hide_from_users: false,
        }
    }
}

/// Immutable application settings for the billing slice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub plans: Vec<Plan>,
    /// Features every registered user gets
    pub default_features: FeatureSet,
    /// The "everything on" feature set; used to tag the `feature-set`
    /// analytics property as `all` vs `mixed`
    pub all_features: FeatureSet,
    /// Perks kept by accounts from the pre-migration system
    pub grandfathered_features: FeatureSet,
    /// Legacy numeric ids below this cutoff keep `grandfathered_features`.
    /// The cutoff stands in for "accounts created before the 2017 pricing
    /// change"; treat it as configuration, not business logic.
    pub grandfather_cutoff: i64,
    /// Catalog version tag encoded into provider pricing lookup keys
    pub catalog_version_tag: String,
}

impl Settings {
    /// The production-shaped catalog. Tests build on this so that plan codes
    /// and feature sets stay consistent across the codebase.
    pub fn default_catalog() -> Self {
        let default_features = FeatureSet::new()
            .with(FeatureKey::Collaborators, FeatureValue::Limit(1))
            .with(FeatureKey::CompileTimeout, FeatureValue::Limit(60))
            .with(
                FeatureKey::CompileGroup,
                FeatureValue::CompileGroup(CompileGroup::Standard),
            )
            .with(FeatureKey::Versioning, FeatureValue::Flag(false))
            .with(FeatureKey::Dropbox, FeatureValue::Flag(false))
            .with(FeatureKey::Github, FeatureValue::Flag(false))
            .with(FeatureKey::Templates, FeatureValue::Flag(false))
            .with(FeatureKey::References, FeatureValue::Flag(false))
            .with(FeatureKey::TrackChanges, FeatureValue::Flag(false));

        let collaborator_features = paid_features(10);
        let professional_features = paid_features(-1);
        let student_features = paid_features(6);

        let all_features = professional_features
            .clone()
            .with(FeatureKey::ReferencesSearch, FeatureValue::Flag(true))
            .with(FeatureKey::Mendeley, FeatureValue::Flag(true))
            .with(FeatureKey::Zotero, FeatureValue::Flag(true))
            .with(FeatureKey::Papers, FeatureValue::Flag(true))
            .with(FeatureKey::SymbolPalette, FeatureValue::Flag(true))
            .with(FeatureKey::AiErrorAssistant, FeatureValue::Flag(true));

        let grandfathered_features = FeatureSet::new()
            .with(FeatureKey::Versioning, FeatureValue::Flag(true))
            .with(FeatureKey::Github, FeatureValue::Flag(true));

        let plans = vec![
            Plan::individual("collaborator", "Standard", 2300, collaborator_features.clone()),
            Plan::individual(
                "collaborator-annual",
                "Standard Annual",
                23900,
                collaborator_features.clone(),
            ),
            Plan {
                hide_from_users: true,
                ..Plan::individual(
                    "collaborator_free_trial_7_days",
                    "Standard Trial",
                    2300,
                    collaborator_features.clone(),
                )
            },
            Plan::individual("professional", "Professional", 4500, professional_features.clone()),
            Plan::individual(
                "professional-annual",
                "Professional Annual",
                46900,
                professional_features.clone(),
            ),
            Plan {
                hide_from_users: true,
                ..Plan::individual(
                    "professional_free_trial_7_days",
                    "Professional Trial",
                    4500,
                    professional_features.clone(),
                )
            },
            Plan::individual("student", "Student", 1000, student_features.clone()),
            Plan::individual("student-annual", "Student Annual", 9900, student_features.clone()),
            Plan {
                hide_from_users: true,
                ..Plan::individual(
                    "student_free_trial_7_days",
                    "Student Trial",
                    1000,
                    student_features,
                )
            },
            // Standalone AI assistant subscriptions carry no editor features
            Plan::individual(
                "assistant",
                "AI Assist",
                900,
                FeatureSet::new().with(FeatureKey::AiErrorAssistant, FeatureValue::Flag(true)),
            ),
            Plan::individual(
                "assistant-annual",
                "AI Assist Annual",
                8900,
                FeatureSet::new().with(FeatureKey::AiErrorAssistant, FeatureValue::Flag(true)),
            ),
            Plan::group(
                "group_collaborator",
                "Group Standard",
                15800,
                collaborator_features,
            ),
            Plan::group(
                "group_professional",
                "Group Professional",
                31900,
                professional_features,
            ),
        ];

        Self {
            plans,
            default_features,
            all_features,
            grandfathered_features,
            grandfather_cutoff: 1_000_000,
            catalog_version_tag: "jun2025".to_string(),
        }
    }
}

/// Feature set shared by the paid editor plans; they differ only in the
/// collaborator limit.
fn paid_features(collaborators: i64) -> FeatureSet {
    FeatureSet::new()
        .with(FeatureKey::Collaborators, FeatureValue::Limit(collaborators))
        .with(FeatureKey::CompileTimeout, FeatureValue::Limit(240))
        .with(
            FeatureKey::CompileGroup,
            FeatureValue::CompileGroup(CompileGroup::Priority),
        )
        .with(FeatureKey::Versioning, FeatureValue::Flag(true))
        .with(FeatureKey::Dropbox, FeatureValue::Flag(true))
        .with(FeatureKey::Github, FeatureValue::Flag(true))
        .with(FeatureKey::GitBridge, FeatureValue::Flag(true))
        .with(FeatureKey::Templates, FeatureValue::Flag(true))
        .with(FeatureKey::References, FeatureValue::Flag(true))
        .with(FeatureKey::TrackChanges, FeatureValue::Flag(true))
}
