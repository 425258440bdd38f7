//! Feature Sets and the Merge Engine
//!
//! A user's effective entitlements are computed by merging several feature
//! sets (default features, plan features, group memberships, bonuses) into
//! one. Each feature key registers a comparator in a single lookup table, so
//! adding a new key is an explicit, reviewed registration rather than a
//! silent fall-through.
//!
//! ## Design Principles
//!
//! 1. **Union semantics**: a key present in only one input is copied through
//! 2. **Per-key precedence**: the comparator decides which value wins
//! 3. **Algebraic guarantees**: merge is commutative, associative, idempotent

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Every feature key known to the system.
///
/// Serialized camelCase so persisted feature sets match the legacy user
/// document shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FeatureKey {
    /// Maximum collaborators per project (-1 = unlimited)
    Collaborators,
    /// Compile timeout in seconds
    CompileTimeout,
    /// Compile queue priority (standard or priority)
    CompileGroup,
    /// Full project history
    Versioning,
    Dropbox,
    Github,
    GitBridge,
    Templates,
    References,
    ReferencesSearch,
    Mendeley,
    Zotero,
    Papers,
    SymbolPalette,
    TrackChanges,
    /// Granted by the AI add-on, never inherited through group membership
    AiErrorAssistant,
}

impl FeatureKey {
    /// The comparator registry. Every key must be listed here; new feature
    /// keys are added by registering them with an explicit comparator.
    pub fn comparator(&self) -> Comparator {
        match self {
            Self::Collaborators => Comparator::LimitMax,
            Self::CompileTimeout => Comparator::NumericMax,
            Self::CompileGroup => Comparator::PriorityOverStandard,
            Self::Versioning
            | Self::Dropbox
            | Self::Github
            | Self::GitBridge
            | Self::Templates
            | Self::References
            | Self::ReferencesSearch
            | Self::Mendeley
            | Self::Zotero
            | Self::Papers
            | Self::SymbolPalette
            | Self::TrackChanges
            | Self::AiErrorAssistant => Comparator::BoolOr,
        }
    }
}

/// How two values for the same key are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    /// `true` beats `false`
    BoolOr,
    /// Numerically greater wins
    NumericMax,
    /// `-1` (unlimited) beats everything, otherwise greater wins
    LimitMax,
    /// `priority` beats `standard`
    PriorityOverStandard,
}

/// Compile queue tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompileGroup {
    Standard,
    Priority,
}

/// A single feature value. The shape must agree with the key's registered
/// comparator; mismatches from legacy documents resolve in the existing
/// value's favor (see `merge_values`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Flag(bool),
    Limit(i64),
    CompileGroup(CompileGroup),
}

impl FeatureValue {
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Flag(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_limit(&self) -> Option<i64> {
        match self {
            Self::Limit(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_compile_group(&self) -> Option<CompileGroup> {
        match self {
            Self::CompileGroup(value) => Some(*value),
            _ => None,
        }
    }
}

/// A mapping from feature key to value. Absent keys carry no entitlement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSet(BTreeMap<FeatureKey, FeatureValue>);

impl FeatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: FeatureKey) -> Option<&FeatureValue> {
        self.0.get(&key)
    }

    pub fn set(&mut self, key: FeatureKey, value: FeatureValue) {
        self.0.insert(key, value);
    }

    pub fn with(mut self, key: FeatureKey, value: FeatureValue) -> Self {
        self.set(key, value);
        self
    }

    pub fn remove(&mut self, key: FeatureKey) -> Option<FeatureValue> {
        self.0.remove(&key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FeatureKey, &FeatureValue)> {
        self.0.iter()
    }

    /// True if the feature is an enabled boolean flag.
    pub fn has_flag(&self, key: FeatureKey) -> bool {
        self.get(key).and_then(FeatureValue::as_flag).unwrap_or(false)
    }

    /// Merge another set into this one, returning the combined set.
    ///
    /// Union over keys; conflicts resolved by each key's comparator.
    pub fn merge(&self, other: &FeatureSet) -> FeatureSet {
        let mut result = self.clone();
        for (key, value) in other.iter() {
            match result.0.get(key) {
                Some(existing) => {
                    let winner = merge_values(*key, *existing, *value);
                    result.0.insert(*key, winner);
                }
                None => {
                    result.0.insert(*key, *value);
                }
            }
        }
        result
    }

    /// True iff merging this set into `current` would change `current`,
    /// i.e. this set contributes at least one preferred value.
    ///
    /// Consistent with `merge` by construction.
    pub fn is_better_than(&self, current: &FeatureSet) -> bool {
        current.merge(self) != *current
    }
}

impl FromIterator<(FeatureKey, FeatureValue)> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = (FeatureKey, FeatureValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Combine a list of feature sets into one effective set.
///
/// Left fold of `merge` seeded with the empty set: empty input yields the
/// empty set, a single input passes through by merge semantics.
pub fn compute_feature_set<'a, I>(feature_sets: I) -> FeatureSet
where
    I: IntoIterator<Item = &'a FeatureSet>,
{
    feature_sets
        .into_iter()
        .fold(FeatureSet::new(), |acc, set| acc.merge(set))
}

/// Pick the winner between two values for the same key.
///
/// A value whose shape doesn't match the registered comparator loses to one
/// that does; two mismatched values keep the existing side. Legacy documents
/// occasionally carry such values, so this logs rather than errors.
fn merge_values(key: FeatureKey, existing: FeatureValue, incoming: FeatureValue) -> FeatureValue {
    match key.comparator() {
        Comparator::BoolOr => match (existing.as_flag(), incoming.as_flag()) {
            (Some(a), Some(b)) => FeatureValue::Flag(a || b),
            (Some(_), None) => shape_mismatch(key, existing, incoming),
            (None, Some(_)) => incoming,
            (None, None) => shape_mismatch(key, existing, incoming),
        },
        Comparator::NumericMax => match (existing.as_limit(), incoming.as_limit()) {
            (Some(a), Some(b)) => FeatureValue::Limit(a.max(b)),
            (Some(_), None) => shape_mismatch(key, existing, incoming),
            (None, Some(_)) => incoming,
            (None, None) => shape_mismatch(key, existing, incoming),
        },
        Comparator::LimitMax => match (existing.as_limit(), incoming.as_limit()) {
            (Some(a), Some(b)) => {
                if a == -1 || b == -1 {
                    FeatureValue::Limit(-1)
                } else {
                    FeatureValue::Limit(a.max(b))
                }
            }
            (Some(_), None) => shape_mismatch(key, existing, incoming),
            (None, Some(_)) => incoming,
            (None, None) => shape_mismatch(key, existing, incoming),
        },
        Comparator::PriorityOverStandard => {
            match (existing.as_compile_group(), incoming.as_compile_group()) {
                (Some(a), Some(b)) => {
                    if a == CompileGroup::Priority || b == CompileGroup::Priority {
                        FeatureValue::CompileGroup(CompileGroup::Priority)
                    } else {
                        FeatureValue::CompileGroup(CompileGroup::Standard)
                    }
                }
                (Some(_), None) => shape_mismatch(key, existing, incoming),
                (None, Some(_)) => incoming,
                (None, None) => shape_mismatch(key, existing, incoming),
            }
        }
    }
}

fn shape_mismatch(key: FeatureKey, existing: FeatureValue, incoming: FeatureValue) -> FeatureValue {
    warn!(
        ?key,
        ?existing,
        ?incoming,
        "feature value shape does not match registered comparator, keeping existing"
    );
    existing
}
