//! TexHub Shared Types
//!
//! This crate contains the domain types shared across the TexHub billing
//! platform: feature sets and their merge engine, the plan catalog, and id
//! wrappers.

pub mod features;
pub mod plans;
pub mod types;

pub use features::{
    compute_feature_set, Comparator, CompileGroup, FeatureKey, FeatureSet, FeatureValue,
};
pub use plans::{Plan, Settings};
pub use types::{SubscriptionId, User, UserId};
