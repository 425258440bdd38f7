//! TexHub Billing
//!
//! The subscription and entitlement core: plan catalog lookup, payment
//! provider subscription entities and change requests, effective feature
//! computation, collaborator limits and the group invitation workflow.
//! Persistence, the provider network client, analytics and email are
//! collaborator traits in [`stores`]; this crate holds the business rules.

pub mod catalog;
pub mod error;
pub mod features;
pub mod invites;
pub mod limits;
pub mod stores;
pub mod subscription;

pub use catalog::{BillingPeriod, NormalizedGroupPlan, PlanCatalog, PlanClassification, PlanType};
pub use error::{FeaturesError, InviteError, StoreError, SubscriptionError, SubscriptionResult};
pub use features::FeaturesService;
pub use invites::{CreateInviteOutcome, InviteView, TeamInviteService};
pub use limits::LimitationsService;
pub use subscription::{
    is_in_trial, is_standalone_ai_plan_code, should_change_at_term_end, AddOnUpdate,
    ChangeRequest, ProviderAddOn, ProviderService, ProviderSubscription, SavedAddOn,
    SubscriptionChange, Timeframe, UpdateRequest, AI_ADD_ON_CODE, MEMBERS_LIMIT_ADD_ON_CODE,
};
