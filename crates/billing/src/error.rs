//! Billing error types

use thiserror::Error;

/// Errors raised while building subscription change requests.
///
/// All of these are caller-input validation failures: they are raised
/// synchronously so the UI layer can show a precise message, and they are
/// never retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("subscription {subscription_id} already has add-on {add_on_code}")]
    DuplicateAddOn {
        subscription_id: String,
        add_on_code: String,
    },

    #[error("subscription {subscription_id} does not have add-on {add_on_code}")]
    AddOnNotPresent {
        subscription_id: String,
        add_on_code: String,
    },

    #[error("unable to find plan in settings: {plan_code}")]
    PlanNotFound { plan_code: String },

    #[error("change request must carry a plan change or add-on updates")]
    InvalidChangeRequest,
}

/// Failure from an external store or provider collaborator. The core never
/// retries these; absence of expected state is a distinct, non-error outcome
/// under each store's contract.
#[derive(Debug, Error)]
#[error("store error: {0}")]
pub struct StoreError(pub String);

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Errors from the group invitation workflow.
///
/// The first three are business outcomes shown to the inviter, not system
/// failures; `NotFound` is the 404-style case for unknown invite tokens.
#[derive(Debug, Error)]
pub enum InviteError {
    #[error("group has reached its member limit")]
    LimitReached,

    #[error("subscription is not a group plan")]
    WrongPlan,

    #[error("user is already a member of the group")]
    AlreadyInTeam,

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from feature computation and refresh.
#[derive(Debug, Error)]
pub enum FeaturesError {
    #[error("user {0} not found")]
    UserNotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type SubscriptionResult<T> = Result<T, SubscriptionError>;
