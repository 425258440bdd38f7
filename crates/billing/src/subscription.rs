//! Payment provider subscription entities
//!
//! Value objects mirroring the provider's view of a subscription, plus the
//! change-request builders that turn a desired end state into an instruction
//! for the provider client.
//!
//! ## Design Principles
//!
//! - Entities are constructed from provider data and never mutated in place;
//!   every operation returns a new request object.
//! - Validation failures are raised synchronously as `SubscriptionError` so
//!   callers can surface a precise message before any network call happens.
//! - Money is `Decimal`. The provider reports prices with two decimal places
//!   and tax must round half-up on the cent.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use texhub_shared::{Plan, SubscriptionId, UserId};

use crate::catalog::PlanCatalog;
use crate::error::{SubscriptionError, SubscriptionResult};

/// Add-on code for the AI assistant when attached to a regular plan.
pub const AI_ADD_ON_CODE: &str = "assistant";

/// Add-on code used to raise a group subscription's seat count. Group plans
/// are priced per seat on the current provider, so quantity changes travel
/// through this add-on.
pub const MEMBERS_LIMIT_ADD_ON_CODE: &str = "additional-license";

/// Plan codes that sell the AI assistant on its own, without editor features.
pub const STANDALONE_AI_PLAN_CODES: [&str; 2] = ["assistant", "assistant-annual"];

/// Whether a plan code is a standalone AI assistant plan.
pub fn is_standalone_ai_plan_code(plan_code: &str) -> bool {
    STANDALONE_AI_PLAN_CODES.contains(&plan_code)
}

/// When a change request takes effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeframe {
    Now,
    TermEnd,
}

/// Which payment provider manages a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderService {
    Recurly,
    StripeUs,
    StripeUk,
}

impl ProviderService {
    pub fn is_stripe(&self) -> bool {
        matches!(self, Self::StripeUs | Self::StripeUk)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recurly => "recurly",
            Self::StripeUs => "stripe-us",
            Self::StripeUk => "stripe-uk",
        }
    }
}

/// An add-on currently attached to a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderAddOn {
    pub code: String,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
}

impl ProviderAddOn {
    pub fn pre_tax_total(&self) -> Decimal {
        Decimal::from(self.quantity) * self.unit_price
    }

    /// An update that keeps this add-on as it is.
    pub fn to_update(&self) -> AddOnUpdate {
        AddOnUpdate {
            code: self.code.clone(),
            quantity: Some(self.quantity),
            unit_price: Some(self.unit_price),
        }
    }
}

/// One add-on line in a change request. Absent fields keep the provider's
/// current value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddOnUpdate {
    pub code: String,
    pub quantity: Option<u32>,
    pub unit_price: Option<Decimal>,
}

/// An add-on snapshot from the last successfully billed state, as persisted
/// alongside the subscription record. Prices are stored in cents there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedAddOn {
    pub add_on_code: String,
    pub quantity: u32,
    pub unit_amount_in_cents: i64,
}

/// Instruction for the provider client to change a subscription's plan
/// and/or add-ons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub subscription_id: SubscriptionId,
    pub timeframe: Timeframe,
    pub plan_code: Option<String>,
    pub add_on_updates: Option<Vec<AddOnUpdate>>,
}

impl ChangeRequest {
    /// A change request must carry a plan change, add-on updates, or both.
    pub fn new(
        subscription_id: SubscriptionId,
        timeframe: Timeframe,
        plan_code: Option<String>,
        add_on_updates: Option<Vec<AddOnUpdate>>,
    ) -> SubscriptionResult<Self> {
        if plan_code.is_none() && add_on_updates.is_none() {
            return Err(SubscriptionError::InvalidChangeRequest);
        }
        Ok(Self {
            subscription_id,
            timeframe,
            plan_code,
            add_on_updates,
        })
    }
}

/// Instruction for the provider client to update billing metadata that does
/// not affect pricing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub subscription_id: SubscriptionId,
    pub po_number: Option<String>,
    pub terms_and_conditions: Option<String>,
}

/// A pending change scheduled on a subscription, projected to the state the
/// subscription will have next period.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionChange {
    pub next_plan_code: String,
    pub next_plan_name: String,
    pub next_plan_price: Decimal,
    pub next_add_ons: Vec<ProviderAddOn>,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

impl SubscriptionChange {
    /// Totals are derived, not trusted from the caller: the subtotal sums the
    /// next plan price and add-on lines, tax rounds half-up on the cent.
    pub fn new(
        tax_rate: Decimal,
        next_plan_code: String,
        next_plan_name: String,
        next_plan_price: Decimal,
        next_add_ons: Vec<ProviderAddOn>,
    ) -> Self {
        let mut subtotal = next_plan_price;
        for add_on in &next_add_ons {
            subtotal += add_on.pre_tax_total();
        }
        let tax =
            (subtotal * tax_rate).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        let total = subtotal + tax;
        Self {
            next_plan_code,
            next_plan_name,
            next_plan_price,
            next_add_ons,
            subtotal,
            tax,
            total,
        }
    }

    pub fn get_add_on(&self, add_on_code: &str) -> Option<&ProviderAddOn> {
        self.next_add_ons.iter().find(|a| a.code == add_on_code)
    }
}

/// A subscription as reported by the payment provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSubscription {
    pub id: SubscriptionId,
    pub user_id: UserId,
    pub plan_code: String,
    pub plan_name: String,
    pub plan_price: Decimal,
    pub add_ons: Vec<ProviderAddOn>,
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    /// Always uppercase; providers disagree on casing
    pub currency: String,
    pub total: Decimal,
    pub period_start: Option<OffsetDateTime>,
    pub period_end: Option<OffsetDateTime>,
    pub collection_method: String,
    pub po_number: String,
    pub terms_and_conditions: String,
    pub pending_change: Option<SubscriptionChange>,
    pub service: ProviderService,
    pub state: String,
    pub trial_period_start: Option<OffsetDateTime>,
    pub trial_period_end: Option<OffsetDateTime>,
}

impl ProviderSubscription {
    pub fn builder(
        id: SubscriptionId,
        user_id: UserId,
        plan_code: impl Into<String>,
    ) -> ProviderSubscriptionBuilder {
        ProviderSubscriptionBuilder::new(id, user_id, plan_code)
    }

    /// Whether this subscription currently has the given add-on.
    pub fn has_add_on(&self, code: &str) -> bool {
        self.add_ons.iter().any(|add_on| add_on.code == code)
    }

    /// Whether this subscription will have the given add-on next billing
    /// period: either no change is pending and it has the add-on now, or the
    /// pending change includes it.
    pub fn has_add_on_next_period(&self, code: &str) -> bool {
        match &self.pending_change {
            Some(change) => change.get_add_on(code).is_some(),
            None => self.has_add_on(code),
        }
    }

    /// Whether this subscription sells the AI assistant on its own.
    pub fn is_standalone_ai_add_on(&self) -> bool {
        is_standalone_ai_plan_code(&self.plan_code)
    }

    pub fn is_group_subscription(&self, catalog: &PlanCatalog<'_>) -> bool {
        catalog.is_group_plan_code(&self.plan_code)
    }

    pub fn is_collection_method_manual(&self) -> bool {
        self.collection_method == "manual"
    }

    /// Whether changing to `new_plan_code` should wait for the term end.
    /// Downgrades wait; anything during a trial applies immediately.
    pub fn should_plan_change_at_term_end(
        &self,
        catalog: &PlanCatalog<'_>,
        new_plan_code: &str,
        now: OffsetDateTime,
    ) -> SubscriptionResult<bool> {
        let current_plan =
            catalog
                .find_plan(&self.plan_code)
                .ok_or_else(|| SubscriptionError::PlanNotFound {
                    plan_code: self.plan_code.clone(),
                })?;
        let new_plan =
            catalog
                .find_plan(new_plan_code)
                .ok_or_else(|| SubscriptionError::PlanNotFound {
                    plan_code: new_plan_code.to_string(),
                })?;
        let in_trial = is_in_trial(self.trial_period_end, now);
        Ok(should_change_at_term_end(current_plan, new_plan, in_trial))
    }

    /// Build a request to change this subscription's plan.
    ///
    /// A `quantity` other than 1 sets the members-limit add-on accordingly so
    /// per-seat group pricing stays consistent with the one-base-plan-plus-
    /// add-ons model. The AI add-on is carried over to the new plan when the
    /// subscription has it, taking a pending change into account for deferred
    /// changes; leaving a standalone AI plan attaches it implicitly.
    pub fn request_for_plan_change(
        &self,
        plan_code: &str,
        quantity: u32,
        at_term_end: bool,
    ) -> ChangeRequest {
        let mut add_on_updates: Vec<AddOnUpdate> = Vec::new();

        if quantity != 1 {
            add_on_updates.push(AddOnUpdate {
                code: MEMBERS_LIMIT_ADD_ON_CODE.to_string(),
                quantity: Some(quantity),
                unit_price: None,
            });
        }

        let carries_ai_add_on = self.is_standalone_ai_add_on()
            || (!at_term_end && self.has_add_on(AI_ADD_ON_CODE))
            || (at_term_end && self.has_add_on_next_period(AI_ADD_ON_CODE));
        if carries_ai_add_on {
            add_on_updates.push(AddOnUpdate {
                code: AI_ADD_ON_CODE.to_string(),
                quantity: Some(1),
                unit_price: None,
            });
        }

        ChangeRequest {
            subscription_id: self.id,
            timeframe: if at_term_end { Timeframe::TermEnd } else { Timeframe::Now },
            plan_code: Some(plan_code.to_string()),
            add_on_updates: if add_on_updates.is_empty() {
                None
            } else {
                Some(add_on_updates)
            },
        }
    }

    /// Build a request to purchase an add-on, keeping the existing ones.
    pub fn request_for_add_on_purchase(
        &self,
        code: &str,
        quantity: u32,
        unit_price: Option<Decimal>,
    ) -> SubscriptionResult<ChangeRequest> {
        if self.has_add_on(code) {
            return Err(SubscriptionError::DuplicateAddOn {
                subscription_id: self.id.to_string(),
                add_on_code: code.to_string(),
            });
        }

        let mut add_on_updates: Vec<AddOnUpdate> =
            self.add_ons.iter().map(ProviderAddOn::to_update).collect();
        add_on_updates.push(AddOnUpdate {
            code: code.to_string(),
            quantity: Some(quantity),
            unit_price,
        });

        Ok(ChangeRequest {
            subscription_id: self.id,
            timeframe: Timeframe::Now,
            plan_code: None,
            add_on_updates: Some(add_on_updates),
        })
    }

    /// Build a request to change the quantity of an add-on already present.
    pub fn request_for_add_on_update(
        &self,
        code: &str,
        quantity: u32,
    ) -> SubscriptionResult<ChangeRequest> {
        if !self.has_add_on(code) {
            return Err(SubscriptionError::AddOnNotPresent {
                subscription_id: self.id.to_string(),
                add_on_code: code.to_string(),
            });
        }

        let add_on_updates = self
            .add_ons
            .iter()
            .map(|add_on| {
                let mut update = add_on.to_update();
                if update.code == code {
                    update.quantity = Some(quantity);
                }
                update
            })
            .collect();

        Ok(ChangeRequest {
            subscription_id: self.id,
            timeframe: Timeframe::Now,
            plan_code: None,
            add_on_updates: Some(add_on_updates),
        })
    }

    /// Build a request to remove an add-on. During a trial the removal is
    /// immediate; otherwise the add-on stays until the end of the paid term.
    pub fn request_for_add_on_removal(
        &self,
        code: &str,
        now: OffsetDateTime,
    ) -> SubscriptionResult<ChangeRequest> {
        if !self.has_add_on(code) {
            return Err(SubscriptionError::AddOnNotPresent {
                subscription_id: self.id.to_string(),
                add_on_code: code.to_string(),
            });
        }

        let add_on_updates: Vec<AddOnUpdate> = self
            .add_ons
            .iter()
            .filter(|add_on| add_on.code != code)
            .map(ProviderAddOn::to_update)
            .collect();

        let timeframe = if is_in_trial(self.trial_period_end, now) {
            Timeframe::Now
        } else {
            Timeframe::TermEnd
        };

        Ok(ChangeRequest {
            subscription_id: self.id,
            timeframe,
            plan_code: None,
            add_on_updates: Some(add_on_updates),
        })
    }

    /// Build a request to keep an add-on that a pending change would drop.
    /// Only valid while the add-on is still active and a change is pending.
    pub fn request_for_add_on_reactivation(&self, code: &str) -> SubscriptionResult<ChangeRequest> {
        let reactivated = self.add_ons.iter().find(|add_on| add_on.code == code);
        let (reactivated, pending_change) = match (reactivated, &self.pending_change) {
            (Some(add_on), Some(change)) => (add_on, change),
            _ => {
                return Err(SubscriptionError::AddOnNotPresent {
                    subscription_id: self.id.to_string(),
                    add_on_code: code.to_string(),
                })
            }
        };

        let mut add_on_updates: Vec<AddOnUpdate> = pending_change
            .next_add_ons
            .iter()
            .filter(|add_on| add_on.code != code)
            .map(ProviderAddOn::to_update)
            .collect();
        add_on_updates.push(reactivated.to_update());

        Ok(ChangeRequest {
            subscription_id: self.id,
            timeframe: Timeframe::TermEnd,
            plan_code: None,
            add_on_updates: Some(add_on_updates),
        })
    }

    /// Build a request restoring the last successfully billed plan and
    /// add-ons after a failed payment on a plan change.
    ///
    /// `previous_add_ons` of `None` still yields an empty update list: that
    /// wipes add-ons added by the failed change but absent from the backup.
    pub fn request_for_plan_revert(
        &self,
        catalog: &PlanCatalog<'_>,
        previous_plan_code: &str,
        previous_add_ons: Option<&[SavedAddOn]>,
    ) -> SubscriptionResult<ChangeRequest> {
        if catalog.find_plan(previous_plan_code).is_none() {
            return Err(SubscriptionError::PlanNotFound {
                plan_code: previous_plan_code.to_string(),
            });
        }

        let add_on_updates: Vec<AddOnUpdate> = previous_add_ons
            .unwrap_or_default()
            .iter()
            .map(|saved| AddOnUpdate {
                code: saved.add_on_code.clone(),
                quantity: Some(saved.quantity),
                unit_price: Some(Decimal::new(saved.unit_amount_in_cents, 2)),
            })
            .collect();

        Ok(ChangeRequest {
            subscription_id: self.id,
            timeframe: Timeframe::Now,
            plan_code: Some(previous_plan_code.to_string()),
            add_on_updates: Some(add_on_updates),
        })
    }

    /// Build a request to upgrade a group subscription. Upgrades always apply
    /// immediately and carry every existing add-on to the new plan.
    pub fn request_for_group_plan_upgrade(&self, new_plan_code: &str) -> ChangeRequest {
        let add_on_updates = self
            .add_ons
            .iter()
            .map(|add_on| AddOnUpdate {
                code: add_on.code.clone(),
                quantity: Some(add_on.quantity),
                unit_price: None,
            })
            .collect();

        ChangeRequest {
            subscription_id: self.id,
            timeframe: Timeframe::Now,
            plan_code: Some(new_plan_code.to_string()),
            add_on_updates: Some(add_on_updates),
        }
    }

    pub fn request_for_po_and_terms_update(
        &self,
        po_number: impl Into<String>,
        terms_and_conditions: impl Into<String>,
    ) -> UpdateRequest {
        UpdateRequest {
            subscription_id: self.id,
            po_number: Some(po_number.into()),
            terms_and_conditions: Some(terms_and_conditions.into()),
        }
    }

    pub fn request_for_terms_update(
        &self,
        terms_and_conditions: impl Into<String>,
    ) -> UpdateRequest {
        UpdateRequest {
            subscription_id: self.id,
            po_number: None,
            terms_and_conditions: Some(terms_and_conditions.into()),
        }
    }
}

// =============================================================================
// Free functions
// =============================================================================

/// Whether a plan change should wait for the end of the current term.
///
/// Only downgrades wait: the target plan must be strictly cheaper. Equal
/// prices change immediately, and nothing is deferred during a trial.
pub fn should_change_at_term_end(current_plan: &Plan, target_plan: &Plan, in_trial: bool) -> bool {
    target_plan.price_in_cents < current_plan.price_in_cents && !in_trial
}

/// Whether a subscription is inside its trial window at `now`.
pub fn is_in_trial(trial_period_end: Option<OffsetDateTime>, now: OffsetDateTime) -> bool {
    match trial_period_end {
        Some(end) => end > now,
        None => false,
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`ProviderSubscription`]. Fields the provider may omit carry
/// the same defaults the provider mapping layer assumes.
pub struct ProviderSubscriptionBuilder {
    subscription: ProviderSubscription,
}

impl ProviderSubscriptionBuilder {
    pub fn new(id: SubscriptionId, user_id: UserId, plan_code: impl Into<String>) -> Self {
        Self {
            subscription: ProviderSubscription {
                id,
                user_id,
                plan_code: plan_code.into(),
                plan_name: String::new(),
                plan_price: Decimal::ZERO,
                add_ons: Vec::new(),
                subtotal: Decimal::ZERO,
                tax_rate: Decimal::ZERO,
                tax_amount: Decimal::ZERO,
                currency: "USD".to_string(),
                total: Decimal::ZERO,
                period_start: None,
                period_end: None,
                collection_method: "automatic".to_string(),
                po_number: String::new(),
                terms_and_conditions: String::new(),
                pending_change: None,
                service: ProviderService::Recurly,
                state: "active".to_string(),
                trial_period_start: None,
                trial_period_end: None,
            },
        }
    }

    pub fn plan_name(mut self, name: impl Into<String>) -> Self {
        self.subscription.plan_name = name.into();
        self
    }

    pub fn plan_price(mut self, price: Decimal) -> Self {
        self.subscription.plan_price = price;
        self
    }

    pub fn add_ons(mut self, add_ons: Vec<ProviderAddOn>) -> Self {
        self.subscription.add_ons = add_ons;
        self
    }

    pub fn subtotal(mut self, subtotal: Decimal) -> Self {
        self.subscription.subtotal = subtotal;
        self
    }

    pub fn tax(mut self, tax_rate: Decimal, tax_amount: Decimal) -> Self {
        self.subscription.tax_rate = tax_rate;
        self.subscription.tax_amount = tax_amount;
        self
    }

    pub fn currency(mut self, currency: impl Into<String>) -> Self {
        self.subscription.currency = currency.into();
        self
    }

    pub fn total(mut self, total: Decimal) -> Self {
        self.subscription.total = total;
        self
    }

    pub fn period(mut self, start: OffsetDateTime, end: OffsetDateTime) -> Self {
        self.subscription.period_start = Some(start);
        self.subscription.period_end = Some(end);
        self
    }

    pub fn collection_method(mut self, method: impl Into<String>) -> Self {
        self.subscription.collection_method = method.into();
        self
    }

    pub fn po_number(mut self, po_number: impl Into<String>) -> Self {
        self.subscription.po_number = po_number.into();
        self
    }

    pub fn terms_and_conditions(mut self, terms: impl Into<String>) -> Self {
        self.subscription.terms_and_conditions = terms.into();
        self
    }

    pub fn pending_change(mut self, change: SubscriptionChange) -> Self {
        self.subscription.pending_change = Some(change);
        self
    }

    pub fn service(mut self, service: ProviderService) -> Self {
        self.subscription.service = service;
        self
    }

    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.subscription.state = state.into();
        self
    }

    pub fn trial_period(
        mut self,
        start: Option<OffsetDateTime>,
        end: Option<OffsetDateTime>,
    ) -> Self {
        self.subscription.trial_period_start = start;
        self.subscription.trial_period_end = end;
        self
    }

    pub fn build(mut self) -> ProviderSubscription {
        self.subscription.currency = self.subscription.currency.to_uppercase();
        self.subscription
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use texhub_shared::Settings;
    use time::Duration;

    fn subscription() -> ProviderSubscription {
        ProviderSubscription::builder(SubscriptionId::new(), UserId::new(), "collaborator")
            .plan_name("Standard")
            .plan_price(dec!(23.00))
            .subtotal(dec!(23.00))
            .total(dec!(23.00))
            .build()
    }

    fn ai_add_on() -> ProviderAddOn {
        ProviderAddOn {
            code: AI_ADD_ON_CODE.to_string(),
            name: "AI Assist".to_string(),
            quantity: 1,
            unit_price: dec!(9.00),
        }
    }

    fn now() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + Duration::days(20_000)
    }

    // =========================================================================
    // Construction
    // =========================================================================

    #[test]
    fn test_currency_is_uppercased_on_construction() {
        let subscription =
            ProviderSubscription::builder(SubscriptionId::new(), UserId::new(), "collaborator")
                .currency("usd")
                .build();
        assert_eq!(subscription.currency, "USD");
    }

    #[test]
    fn test_change_request_requires_plan_or_add_ons() {
        let id = SubscriptionId::new();
        assert_eq!(
            ChangeRequest::new(id, Timeframe::Now, None, None),
            Err(SubscriptionError::InvalidChangeRequest)
        );
        assert!(ChangeRequest::new(id, Timeframe::Now, Some("student".to_string()), None).is_ok());
        assert!(ChangeRequest::new(id, Timeframe::Now, None, Some(Vec::new())).is_ok());
    }

    // =========================================================================
    // Plan change
    // =========================================================================

    #[test]
    fn test_plan_change_without_add_ons() {
        let request = subscription().request_for_plan_change("professional", 1, false);
        assert_eq!(request.timeframe, Timeframe::Now);
        assert_eq!(request.plan_code.as_deref(), Some("professional"));
        assert_eq!(request.add_on_updates, None);
    }

    #[test]
    fn test_plan_change_at_term_end() {
        let request = subscription().request_for_plan_change("student", 1, true);
        assert_eq!(request.timeframe, Timeframe::TermEnd);
    }

    #[test]
    fn test_plan_change_with_quantity_sets_members_limit_add_on() {
        let request = subscription().request_for_plan_change("group_collaborator", 5, false);
        let updates = request.add_on_updates.unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].code, MEMBERS_LIMIT_ADD_ON_CODE);
        assert_eq!(updates[0].quantity, Some(5));
    }

    #[test]
    fn test_plan_change_carries_ai_add_on() {
        let mut subscription = subscription();
        subscription.add_ons = vec![ai_add_on()];
        let request = subscription.request_for_plan_change("professional", 1, false);
        let updates = request.add_on_updates.unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].code, AI_ADD_ON_CODE);
        assert_eq!(updates[0].quantity, Some(1));
    }

    #[test]
    fn test_plan_change_from_standalone_ai_plan_attaches_add_on() {
        let subscription =
            ProviderSubscription::builder(SubscriptionId::new(), UserId::new(), "assistant")
                .build();
        let request = subscription.request_for_plan_change("collaborator", 1, false);
        let updates = request.add_on_updates.unwrap();
        assert_eq!(updates[0].code, AI_ADD_ON_CODE);
    }

    #[test]
    fn test_deferred_plan_change_respects_pending_add_on_drop() {
        // The pending change drops the AI add-on, so a term-end plan change
        // must not resurrect it.
        let mut subscription = subscription();
        subscription.add_ons = vec![ai_add_on()];
        subscription.pending_change = Some(SubscriptionChange::new(
            Decimal::ZERO,
            "collaborator".to_string(),
            "Standard".to_string(),
            dec!(23.00),
            Vec::new(),
        ));
        let request = subscription.request_for_plan_change("student", 1, true);
        assert_eq!(request.add_on_updates, None);

        // An immediate change still carries the active add-on
        let request = subscription.request_for_plan_change("student", 1, false);
        assert!(request.add_on_updates.is_some());
    }

    // =========================================================================
    // Add-on purchase / update / removal / reactivation
    // =========================================================================

    #[test]
    fn test_add_on_purchase_appends_to_existing() {
        let mut subscription = subscription();
        subscription.add_ons = vec![ai_add_on()];
        let request = subscription
            .request_for_add_on_purchase("extra-storage", 2, Some(dec!(3.50)))
            .unwrap();
        assert_eq!(request.timeframe, Timeframe::Now);
        let updates = request.add_on_updates.unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].code, AI_ADD_ON_CODE);
        assert_eq!(updates[1].code, "extra-storage");
        assert_eq!(updates[1].unit_price, Some(dec!(3.50)));
    }

    #[test]
    fn test_add_on_purchase_rejects_duplicate() {
        let mut subscription = subscription();
        subscription.add_ons = vec![ai_add_on()];
        let err = subscription
            .request_for_add_on_purchase(AI_ADD_ON_CODE, 1, None)
            .unwrap_err();
        assert!(matches!(err, SubscriptionError::DuplicateAddOn { .. }));
    }

    #[test]
    fn test_add_on_update_changes_only_target_quantity() {
        let mut subscription = subscription();
        subscription.add_ons = vec![
            ai_add_on(),
            ProviderAddOn {
                code: MEMBERS_LIMIT_ADD_ON_CODE.to_string(),
                name: "Seats".to_string(),
                quantity: 3,
                unit_price: dec!(10.00),
            },
        ];
        let request = subscription
            .request_for_add_on_update(MEMBERS_LIMIT_ADD_ON_CODE, 7)
            .unwrap();
        let updates = request.add_on_updates.unwrap();
        assert_eq!(updates[0].quantity, Some(1));
        assert_eq!(updates[1].quantity, Some(7));
    }

    #[test]
    fn test_add_on_update_requires_presence() {
        let err = subscription().request_for_add_on_update("missing", 2).unwrap_err();
        assert!(matches!(err, SubscriptionError::AddOnNotPresent { .. }));
    }

    #[test]
    fn test_add_on_removal_waits_for_term_end() {
        let mut subscription = subscription();
        subscription.add_ons = vec![ai_add_on()];
        let request = subscription.request_for_add_on_removal(AI_ADD_ON_CODE, now()).unwrap();
        assert_eq!(request.timeframe, Timeframe::TermEnd);
        assert_eq!(request.add_on_updates, Some(Vec::new()));
    }

    #[test]
    fn test_add_on_removal_is_immediate_in_trial() {
        let mut subscription = subscription();
        subscription.add_ons = vec![ai_add_on()];
        subscription.trial_period_end = Some(now() + Duration::days(5));
        let request = subscription.request_for_add_on_removal(AI_ADD_ON_CODE, now()).unwrap();
        assert_eq!(request.timeframe, Timeframe::Now);
    }

    #[test]
    fn test_add_on_reactivation_restores_from_pending_change() {
        let mut subscription = subscription();
        subscription.add_ons = vec![ai_add_on()];
        subscription.pending_change = Some(SubscriptionChange::new(
            Decimal::ZERO,
            "collaborator".to_string(),
            "Standard".to_string(),
            dec!(23.00),
            Vec::new(),
        ));
        let request = subscription.request_for_add_on_reactivation(AI_ADD_ON_CODE).unwrap();
        assert_eq!(request.timeframe, Timeframe::TermEnd);
        let updates = request.add_on_updates.unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].code, AI_ADD_ON_CODE);
    }

    #[test]
    fn test_add_on_reactivation_requires_pending_change() {
        let mut subscription = subscription();
        subscription.add_ons = vec![ai_add_on()];
        let err = subscription.request_for_add_on_reactivation(AI_ADD_ON_CODE).unwrap_err();
        assert!(matches!(err, SubscriptionError::AddOnNotPresent { .. }));
    }

    // =========================================================================
    // Plan revert and group upgrade
    // =========================================================================

    #[test]
    fn test_plan_revert_restores_saved_add_ons() {
        let settings = Settings::default_catalog();
        let catalog = PlanCatalog::new(&settings);
        let saved = vec![SavedAddOn {
            add_on_code: AI_ADD_ON_CODE.to_string(),
            quantity: 1,
            unit_amount_in_cents: 900,
        }];
        let request = subscription()
            .request_for_plan_revert(&catalog, "collaborator", Some(&saved))
            .unwrap();
        assert_eq!(request.timeframe, Timeframe::Now);
        assert_eq!(request.plan_code.as_deref(), Some("collaborator"));
        let updates = request.add_on_updates.unwrap();
        assert_eq!(updates[0].unit_price, Some(dec!(9.00)));
    }

    #[test]
    fn test_plan_revert_with_no_saved_add_ons_clears_add_ons() {
        let settings = Settings::default_catalog();
        let catalog = PlanCatalog::new(&settings);
        let request = subscription()
            .request_for_plan_revert(&catalog, "collaborator", None)
            .unwrap();
        assert_eq!(request.add_on_updates, Some(Vec::new()));
    }

    #[test]
    fn test_plan_revert_to_unknown_plan_fails() {
        let settings = Settings::default_catalog();
        let catalog = PlanCatalog::new(&settings);
        let err = subscription()
            .request_for_plan_revert(&catalog, "no-such-plan", None)
            .unwrap_err();
        assert!(matches!(err, SubscriptionError::PlanNotFound { .. }));
    }

    #[test]
    fn test_group_plan_upgrade_is_immediate_and_keeps_add_ons() {
        let mut subscription = subscription();
        subscription.plan_code = "group_collaborator".to_string();
        subscription.add_ons = vec![ProviderAddOn {
            code: MEMBERS_LIMIT_ADD_ON_CODE.to_string(),
            name: "Seats".to_string(),
            quantity: 8,
            unit_price: dec!(10.00),
        }];
        let request = subscription.request_for_group_plan_upgrade("group_professional");
        assert_eq!(request.timeframe, Timeframe::Now);
        assert_eq!(request.plan_code.as_deref(), Some("group_professional"));
        let updates = request.add_on_updates.unwrap();
        assert_eq!(updates[0].quantity, Some(8));
    }

    // =========================================================================
    // Billing metadata updates
    // =========================================================================

    #[test]
    fn test_po_and_terms_update_requests() {
        let subscription = subscription();
        let both = subscription.request_for_po_and_terms_update("PO-123", "net 30");
        assert_eq!(both.po_number.as_deref(), Some("PO-123"));
        assert_eq!(both.terms_and_conditions.as_deref(), Some("net 30"));

        let terms_only = subscription.request_for_terms_update("net 60");
        assert_eq!(terms_only.po_number, None);
        assert_eq!(terms_only.terms_and_conditions.as_deref(), Some("net 60"));
    }

    // =========================================================================
    // Change math
    // =========================================================================

    #[test]
    fn test_subscription_change_totals() {
        let change = SubscriptionChange::new(
            dec!(0.15),
            "professional".to_string(),
            "Professional".to_string(),
            dec!(45.00),
            vec![ai_add_on()],
        );
        assert_eq!(change.subtotal, dec!(54.00));
        assert_eq!(change.tax, dec!(8.10));
        assert_eq!(change.total, dec!(62.10));
    }

    #[test]
    fn test_subscription_change_tax_rounds_half_up() {
        // 10.05 * 0.075 = 0.75375 -> 0.75; 10.10 * 0.125 = 1.2625 -> 1.26;
        // 10.00 * 0.1225 = 1.225 -> 1.23 (midpoint away from zero)
        let change = SubscriptionChange::new(
            dec!(0.1225),
            "student".to_string(),
            "Student".to_string(),
            dec!(10.00),
            Vec::new(),
        );
        assert_eq!(change.tax, dec!(1.23));
        assert_eq!(change.total, dec!(11.23));
    }

    // =========================================================================
    // Deferral policy
    // =========================================================================

    #[test]
    fn test_downgrade_waits_for_term_end() {
        let settings = Settings::default_catalog();
        let catalog = PlanCatalog::new(&settings);
        let subscription = ProviderSubscription::builder(
            SubscriptionId::new(),
            UserId::new(),
            "professional",
        )
        .build();
        assert!(subscription
            .should_plan_change_at_term_end(&catalog, "student", now())
            .unwrap());
    }

    #[test]
    fn test_upgrade_and_same_price_change_are_immediate() {
        let settings = Settings::default_catalog();
        let catalog = PlanCatalog::new(&settings);
        let subscription =
            ProviderSubscription::builder(SubscriptionId::new(), UserId::new(), "student").build();
        assert!(!subscription
            .should_plan_change_at_term_end(&catalog, "professional", now())
            .unwrap());
        // Trial variant shares the base price
        assert!(!subscription
            .should_plan_change_at_term_end(&catalog, "student_free_trial_7_days", now())
            .unwrap());
    }

    #[test]
    fn test_trial_downgrade_is_immediate() {
        let settings = Settings::default_catalog();
        let catalog = PlanCatalog::new(&settings);
        let subscription = ProviderSubscription::builder(
            SubscriptionId::new(),
            UserId::new(),
            "professional",
        )
        .trial_period(Some(now() - Duration::days(1)), Some(now() + Duration::days(6)))
        .build();
        assert!(!subscription
            .should_plan_change_at_term_end(&catalog, "student", now())
            .unwrap());
    }

    #[test]
    fn test_unknown_plan_codes_fail_deferral_check() {
        let settings = Settings::default_catalog();
        let catalog = PlanCatalog::new(&settings);
        let subscription =
            ProviderSubscription::builder(SubscriptionId::new(), UserId::new(), "mystery").build();
        let err = subscription
            .should_plan_change_at_term_end(&catalog, "student", now())
            .unwrap_err();
        assert_eq!(
            err,
            SubscriptionError::PlanNotFound { plan_code: "mystery".to_string() }
        );
    }

    #[test]
    fn test_is_in_trial() {
        assert!(!is_in_trial(None, now()));
        assert!(!is_in_trial(Some(now() - Duration::days(1)), now()));
        assert!(is_in_trial(Some(now() + Duration::days(1)), now()));
    }

    // =========================================================================
    // Misc accessors
    // =========================================================================

    #[test]
    fn test_has_add_on_next_period_reads_pending_change() {
        let mut subscription = subscription();
        subscription.add_ons = vec![ai_add_on()];
        assert!(subscription.has_add_on_next_period(AI_ADD_ON_CODE));

        subscription.pending_change = Some(SubscriptionChange::new(
            Decimal::ZERO,
            "collaborator".to_string(),
            "Standard".to_string(),
            dec!(23.00),
            Vec::new(),
        ));
        assert!(!subscription.has_add_on_next_period(AI_ADD_ON_CODE));
    }

    #[test]
    fn test_collection_method_manual() {
        let manual =
            ProviderSubscription::builder(SubscriptionId::new(), UserId::new(), "collaborator")
                .collection_method("manual")
                .build();
        assert!(manual.is_collection_method_manual());
        assert!(!subscription().is_collection_method_manual());
    }
}
