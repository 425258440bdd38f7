//! Payment provider webhook classifier
//!
//! Turns provider webhook notifications into analytics events and user
//! properties. Notifications arrive pre-verified; this layer only decides
//! what, if anything, each one means for analytics.
//!
//! ## Design Principles
//!
//! - Suppression is silent and expected: test accounts, zero-total invoices
//!   and subscriptions managed by another provider all log at debug and
//!   no-op. Only collaborator failures propagate.
//! - Event names and property keys are part of the analytics contract and
//!   must not drift.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Map, Value};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use texhub_billing::error::StoreError;
use texhub_billing::stores::{AnalyticsSink, EmailSender, SubscriptionStore};
use texhub_billing::subscription::{is_standalone_ai_plan_code, AI_ADD_ON_CODE};
use texhub_shared::UserId;

/// The provider that emits these notifications.
const PAYMENT_PROVIDER: &str = "recurly";

// =============================================================================
// Payload types
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub account: AccountPayload,
    pub subscription: Option<SubscriptionPayload>,
    pub invoice: Option<InvoicePayload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountPayload {
    pub account_code: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlanPayload {
    pub plan_code: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddOnPayload {
    pub add_on_code: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionPayload {
    pub uuid: String,
    pub plan: PlanPayload,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default = "default_state")]
    pub state: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub trial_started_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub trial_ends_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub current_period_started_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub current_period_ends_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub add_ons: Vec<AddOnPayload>,
}

impl SubscriptionPayload {
    /// The subscription is in its free trial when a trial window exists and
    /// the current billing period starts inside it.
    pub fn is_trial(&self) -> bool {
        match (self.trial_started_at, self.trial_ends_at, self.current_period_started_at) {
            (Some(trial_start), Some(trial_end), Some(period_start)) => {
                period_start >= trial_start && period_start <= trial_end
            }
            _ => false,
        }
    }

    /// Whether the subscription sells the AI assistant, standalone or as an
    /// add-on.
    pub fn has_ai_add_on(&self) -> bool {
        is_standalone_ai_plan_code(&self.plan.plan_code)
            || self.add_ons.iter().any(|add_on| add_on.add_on_code == AI_ADD_ON_CODE)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddressPayload {
    pub country: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoicePayload {
    pub invoice_number: Option<u64>,
    pub currency: Option<String>,
    pub state: Option<String>,
    #[serde(default)]
    pub total_in_cents: i64,
    pub tax_in_cents: Option<i64>,
    pub address: Option<AddressPayload>,
    pub collection_method: Option<String>,
    #[serde(default)]
    pub subscription_ids: Vec<String>,
}

// =============================================================================
// Handler
// =============================================================================

pub struct WebhookEventHandler {
    subscriptions: Arc<dyn SubscriptionStore>,
    analytics: Arc<dyn AnalyticsSink>,
    email: Arc<dyn EmailSender>,
}

impl WebhookEventHandler {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        analytics: Arc<dyn AnalyticsSink>,
        email: Arc<dyn EmailSender>,
    ) -> Self {
        Self {
            subscriptions,
            analytics,
            email,
        }
    }

    pub async fn handle_event(
        &self,
        event_name: &str,
        payload: &WebhookPayload,
    ) -> Result<(), StoreError> {
        let user_id = match UserId::parse(&payload.account.account_code) {
            Some(user_id) => user_id,
            None => {
                // Test accounts and manually created provider accounts carry
                // codes that are not user ids
                debug!(
                    account_code = %payload.account.account_code,
                    event_name,
                    "ignoring event for non-user account"
                );
                return Ok(());
            }
        };

        // Another provider is the source of truth for this user's
        // subscription; its own webhooks cover analytics
        if let Some(stored) = self.subscriptions.get_users_subscription(user_id).await? {
            if stored.payment_service.is_some_and(|service| service.is_stripe()) {
                debug!(user_id = %user_id, event_name, "ignoring event for stripe-managed subscription");
                return Ok(());
            }
        }

        match event_name {
            "new_subscription_notification" => {
                self.subscription_event(user_id, payload, "subscription-started", true, true)
                    .await?;
                if payload.subscription.as_ref().is_some_and(SubscriptionPayload::is_trial) {
                    self.email.send_trial_onboarding(user_id).await?;
                }
            }
            "updated_subscription_notification" => {
                self.subscription_event(user_id, payload, "subscription-updated", true, true)
                    .await?;
            }
            "canceled_subscription_notification" => {
                self.subscription_event(user_id, payload, "subscription-cancelled", true, false)
                    .await?;
            }
            "expired_subscription_notification" => {
                self.subscription_event(user_id, payload, "subscription-expired", true, true)
                    .await?;
            }
            "renewed_subscription_notification" => {
                self.subscription_event(user_id, payload, "subscription-renewed", true, true)
                    .await?;
            }
            "reactivated_account_notification" => {
                self.subscription_event(user_id, payload, "subscription-reactivated", false, true)
                    .await?;
            }
            "paid_charge_invoice_notification" | "closed_invoice_notification" => {
                self.invoice_event(user_id, payload).await;
            }
            _ => {
                debug!(event_name, "unrecognized webhook event");
            }
        }
        Ok(())
    }

    async fn subscription_event(
        &self,
        user_id: UserId,
        payload: &WebhookPayload,
        event: &str,
        with_is_trial: bool,
        with_plan_code_property: bool,
    ) -> Result<(), StoreError> {
        let subscription = match &payload.subscription {
            Some(subscription) => subscription,
            None => {
                warn!(user_id = %user_id, event, "subscription event without subscription payload");
                return Ok(());
            }
        };

        let mut properties = Map::new();
        properties.insert("plan_code".to_string(), json!(subscription.plan.plan_code));
        properties.insert("quantity".to_string(), json!(subscription.quantity));
        if with_is_trial {
            properties.insert("is_trial".to_string(), json!(subscription.is_trial()));
        }
        properties.insert("has_ai_add_on".to_string(), json!(subscription.has_ai_add_on()));
        properties.insert("subscriptionId".to_string(), json!(subscription.uuid));
        properties.insert("payment_provider".to_string(), json!(PAYMENT_PROVIDER));

        self.analytics
            .record_event(user_id, event, Value::Object(properties))
            .await;

        if with_plan_code_property {
            self.analytics
                .set_user_property(
                    user_id,
                    "subscription-plan-code",
                    json!(subscription.plan.plan_code),
                )
                .await;
        }
        self.analytics
            .set_user_property(user_id, "subscription-state", json!(subscription.state))
            .await;
        self.analytics
            .set_user_property(user_id, "subscription-is-trial", json!(subscription.is_trial()))
            .await;

        info!(user_id = %user_id, event, plan_code = %subscription.plan.plan_code, "recorded subscription event");
        Ok(())
    }

    async fn invoice_event(&self, user_id: UserId, payload: &WebhookPayload) {
        let invoice = match &payload.invoice {
            Some(invoice) => invoice,
            None => {
                warn!(user_id = %user_id, "invoice event without invoice payload");
                return;
            }
        };
        if invoice.total_in_cents == 0 {
            debug!(user_id = %user_id, "ignoring zero-total invoice");
            return;
        }

        let mut properties = Map::new();
        properties.insert("invoiceNumber".to_string(), json!(invoice.invoice_number));
        properties.insert("currency".to_string(), json!(invoice.currency));
        properties.insert("totalInCents".to_string(), json!(invoice.total_in_cents));
        properties.insert("taxInCents".to_string(), json!(invoice.tax_in_cents));
        properties.insert(
            "country".to_string(),
            json!(invoice.address.as_ref().and_then(|a| a.country.clone())),
        );
        properties.insert("collectionMethod".to_string(), json!(invoice.collection_method));
        for (index, subscription_id) in invoice.subscription_ids.iter().enumerate() {
            properties.insert(format!("subscriptionId{}", index + 1), json!(subscription_id));
        }
        properties.insert("payment_provider".to_string(), json!(PAYMENT_PROVIDER));

        self.analytics
            .record_event(user_id, "subscription-invoice-collected", Value::Object(properties))
            .await;
        info!(user_id = %user_id, "recorded invoice collection");
    }
}

fn default_quantity() -> u32 {
    1
}

fn default_state() -> String {
    "active".to_string()
}
