//! TexHub Worker
//!
//! Background processing driven by payment provider webhooks: classifies
//! incoming notifications and dispatches analytics events, user property
//! updates and lifecycle emails.

pub mod webhook_events;

pub use webhook_events::{
    AccountPayload, AddOnPayload, AddressPayload, InvoicePayload, PlanPayload,
    SubscriptionPayload, WebhookEventHandler, WebhookPayload,
};
