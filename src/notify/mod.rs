//! Outbound notifications for recorded changes.
//!
//! The only notifier is [`WebhookNotifier`], which posts each recorded
//! entry to a Discord-compatible webhook. It runs as a background task fed
//! by the [`crate::domain::EventBus`], so delivery never delays or fails a
//! `record` call.

pub mod webhook;

pub use webhook::{WebhookError, WebhookNotifier, WebhookSettings};
