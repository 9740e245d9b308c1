//! Outbound clients for notifying collaborators

pub mod webhook;

pub use webhook::WebhookNotifier;
