//! Quill notification engine.
//!
//! - [`NotificationEvent`] / [`EventBus`]: the content event envelope and the
//!   in-process broadcast hub content services publish to.
//! - [`SubscriptionMatcher`]: finds the active subscriptions an event hits.
//! - [`evaluator`]: content filters, channel toggles, quiet hours, and the
//!   reading of admission outcomes.
//! - [`NotificationEngine`]: `process_event`, the single entry point.
//! - [`DigestScheduler`]: periodic digest and redelivery sweeps.
//! - [`delivery`]: the outbound [`DeliveryDispatcher`] seam and its webhook,
//!   email, and routing implementations.

pub mod bus;
pub mod config;
pub mod delivery;
pub mod digest;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod matcher;
pub mod render;

pub use bus::{EventBus, NotificationEvent};
pub use config::EngineConfig;
pub use delivery::email::{EmailConfig, EmailDelivery};
pub use delivery::webhook::{WebhookConfig, WebhookDelivery};
pub use delivery::{ChannelRouter, DeliveryDispatcher, DeliveryPayload, DispatchError};
pub use digest::{DigestScheduler, SweepReport};
pub use engine::{NotificationEngine, ProcessReport};
pub use error::EngineError;
pub use matcher::SubscriptionMatcher;
