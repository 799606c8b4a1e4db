//! Delivery channel names.
//!
//! The string constants must match the values stored in the
//! `notification_items.channel` column and referenced by the engine, the
//! digest scheduler, and the delivery router.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Email delivered via SMTP.
pub const CHANNEL_EMAIL: &str = "email";

/// Web (in-app) notification, pushed to the site's notification bell.
pub const CHANNEL_WEB: &str = "web";

/// Mobile / browser push notification.
pub const CHANNEL_PUSH: &str = "push";

/// A channel a notification can be delivered over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryChannel {
    Email,
    Web,
    Push,
}

impl DeliveryChannel {
    /// Every channel, in digest-preference order.
    pub const ALL: [DeliveryChannel; 3] = [
        DeliveryChannel::Email,
        DeliveryChannel::Web,
        DeliveryChannel::Push,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryChannel::Email => CHANNEL_EMAIL,
            DeliveryChannel::Web => CHANNEL_WEB,
            DeliveryChannel::Push => CHANNEL_PUSH,
        }
    }
}

impl fmt::Display for DeliveryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            CHANNEL_EMAIL => Ok(DeliveryChannel::Email),
            CHANNEL_WEB => Ok(DeliveryChannel::Web),
            CHANNEL_PUSH => Ok(DeliveryChannel::Push),
            other => Err(format!("Unknown delivery channel: {other}")),
        }
    }
}
