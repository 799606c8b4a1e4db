//! Per-user delivery preferences and their documented defaults.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::channels::DeliveryChannel;
use crate::event_types::EventType;
use crate::quiet_hours;
use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Default cap on items created per user and channel in a trailing hour.
pub const DEFAULT_MAX_NOTIFICATIONS_PER_HOUR: i32 = 10;

/// Default dedup window for similar notifications (one hour).
pub const DEFAULT_MIN_SECS_BETWEEN_SIMILAR: i64 = 3600;

/// Default timezone for quiet-hours evaluation.
pub const DEFAULT_TIMEZONE: &str = "UTC";

// ---------------------------------------------------------------------------
// BatchFrequency
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchFrequency {
    Immediate,
    Daily,
    Weekly,
}

impl BatchFrequency {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchFrequency::Immediate => "immediate",
            BatchFrequency::Daily => "daily",
            BatchFrequency::Weekly => "weekly",
        }
    }

    /// Minimum spacing between two digests. `Immediate` digests go out on
    /// every scheduler tick.
    pub fn period(self) -> TimeDelta {
        match self {
            BatchFrequency::Immediate => TimeDelta::zero(),
            BatchFrequency::Daily => TimeDelta::days(1),
            BatchFrequency::Weekly => TimeDelta::weeks(1),
        }
    }

    /// Look-back window used for a user's first digest.
    pub fn first_run_lookback(self) -> TimeDelta {
        match self {
            BatchFrequency::Weekly => TimeDelta::weeks(1),
            BatchFrequency::Immediate | BatchFrequency::Daily => TimeDelta::days(1),
        }
    }
}

impl fmt::Display for BatchFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchFrequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "immediate" => Ok(BatchFrequency::Immediate),
            "daily" => Ok(BatchFrequency::Daily),
            "weekly" => Ok(BatchFrequency::Weekly),
            other => Err(format!("Unknown batch frequency: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// EventChannelPreference
// ---------------------------------------------------------------------------

/// Per-channel switches for one event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventChannelPreference {
    pub email: bool,
    pub web: bool,
    pub push: bool,
}

impl EventChannelPreference {
    pub const ALL_ON: Self = Self {
        email: true,
        web: true,
        push: true,
    };

    pub fn allows(&self, channel: DeliveryChannel) -> bool {
        match channel {
            DeliveryChannel::Email => self.email,
            DeliveryChannel::Web => self.web,
            DeliveryChannel::Push => self.push,
        }
    }
}

impl Default for EventChannelPreference {
    fn default() -> Self {
        Self::ALL_ON
    }
}

// ---------------------------------------------------------------------------
// NotificationPreferences
// ---------------------------------------------------------------------------

/// One user's delivery preferences.
///
/// A missing row is represented by [`NotificationPreferences::defaults`]:
/// all channels on, no quiet hours, batching off, 10 items per hour per
/// channel, one hour between similar notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct NotificationPreferences {
    pub user_id: DbId,

    pub email_enabled: bool,
    pub web_enabled: bool,
    pub push_enabled: bool,

    /// Local wall-clock start of quiet hours. Both bounds must be set for
    /// quiet hours to apply.
    pub quiet_hours_start: Option<NaiveTime>,
    pub quiet_hours_end: Option<NaiveTime>,
    #[validate(custom(function = "validate_timezone"))]
    pub timezone: String,

    /// Event types absent from the map are enabled on every channel.
    #[serde(default)]
    pub event_preferences: BTreeMap<EventType, EventChannelPreference>,

    pub enable_batching: bool,
    pub batch_frequency: BatchFrequency,

    /// `0` disables the hourly cap.
    #[validate(range(min = 0))]
    pub max_notifications_per_hour: i32,
    #[validate(range(min = 0))]
    pub min_secs_between_similar: i64,
}

fn validate_timezone(tz: &str) -> Result<(), ValidationError> {
    quiet_hours::parse_timezone(tz)
        .map(|_| ())
        .map_err(|_| ValidationError::new("invalid_timezone"))
}

impl NotificationPreferences {
    /// The documented defaults used when a user has no preferences row.
    pub fn defaults(user_id: DbId) -> Self {
        Self {
            user_id,
            email_enabled: true,
            web_enabled: true,
            push_enabled: true,
            quiet_hours_start: None,
            quiet_hours_end: None,
            timezone: DEFAULT_TIMEZONE.to_string(),
            event_preferences: BTreeMap::new(),
            enable_batching: false,
            batch_frequency: BatchFrequency::Immediate,
            max_notifications_per_hour: DEFAULT_MAX_NOTIFICATIONS_PER_HOUR,
            min_secs_between_similar: DEFAULT_MIN_SECS_BETWEEN_SIMILAR,
        }
    }

    /// Stored preferences, or the defaults when none exist.
    pub fn resolve(user_id: DbId, stored: Option<Self>) -> Self {
        stored.unwrap_or_else(|| Self::defaults(user_id))
    }

    pub fn min_time_between_similar(&self) -> TimeDelta {
        TimeDelta::seconds(self.min_secs_between_similar)
    }

    /// Global on/off switch for a channel.
    pub fn channel_globally_enabled(&self, channel: DeliveryChannel) -> bool {
        match channel {
            DeliveryChannel::Email => self.email_enabled,
            DeliveryChannel::Web => self.web_enabled,
            DeliveryChannel::Push => self.push_enabled,
        }
    }

    /// Whether items for `event` should be created on `channel`.
    pub fn allows(&self, event: EventType, channel: DeliveryChannel) -> bool {
        self.channel_globally_enabled(channel)
            && self
                .event_preferences
                .get(&event)
                .copied()
                .unwrap_or_default()
                .allows(channel)
    }

    /// Whether the user's local time at `now` falls within quiet hours.
    pub fn is_quiet_at(&self, now: Timestamp) -> bool {
        match (self.quiet_hours_start, self.quiet_hours_end) {
            (Some(start), Some(end)) => {
                let local = quiet_hours::local_time_of_day(now, &self.timezone);
                quiet_hours::is_within_quiet_hours(start, end, local)
            }
            _ => false,
        }
    }

    /// Channel a digest is sent over: the first globally enabled channel in
    /// email, web, push order.
    pub fn digest_channel(&self) -> Option<DeliveryChannel> {
        DeliveryChannel::ALL
            .into_iter()
            .find(|c| self.channel_globally_enabled(*c))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    #[test]
    fn defaults_enable_everything_without_batching() {
        let prefs = NotificationPreferences::defaults(5);
        assert_eq!(prefs.user_id, 5);
        for channel in DeliveryChannel::ALL {
            for event in EventType::ALL {
                assert!(prefs.allows(event, channel));
            }
        }
        assert!(!prefs.enable_batching);
        assert!(prefs.quiet_hours_start.is_none());
        assert_eq!(prefs.max_notifications_per_hour, DEFAULT_MAX_NOTIFICATIONS_PER_HOUR);
        assert!(prefs.validate().is_ok());
    }

    #[test]
    fn resolve_prefers_stored_row() {
        let mut stored = NotificationPreferences::defaults(5);
        stored.enable_batching = true;
        let resolved = NotificationPreferences::resolve(5, Some(stored.clone()));
        assert_eq!(resolved, stored);
        assert!(!NotificationPreferences::resolve(5, None).enable_batching);
    }

    #[test]
    fn event_preference_disables_single_channel() {
        let mut prefs = NotificationPreferences::defaults(1);
        prefs.event_preferences.insert(
            EventType::KudosReceived,
            EventChannelPreference {
                email: false,
                web: true,
                push: true,
            },
        );
        assert!(!prefs.allows(EventType::KudosReceived, DeliveryChannel::Email));
        assert!(prefs.allows(EventType::KudosReceived, DeliveryChannel::Web));
        assert!(prefs.allows(EventType::WorkUpdated, DeliveryChannel::Email));
    }

    #[test]
    fn global_toggle_overrides_event_preference() {
        let mut prefs = NotificationPreferences::defaults(1);
        prefs.push_enabled = false;
        assert!(!prefs.allows(EventType::WorkUpdated, DeliveryChannel::Push));
    }

    #[test]
    fn quiet_hours_use_user_timezone() {
        let mut prefs = NotificationPreferences::defaults(1);
        prefs.quiet_hours_start = NaiveTime::from_hms_opt(22, 0, 0);
        prefs.quiet_hours_end = NaiveTime::from_hms_opt(7, 0, 0);
        prefs.timezone = "Europe/Berlin".into();

        // 22:30 UTC in January is 23:30 in Berlin.
        let late = Utc.with_ymd_and_hms(2026, 1, 10, 22, 30, 0).unwrap();
        assert!(prefs.is_quiet_at(late));

        // 06:00 UTC is 07:00 in Berlin: quiet hours are over.
        let morning = Utc.with_ymd_and_hms(2026, 1, 10, 6, 0, 0).unwrap();
        assert!(!prefs.is_quiet_at(morning));
    }

    #[test]
    fn half_configured_quiet_hours_never_apply() {
        let mut prefs = NotificationPreferences::defaults(1);
        prefs.quiet_hours_start = NaiveTime::from_hms_opt(0, 0, 0);
        let now = Utc.with_ymd_and_hms(2026, 1, 10, 3, 0, 0).unwrap();
        assert!(!prefs.is_quiet_at(now));
    }

    #[test]
    fn digest_channel_skips_disabled_channels() {
        let mut prefs = NotificationPreferences::defaults(1);
        assert_eq!(prefs.digest_channel(), Some(DeliveryChannel::Email));
        prefs.email_enabled = false;
        assert_eq!(prefs.digest_channel(), Some(DeliveryChannel::Web));
        prefs.web_enabled = false;
        prefs.push_enabled = false;
        assert_eq!(prefs.digest_channel(), None);
    }

    #[test]
    fn invalid_timezone_fails_validation() {
        let mut prefs = NotificationPreferences::defaults(1);
        prefs.timezone = "Nowhere/Special".into();
        assert!(prefs.validate().is_err());
    }

    #[test]
    fn weekly_first_run_looks_back_a_week() {
        assert_eq!(BatchFrequency::Weekly.first_run_lookback(), TimeDelta::weeks(1));
        assert_eq!(BatchFrequency::Daily.period(), TimeDelta::days(1));
        assert_eq!(BatchFrequency::Immediate.period(), TimeDelta::zero());
    }
}
