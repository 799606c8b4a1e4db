//! Subscription kinds, content filters, and the validated input for creating
//! a subscription.
//!
//! Filter evaluation lives here (no storage dependencies) so it can be
//! exercised exhaustively in unit tests.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::event_types::EventType;
use crate::types::DbId;

// ---------------------------------------------------------------------------
// SubscriptionKind
// ---------------------------------------------------------------------------

/// What a subscription's `target_id` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionKind {
    Work,
    Author,
    Series,
    Tag,
    Collection,
}

impl SubscriptionKind {
    pub const ALL: [SubscriptionKind; 5] = [
        SubscriptionKind::Work,
        SubscriptionKind::Author,
        SubscriptionKind::Series,
        SubscriptionKind::Tag,
        SubscriptionKind::Collection,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionKind::Work => "work",
            SubscriptionKind::Author => "author",
            SubscriptionKind::Series => "series",
            SubscriptionKind::Tag => "tag",
            SubscriptionKind::Collection => "collection",
        }
    }
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SubscriptionKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("Unknown subscription type: {s}"))
    }
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Optional content filters. Every empty / `None` field is a wildcard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_word_bounds"))]
pub struct SubscriptionFilters {
    /// Allowed ratings (exact match).
    #[serde(default)]
    pub ratings: Vec<String>,
    /// At least one of these tags must be present (case-insensitive).
    #[serde(default)]
    pub tags: Vec<String>,
    /// Required completion state.
    #[serde(default)]
    pub completed: Option<bool>,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub min_word_count: Option<i64>,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub max_word_count: Option<i64>,
}

fn validate_word_bounds(filters: &SubscriptionFilters) -> Result<(), ValidationError> {
    match (filters.min_word_count, filters.max_word_count) {
        (Some(min), Some(max)) if min > max => {
            Err(ValidationError::new("min_word_count_exceeds_max"))
        }
        _ => Ok(()),
    }
}

/// Which filter excluded an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterRejection {
    Rating,
    Tags,
    Completed,
    MinWordCount,
    MaxWordCount,
}

impl fmt::Display for FilterRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FilterRejection::Rating => "rating not in filter",
            FilterRejection::Tags => "no filtered tag present",
            FilterRejection::Completed => "completion state mismatch",
            FilterRejection::MinWordCount => "below minimum word count",
            FilterRejection::MaxWordCount => "above maximum word count",
        };
        f.write_str(name)
    }
}

/// Content attributes an event carries for filtering.
///
/// Extracted from the event's extra data (see [`crate::attributes`]).
/// A missing attribute never excludes an event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentAttributes {
    pub rating: Option<String>,
    pub tags: Vec<String>,
    pub is_completed: Option<bool>,
    pub word_count: Option<i64>,
}

impl SubscriptionFilters {
    /// Returns `true` when no filter is set.
    pub fn is_empty(&self) -> bool {
        self.ratings.is_empty()
            && self.tags.is_empty()
            && self.completed.is_none()
            && self.min_word_count.is_none()
            && self.max_word_count.is_none()
    }

    /// Evaluate all filters conjunctively against the event's attributes.
    pub fn evaluate(&self, attrs: &ContentAttributes) -> Result<(), FilterRejection> {
        if let (false, Some(rating)) = (self.ratings.is_empty(), &attrs.rating) {
            if !self.ratings.iter().any(|r| r == rating) {
                return Err(FilterRejection::Rating);
            }
        }

        if !self.tags.is_empty() && !attrs.tags.is_empty() {
            let hit = self
                .tags
                .iter()
                .any(|wanted| attrs.tags.iter().any(|t| t.eq_ignore_ascii_case(wanted)));
            if !hit {
                return Err(FilterRejection::Tags);
            }
        }

        if let (Some(wanted), Some(actual)) = (self.completed, attrs.is_completed) {
            if wanted != actual {
                return Err(FilterRejection::Completed);
            }
        }

        if let Some(words) = attrs.word_count {
            if self.min_word_count.is_some_and(|min| words < min) {
                return Err(FilterRejection::MinWordCount);
            }
            if self.max_word_count.is_some_and(|max| words > max) {
                return Err(FilterRejection::MaxWordCount);
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// NewSubscription
// ---------------------------------------------------------------------------

/// Input for the idempotent subscription put, keyed by
/// `(user_id, kind, target_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewSubscription {
    pub user_id: DbId,
    pub kind: SubscriptionKind,
    #[validate(range(min = 1))]
    pub target_id: DbId,
    #[serde(default)]
    pub target_name: String,
    #[validate(length(min = 1, message = "a subscription needs at least one event type"))]
    pub events: Vec<EventType>,
    #[serde(default)]
    #[validate(nested)]
    pub filters: SubscriptionFilters,
}

impl NewSubscription {
    pub fn new(user_id: DbId, kind: SubscriptionKind, target_id: DbId, events: Vec<EventType>) -> Self {
        Self {
            user_id,
            kind,
            target_id,
            target_name: String::new(),
            events,
            filters: SubscriptionFilters::default(),
        }
    }

    pub fn with_filters(mut self, filters: SubscriptionFilters) -> Self {
        self.filters = filters;
        self
    }

    /// Event list with duplicates removed, in a stable order.
    pub fn normalized_events(&self) -> Vec<EventType> {
        let mut events = self.events.clone();
        events.sort();
        events.dedup();
        events
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
