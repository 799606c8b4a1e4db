//! The closed set of content events that can trigger notifications, and the
//! priority attached to the resulting notification items.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// EventType
// ---------------------------------------------------------------------------

/// A content event emitted by the work, comment, and kudos services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A new chapter or edit was posted to an existing work.
    WorkUpdated,
    /// A work was marked complete.
    WorkCompleted,
    /// A brand new work was posted.
    NewWork,
    /// A work was added to (or updated within) a series.
    SeriesUpdated,
    CommentReceived,
    CommentReplied,
    KudosReceived,
    BookmarkAdded,
    CollectionInvite,
}

impl EventType {
    pub const ALL: [EventType; 9] = [
        EventType::WorkUpdated,
        EventType::WorkCompleted,
        EventType::NewWork,
        EventType::SeriesUpdated,
        EventType::CommentReceived,
        EventType::CommentReplied,
        EventType::KudosReceived,
        EventType::BookmarkAdded,
        EventType::CollectionInvite,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::WorkUpdated => "work_updated",
            EventType::WorkCompleted => "work_completed",
            EventType::NewWork => "new_work",
            EventType::SeriesUpdated => "series_updated",
            EventType::CommentReceived => "comment_received",
            EventType::CommentReplied => "comment_replied",
            EventType::KudosReceived => "kudos_received",
            EventType::BookmarkAdded => "bookmark_added",
            EventType::CollectionInvite => "collection_invite",
        }
    }

    /// Priority given to items created for this event.
    pub fn default_priority(self) -> Priority {
        match self {
            EventType::CommentReceived | EventType::CommentReplied => Priority::High,
            EventType::KudosReceived | EventType::BookmarkAdded => Priority::Low,
            _ => Priority::Medium,
        }
    }

    /// Activity on a work by another user. The event's `source_id` is the
    /// work, whatever its `source_type` names.
    pub fn is_work_activity(self) -> bool {
        matches!(
            self,
            EventType::CommentReceived
                | EventType::CommentReplied
                | EventType::KudosReceived
                | EventType::BookmarkAdded
        )
    }

    /// Heading used when grouping items of this type in a digest.
    pub fn display_name(self) -> &'static str {
        match self {
            EventType::WorkUpdated => "Work Updates",
            EventType::WorkCompleted => "Completed Works",
            EventType::NewWork => "New Works",
            EventType::SeriesUpdated => "Series Updates",
            EventType::CommentReceived => "New Comments",
            EventType::CommentReplied => "Comment Replies",
            EventType::KudosReceived => "Kudos",
            EventType::BookmarkAdded => "Bookmarks",
            EventType::CollectionInvite => "Collection Invites",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| format!("Unknown event type: {s}"))
    }
}

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    /// Sort rank, highest priority first.
    pub fn rank(self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            other => Err(format!("Unknown priority: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_event_type_round_trips_through_its_name() {
        for event in EventType::ALL {
            assert_eq!(event.as_str().parse::<EventType>(), Ok(event));
        }
    }

    #[test]
    fn serde_name_matches_column_name() {
        let json = serde_json::to_string(&EventType::KudosReceived).unwrap();
        assert_eq!(json, "\"kudos_received\"");
    }

    #[test]
    fn comments_outrank_kudos() {
        assert!(
            EventType::CommentReceived.default_priority().rank()
                < EventType::KudosReceived.default_priority().rank()
        );
    }

    #[test]
    fn work_activity_covers_comments_kudos_and_bookmarks() {
        let activity: Vec<_> = EventType::ALL
            .into_iter()
            .filter(|e| e.is_work_activity())
            .collect();
        assert_eq!(
            activity,
            vec![
                EventType::CommentReceived,
                EventType::CommentReplied,
                EventType::KudosReceived,
                EventType::BookmarkAdded,
            ]
        );
    }

    #[test]
    fn unknown_event_name_is_rejected() {
        assert!("system_alert".parse::<EventType>().is_err());
    }
}
