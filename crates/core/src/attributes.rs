//! Typed access to the well-known keys of an event's `extra_data` object.

use serde_json::Value;

use crate::error::CoreError;
use crate::subscription::{ContentAttributes, SubscriptionKind};
use crate::types::DbId;

pub const KEY_RATING: &str = "rating";
pub const KEY_TAGS: &str = "tags";
pub const KEY_IS_COMPLETED: &str = "is_completed";
pub const KEY_WORD_COUNT: &str = "word_count";

pub const KEY_WORK_IDS: &str = "work_ids";
pub const KEY_AUTHOR_IDS: &str = "author_ids";
pub const KEY_SERIES_IDS: &str = "series_ids";
pub const KEY_COLLECTION_IDS: &str = "collection_ids";
pub const KEY_TAG_IDS: &str = "tag_ids";

impl ContentAttributes {
    /// Read the filterable attributes out of an event's extra data.
    ///
    /// Absent keys (and JSON `null`) become `None` / empty. A key that is
    /// present with the wrong JSON type is a validation error.
    pub fn from_extra(extra: &Value) -> Result<Self, CoreError> {
        let rating = match field(extra, KEY_RATING) {
            None => None,
            Some(Value::String(s)) if s.is_empty() => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => return Err(type_error(KEY_RATING, "a string", other)),
        };

        let tags = match field(extra, KEY_TAGS) {
            None => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| type_error(KEY_TAGS, "an array of strings", v))
                })
                .collect::<Result<_, _>>()?,
            Some(other) => return Err(type_error(KEY_TAGS, "an array of strings", other)),
        };

        let is_completed = match field(extra, KEY_IS_COMPLETED) {
            None => None,
            Some(Value::Bool(b)) => Some(*b),
            Some(other) => return Err(type_error(KEY_IS_COMPLETED, "a boolean", other)),
        };

        let word_count = match field(extra, KEY_WORD_COUNT) {
            None => None,
            Some(v) => Some(
                v.as_i64()
                    .ok_or_else(|| type_error(KEY_WORD_COUNT, "an integer", v))?,
            ),
        };

        Ok(Self {
            rating,
            tags,
            is_completed,
            word_count,
        })
    }
}

/// Extra-data key listing related targets of the given kind.
pub fn related_ids_key(kind: SubscriptionKind) -> &'static str {
    match kind {
        SubscriptionKind::Work => KEY_WORK_IDS,
        SubscriptionKind::Author => KEY_AUTHOR_IDS,
        SubscriptionKind::Series => KEY_SERIES_IDS,
        SubscriptionKind::Collection => KEY_COLLECTION_IDS,
        SubscriptionKind::Tag => KEY_TAG_IDS,
    }
}

/// Read an array of ids from the extra data. Absent key yields an empty list.
pub fn related_ids(extra: &Value, key: &str) -> Result<Vec<DbId>, CoreError> {
    match field(extra, key) {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| v.as_i64().ok_or_else(|| type_error(key, "an array of ids", v)))
            .collect(),
        Some(other) => Err(type_error(key, "an array of ids", other)),
    }
}

fn field<'a>(extra: &'a Value, key: &str) -> Option<&'a Value> {
    extra.get(key).filter(|v| !v.is_null())
}

fn type_error(key: &str, expected: &str, found: &Value) -> CoreError {
    CoreError::Validation(format!("extra_data.{key} must be {expected}, found {found}"))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn reads_all_known_attributes() {
        let extra = json!({
            "rating": "Teen And Up Audiences",
            "tags": ["Fluff", "Slow Burn"],
            "is_completed": true,
            "word_count": 4200,
        });
        let attrs = ContentAttributes::from_extra(&extra).unwrap();
        assert_eq!(attrs.rating.as_deref(), Some("Teen And Up Audiences"));
        assert_eq!(attrs.tags, vec!["Fluff", "Slow Burn"]);
        assert_eq!(attrs.is_completed, Some(true));
        assert_eq!(attrs.word_count, Some(4200));
    }

    #[test]
    fn absent_and_null_keys_are_empty() {
        let attrs = ContentAttributes::from_extra(&json!({"rating": null})).unwrap();
        assert_eq!(attrs, ContentAttributes::default());

        let attrs = ContentAttributes::from_extra(&Value::Null).unwrap();
        assert_eq!(attrs, ContentAttributes::default());
    }

    #[test]
    fn wrong_type_is_a_validation_error() {
        let err = ContentAttributes::from_extra(&json!({"word_count": "lots"})).unwrap_err();
        assert_matches!(err, CoreError::Validation(msg) if msg.contains("word_count"));
    }

    #[test]
    fn related_ids_parse_integer_arrays() {
        let extra = json!({"author_ids": [3, 9]});
        assert_eq!(related_ids(&extra, KEY_AUTHOR_IDS).unwrap(), vec![3, 9]);
        assert!(related_ids(&extra, KEY_SERIES_IDS).unwrap().is_empty());
        assert!(related_ids(&json!({"series_ids": [1, "x"]}), KEY_SERIES_IDS).is_err());
    }

    #[test]
    fn every_kind_has_a_related_ids_key() {
        assert_eq!(related_ids_key(SubscriptionKind::Work), KEY_WORK_IDS);
        assert_eq!(related_ids_key(SubscriptionKind::Tag), KEY_TAG_IDS);
    }
}
