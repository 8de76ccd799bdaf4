use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a notification, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl Default for Level {
    fn default() -> Self {
        Self::Info
    }
}

/// The unit of delivery carried by every transport.
///
/// `notification_id` is the dedup key and must be non-empty and stable across
/// transports for the same logical event. The composite emitter assigns
/// `notification_id`/`timestamp` when absent; once emitted, an entity is
/// treated as immutable by every downstream component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEntity {
    pub notification_id: String,
    pub timestamp: DateTime<Utc>,
    pub notification_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default)]
    pub level: Level,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Arbitrary producer-defined payload fields, carried as raw JSON.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl NotificationEntity {
    /// Build a new entity; `notification_id` and `timestamp` are left unset
    /// (empty id, current time) so a composite emitter can stamp them per
    /// its lifecycle contract.
    pub fn new(notification_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            notification_id: String::new(),
            timestamp: Utc::now(),
            notification_type: notification_type.into(),
            group_id: None,
            level: Level::default(),
            message: message.into(),
            tags: BTreeSet::new(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Stamp `notification_id` and `timestamp` if either is unset. Called by
    /// the composite emitter before fan-out, never by subscribers.
    pub fn stamp_if_unset(&mut self) {
        if self.notification_id.is_empty() {
            self.notification_id = ulid::Ulid::new().to_string();
        }
    }

    /// Any-match tag filter: passes iff `tags` is empty, or the entity's tag
    /// set intersects it.
    pub fn matches_tags(&self, tags: &[String]) -> bool {
        tags.is_empty() || tags.iter().any(|t| self.tags.contains(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_entity_has_empty_id_until_stamped() {
        let mut e = NotificationEntity::new("order.status", "created");
        assert!(e.notification_id.is_empty());
        e.stamp_if_unset();
        assert!(!e.notification_id.is_empty());
    }

    #[test]
    fn stamp_does_not_overwrite_existing_id() {
        let mut e = NotificationEntity::new("order.status", "created");
        e.notification_id = "fixed-id".to_string();
        e.stamp_if_unset();
        assert_eq!(e.notification_id, "fixed-id");
    }

    #[test]
    fn empty_filter_matches_everything() {
        let e = NotificationEntity::new("x", "y").with_tags(["a"]);
        assert!(e.matches_tags(&[]));
    }

    #[test]
    fn any_match_semantics() {
        let e = NotificationEntity::new("x", "y").with_tags(["a", "b"]);
        assert!(e.matches_tags(&["b".to_string(), "z".to_string()]));
        assert!(!e.matches_tags(&["z".to_string()]));
    }

    #[test]
    fn level_default_is_info() {
        let e = NotificationEntity::new("x", "y");
        assert_eq!(e.level, Level::Info);
    }

    #[test]
    fn serializes_level_lowercase() {
        let e = NotificationEntity::new("x", "y");
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["level"], "info");
    }
}
