use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use nbus_core::{Level, NotificationEntity, TransportError, TypeRegistry};

/// The durable transport's wire format: one stream entry per notification,
/// carried as individual Redis stream fields (not a single JSON blob) so a
/// raw `XRANGE` is directly inspectable by an operator.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub r#type: String,
    pub payload: Option<serde_json::Value>,
    pub notification_id: String,
    pub timestamp: DateTime<Utc>,
    pub sequence: Option<i64>,
    pub update_key: Option<String>,
    pub group_id: Option<String>,
    pub level: Level,
    pub message: String,
    pub tags: BTreeSet<String>,
}

impl StreamEntry {
    pub fn from_entity(entity: &NotificationEntity, update_key: Option<String>, sequence: Option<i64>) -> Self {
        Self {
            r#type: entity.notification_type.clone(),
            payload: if update_key.is_some() {
                None
            } else {
                Some(entity.payload.clone())
            },
            notification_id: entity.notification_id.clone(),
            timestamp: entity.timestamp,
            sequence,
            update_key,
            group_id: entity.group_id.clone(),
            level: entity.level,
            message: entity.message.clone(),
            tags: entity.tags.clone(),
        }
    }

    /// Field/value pairs as passed to `XADD`.
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("Type", self.r#type.clone()),
            ("NotificationId", self.notification_id.clone()),
            ("Timestamp", self.timestamp.to_rfc3339()),
            ("Level", level_to_str(self.level).to_string()),
            ("Message", self.message.clone()),
            ("Tags", serde_json::to_string(&self.tags).unwrap_or_default()),
        ];
        if let Some(payload) = &self.payload {
            fields.push(("Payload", payload.to_string()));
        }
        if let Some(seq) = self.sequence {
            fields.push(("Sequence", seq.to_string()));
        }
        if let Some(key) = &self.update_key {
            fields.push(("UpdateKey", key.clone()));
        }
        if let Some(group_id) = &self.group_id {
            fields.push(("GroupId", group_id.clone()));
        }
        fields
    }

    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, TransportError> {
        let r#type = fields
            .get("Type")
            .ok_or_else(|| TransportError::Other("stream entry missing Type field".into()))?
            .clone();
        let notification_id = fields.get("NotificationId").cloned().unwrap_or_default();
        let timestamp = fields
            .get("Timestamp")
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let sequence = fields.get("Sequence").and_then(|s| s.parse::<i64>().ok());
        let update_key = fields.get("UpdateKey").cloned();
        let group_id = fields.get("GroupId").cloned();
        let level = fields
            .get("Level")
            .and_then(|s| level_from_str(s))
            .unwrap_or_default();
        let message = fields.get("Message").cloned().unwrap_or_default();
        let tags = fields
            .get("Tags")
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default();
        let payload = fields
            .get("Payload")
            .map(|s| serde_json::from_str(s))
            .transpose()?;

        Ok(Self {
            r#type,
            payload,
            notification_id,
            timestamp,
            sequence,
            update_key,
            group_id,
            level,
            message,
            tags,
        })
    }

    /// Reconstruct the full entity, resolving `raw_payload` (the `Payload`
    /// field, or the fetched companion key's value in `UpdateKey` mode)
    /// through the type registry's decoder/fallback chain.
    pub fn into_entity(self, registry: &TypeRegistry, raw_payload: serde_json::Value) -> NotificationEntity {
        registry.resolve_entity(
            self.notification_id,
            self.timestamp,
            &self.r#type,
            &raw_payload,
            self.group_id,
            self.level,
            self.message,
            self.tags,
        )
    }
}

fn level_to_str(level: Level) -> &'static str {
    match level {
        Level::Trace => "trace",
        Level::Debug => "debug",
        Level::Info => "info",
        Level::Warn => "warn",
        Level::Error => "error",
        Level::Critical => "critical",
    }
}

fn level_from_str(s: &str) -> Option<Level> {
    Some(match s {
        "trace" => Level::Trace,
        "debug" => Level::Debug,
        "info" => Level::Info,
        "warn" => Level::Warn,
        "error" => Level::Error,
        "critical" => Level::Critical,
        _ => return None,
    })
}
