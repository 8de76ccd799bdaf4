use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::entity::{Level, NotificationEntity};

/// Decodes a raw JSON payload for a known notification type. The default
/// identity decoder is sufficient for most types; a custom decoder can
/// normalize or validate shape before the entity is handed to subscribers.
pub trait Decoder: Send + Sync {
    fn decode(&self, raw_payload: &serde_json::Value) -> serde_json::Value;
}

/// Decoder that passes the payload through unchanged.
pub struct IdentityDecoder;

impl Decoder for IdentityDecoder {
    fn decode(&self, raw_payload: &serde_json::Value) -> serde_json::Value {
        raw_payload.clone()
    }
}

/// Per-type strategy for updateable (key-overwriting) notifications.
///
/// If `update_key_extractor` returns a non-empty key for an entity, the
/// durable publisher writes/overwrites a single key and appends a stream
/// marker instead of inserting stream-only.
#[derive(Clone)]
pub struct UpdateableConfig {
    pub update_key_extractor: Arc<dyn Fn(&NotificationEntity) -> Option<String> + Send + Sync>,
    pub sequence_extractor: Arc<dyn Fn(&NotificationEntity) -> Option<i64> + Send + Sync>,
}

impl UpdateableConfig {
    pub fn new(
        update_key_extractor: impl Fn(&NotificationEntity) -> Option<String> + Send + Sync + 'static,
        sequence_extractor: impl Fn(&NotificationEntity) -> Option<i64> + Send + Sync + 'static,
    ) -> Self {
        Self {
            update_key_extractor: Arc::new(update_key_extractor),
            sequence_extractor: Arc::new(sequence_extractor),
        }
    }
}

/// The raw payload of a fallback notification, preserved verbatim under
/// `data` when the type resolver cannot find a decoder for a type tag (or
/// any of its stripped qualifiers).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GenericNotification {
    pub data: serde_json::Value,
}

/// Result of resolving a type tag against the registry: either a known type
/// whose payload was run through its decoder, or the generic fallback.
pub enum Resolved {
    Known(serde_json::Value),
    Generic(GenericNotification),
}

impl Resolved {
    pub fn into_payload(self) -> serde_json::Value {
        match self {
            Self::Known(v) => v,
            Self::Generic(g) => serde_json::json!({ "data": g.data }),
        }
    }
}

/// Immutable-at-startup routing table: which stream a type lands on, whether
/// it's stream-only, whether it's updateable, and the decoder used to
/// resolve its wire payload. A type belongs to at most one routing entry;
/// absent an explicit mapping, `default_stream` is used.
#[derive(Clone)]
pub struct TypeRegistry {
    type_to_stream: HashMap<String, String>,
    stream_only_types: HashSet<String>,
    updateable_types: HashMap<String, UpdateableConfig>,
    decoders: HashMap<String, Arc<dyn Decoder>>,
    default_stream: String,
}

impl TypeRegistry {
    pub fn builder() -> TypeRegistryBuilder {
        TypeRegistryBuilder::default()
    }

    pub fn default_stream(&self) -> &str {
        &self.default_stream
    }

    /// `typeToStream[type] ?? defaultStream`
    pub fn stream_for(&self, notification_type: &str) -> &str {
        self.type_to_stream
            .get(notification_type)
            .map(String::as_str)
            .unwrap_or(&self.default_stream)
    }

    pub fn is_stream_only(&self, notification_type: &str) -> bool {
        self.stream_only_types.contains(notification_type)
    }

    pub fn updateable_config(&self, notification_type: &str) -> Option<&UpdateableConfig> {
        self.updateable_types.get(notification_type)
    }

    /// All streams that must exist at startup (default stream plus every
    /// explicit mapping) — streams are declared up-front, never at runtime.
    pub fn declared_streams(&self) -> BTreeSet<String> {
        let mut streams: BTreeSet<String> = self.type_to_stream.values().cloned().collect();
        streams.insert(self.default_stream.clone());
        streams
    }

    /// Type resolver: try the full tag; on miss, strip
    /// version/assembly-qualifier suffixes (split on comma, take the first
    /// segment) and retry; on final miss, fall back to a generic
    /// notification wrapping the raw payload. Never errors.
    pub fn resolve(&self, type_tag: &str, raw_payload: &serde_json::Value) -> Resolved {
        if let Some(decoder) = self.decoders.get(type_tag) {
            return Resolved::Known(decoder.decode(raw_payload));
        }

        let stripped = type_tag.split(',').next().unwrap_or(type_tag).trim();
        if stripped != type_tag
            && let Some(decoder) = self.decoders.get(stripped)
        {
            return Resolved::Known(decoder.decode(raw_payload));
        }

        Resolved::Generic(GenericNotification {
            data: raw_payload.clone(),
        })
    }

    /// Build a complete entity from wire fields via the type resolver,
    /// exactly as the durable receiver does after decoding a stream entry.
    #[allow(clippy::too_many_arguments)]
    pub fn resolve_entity(
        &self,
        notification_id: String,
        timestamp: DateTime<Utc>,
        type_tag: &str,
        raw_payload: &serde_json::Value,
        group_id: Option<String>,
        level: Level,
        message: String,
        tags: BTreeSet<String>,
    ) -> NotificationEntity {
        let payload = self.resolve(type_tag, raw_payload).into_payload();
        NotificationEntity {
            notification_id,
            timestamp,
            notification_type: type_tag.to_string(),
            group_id,
            level,
            message,
            tags,
            payload,
        }
    }
}

#[derive(Default)]
pub struct TypeRegistryBuilder {
    type_to_stream: HashMap<String, String>,
    stream_only_types: HashSet<String>,
    updateable_types: HashMap<String, UpdateableConfig>,
    decoders: HashMap<String, Arc<dyn Decoder>>,
    default_stream: Option<String>,
}

impl TypeRegistryBuilder {
    pub fn default_stream(mut self, stream: impl Into<String>) -> Self {
        self.default_stream = Some(stream.into());
        self
    }

    pub fn route(mut self, notification_type: impl Into<String>, stream: impl Into<String>) -> Self {
        self.type_to_stream.insert(notification_type.into(), stream.into());
        self
    }

    pub fn stream_only(mut self, notification_type: impl Into<String>) -> Self {
        self.stream_only_types.insert(notification_type.into());
        self
    }

    pub fn updateable(mut self, notification_type: impl Into<String>, config: UpdateableConfig) -> Self {
        self.updateable_types.insert(notification_type.into(), config);
        self
    }

    pub fn decoder(mut self, notification_type: impl Into<String>, decoder: Arc<dyn Decoder>) -> Self {
        self.decoders.insert(notification_type.into(), decoder);
        self
    }

    pub fn build(self) -> TypeRegistry {
        TypeRegistry {
            type_to_stream: self.type_to_stream,
            stream_only_types: self.stream_only_types,
            updateable_types: self.updateable_types,
            decoders: self.decoders,
            default_stream: self
                .default_stream
                .unwrap_or_else(|| "notifications:stream:default".to_string()),
        }
    }
}
