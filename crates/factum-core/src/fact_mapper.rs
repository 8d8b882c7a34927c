//! Projects raw incoming messages into canonical facts, per a field-config.

use crate::error::{FactumError, FactumResult};
use crate::types::{Fact, FactId, FieldConfigEntry, PayloadMap};
use chrono::Utc;
use factum_types::FactValue;
use serde_json::Value as Json;
use uuid::Uuid;

/// A raw incoming message, before projection into a `Fact`.
#[derive(Debug, Clone)]
pub struct Message {
    /// Message type.
    pub t: i64,
    /// Raw payload, keyed by source attribute name.
    pub d: PayloadMap,
}

impl Message {
    /// Parse a message from its JSON wire shape: `{ t: int, d: { ... } }`.
    pub fn from_json(value: &Json) -> FactumResult<Self> {
        let t = value
            .get("t")
            .and_then(Json::as_i64)
            .ok_or_else(|| FactumError::invalid_message("message.t is missing or not an integer"))?;
        let d = match value.get("d") {
            Some(Json::Object(map)) => map
                .iter()
                .map(|(k, v)| {
                    FactValue::try_from(v)
                        .map(|fv| (k.clone(), fv))
                        .map_err(|e| FactumError::invalid_message(e.to_string()))
                })
                .collect::<FactumResult<PayloadMap>>()?,
            Some(_) => {
                return Err(FactumError::invalid_message("message.d must be an object"));
            }
            None => PayloadMap::new(),
        };
        Ok(Self { t, d })
    }
}

/// Renames/projects raw message attributes into canonical fact attributes.
pub struct FactMapper {
    field_config: Vec<FieldConfigEntry>,
}

impl FactMapper {
    /// Build a mapper from a field-config (already loaded; loading JSON
    /// config files is a caller concern).
    pub fn new(field_config: Vec<FieldConfigEntry>) -> Self {
        Self { field_config }
    }

    /// Project one message into a fact.
    ///
    /// `t` must be present and a positive integer, or this fails with
    /// [`FactumError::InvalidMessage`]. Fields whose `message_types` do not
    /// include `message.t` are skipped; within an applicable row, a source
    /// attribute absent from `message.d` is skipped rather than copied as
    /// null.
    ///
    /// `id` identity resolution: the caller-supplied `id` wins when present;
    /// otherwise `message.d["id"]` is used when present; otherwise one is
    /// generated.
    pub fn map(&self, message: &Message, id: Option<FactId>) -> FactumResult<Fact> {
        if message.t <= 0 {
            return Err(FactumError::invalid_message(format!(
                "message.t must be a positive integer, got {}",
                message.t
            )));
        }

        let id = id
            .or_else(|| message.d.get("id").map(FactValue::as_string))
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut d = PayloadMap::new();
        for row in &self.field_config {
            if !row.message_types.contains(&message.t) {
                continue;
            }
            if let Some(value) = message.d.get(&row.src) {
                d.insert(row.dst.clone(), value.clone());
            }
        }

        Ok(Fact { id, t: message.t, c: Utc::now(), d })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Vec<FieldConfigEntry> {
        vec![
            FieldConfigEntry { src: "field_one".into(), dst: "f1".into(), message_types: vec![1] },
            FieldConfigEntry { src: "field_two".into(), dst: "f2".into(), message_types: vec![1, 2] },
        ]
    }

    #[test]
    fn maps_fields_whose_message_type_matches() {
        let mapper = FactMapper::new(config());
        let message = Message {
            t: 1,
            d: PayloadMap::from([
                ("field_one".to_string(), FactValue::String("v1".into())),
                ("field_two".to_string(), FactValue::String("v2".into())),
            ]),
        };
        let fact = mapper.map(&message, Some("fact-1".into())).unwrap();
        assert_eq!(fact.attribute("f1"), Some(&FactValue::String("v1".into())));
        assert_eq!(fact.attribute("f2"), Some(&FactValue::String("v2".into())));
    }

    #[test]
    fn skips_rows_whose_message_type_does_not_match() {
        let mapper = FactMapper::new(config());
        let message = Message {
            t: 2,
            d: PayloadMap::from([
                ("field_one".to_string(), FactValue::String("v1".into())),
                ("field_two".to_string(), FactValue::String("v2".into())),
            ]),
        };
        let fact = mapper.map(&message, Some("fact-2".into())).unwrap();
        assert!(fact.attribute("f1").is_none());
        assert_eq!(fact.attribute("f2"), Some(&FactValue::String("v2".into())));
    }

    #[test]
    fn skips_missing_source_attribute_rather_than_copying_null() {
        let mapper = FactMapper::new(config());
        let message = Message { t: 1, d: PayloadMap::new() };
        let fact = mapper.map(&message, Some("fact-3".into())).unwrap();
        assert!(fact.attribute("f1").is_none());
    }

    #[test]
    fn rejects_non_positive_message_type() {
        let mapper = FactMapper::new(config());
        let message = Message { t: 0, d: PayloadMap::new() };
        assert!(mapper.map(&message, None).is_err());
    }

    #[test]
    fn generates_an_id_when_none_supplied() {
        let mapper = FactMapper::new(config());
        let message = Message { t: 1, d: PayloadMap::new() };
        let fact = mapper.map(&message, None).unwrap();
        assert!(!fact.id.is_empty());
    }

    #[test]
    fn derives_id_from_payload_when_none_supplied() {
        let mapper = FactMapper::new(config());
        let message = Message {
            t: 1,
            d: PayloadMap::from([("id".to_string(), FactValue::String("from-payload".into()))]),
        };
        let fact = mapper.map(&message, None).unwrap();
        assert_eq!(fact.id, "from-payload");
    }
}
