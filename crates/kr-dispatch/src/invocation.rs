//! Inbound event shapes, classified once into a tagged enum.

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::unmarshal::{unmarshal_image, UnmarshalError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventName {
    Insert,
    Modify,
    Remove,
    Other,
}

impl EventName {
    fn parse(raw: &str) -> Self {
        match raw {
            "INSERT" => EventName::Insert,
            "MODIFY" => EventName::Modify,
            "REMOVE" => EventName::Remove,
            _ => EventName::Other,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawRecord {
    #[serde(rename = "eventName", default)]
    event_name: String,
    #[serde(default)]
    dynamodb: RawStreamData,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RawStreamData {
    #[serde(rename = "NewImage")]
    new_image: Option<Map<String, Value>>,
    #[serde(rename = "OldImage")]
    old_image: Option<Map<String, Value>>,
    #[serde(rename = "Keys")]
    keys: Option<Map<String, Value>>,
}

/// One stream record with its images still in typed attribute form.
#[derive(Debug, Clone)]
pub struct StreamRecord {
    pub event: EventName,
    new_image: Option<Map<String, Value>>,
    old_image: Option<Map<String, Value>>,
    keys: Option<Map<String, Value>>,
    malformed: Option<String>,
}

impl StreamRecord {
    fn decode(index: usize, raw: &Value) -> Self {
        match serde_json::from_value::<RawRecord>(raw.clone()) {
            Ok(record) => StreamRecord {
                event: EventName::parse(&record.event_name),
                new_image: record.dynamodb.new_image,
                old_image: record.dynamodb.old_image,
                keys: record.dynamodb.keys,
                malformed: None,
            },
            Err(err) => {
                warn!(index, error = %err, "malformed stream record");
                StreamRecord {
                    event: EventName::Other,
                    new_image: None,
                    old_image: None,
                    keys: None,
                    malformed: Some(err.to_string()),
                }
            }
        }
    }

    /// Why the record could not be decoded, if it could not.
    pub fn malformed(&self) -> Option<&str> {
        self.malformed.as_deref()
    }

    pub fn new_image(&self) -> Option<Result<Map<String, Value>, UnmarshalError>> {
        self.new_image.as_ref().map(unmarshal_image)
    }

    pub fn old_image(&self) -> Option<Result<Map<String, Value>, UnmarshalError>> {
        self.old_image.as_ref().map(unmarshal_image)
    }

    pub fn keys(&self) -> Option<Result<Map<String, Value>, UnmarshalError>> {
        self.keys.as_ref().map(unmarshal_image)
    }
}

#[derive(Debug, Clone)]
pub enum Invocation {
    StreamBatch(Vec<StreamRecord>),
    TypedQuery { field_name: String, input: Value },
    DirectGame { game: Value, options: Value },
    DirectGameId { game_id: String, options: Value },
    Invalid(String),
}

impl Invocation {
    /// Order matters: `Records`, then `fieldName`, then `game`, then `gameId`.
    pub fn classify(event: &Value) -> Invocation {
        let Some(object) = event.as_object() else {
            return Invocation::Invalid("event must be a JSON object".into());
        };
        let options = || object.get("options").cloned().unwrap_or(Value::Null);

        if let Some(records) = object.get("Records") {
            let Some(records) = records.as_array() else {
                return Invocation::Invalid("Records must be an array".into());
            };
            let parsed = records
                .iter()
                .enumerate()
                .map(|(index, raw)| StreamRecord::decode(index, raw))
                .collect();
            return Invocation::StreamBatch(parsed);
        }
        if let Some(field_name) = object.get("fieldName").and_then(Value::as_str) {
            let arguments = object.get("arguments");
            let input = arguments
                .and_then(|a| a.get("input"))
                .or(arguments)
                .cloned()
                .unwrap_or(Value::Null);
            return Invocation::TypedQuery {
                field_name: field_name.to_string(),
                input,
            };
        }
        if let Some(game) = object.get("game").filter(|g| g.is_object()) {
            return Invocation::DirectGame {
                game: game.clone(),
                options: options(),
            };
        }
        if let Some(game_id) = object.get("gameId").and_then(Value::as_str) {
            return Invocation::DirectGameId {
                game_id: game_id.to_string(),
                options: options(),
            };
        }
        Invocation::Invalid("unrecognized invocation: expected Records, fieldName, game or gameId".into())
    }
}
