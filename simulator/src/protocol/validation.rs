//! Event conformance checks
//!
//! A very basic UMIM check: an ordered rule table evaluated against the raw
//! wire object. The first failing rule is reported; later rules may assume
//! every earlier rule held.

use serde_json::{Map, Value};
use shared_types::{
    Event, FIELD_ACTION_FINISHED_AT, FIELD_ACTION_UID, FIELD_EVENT_CREATED_AT,
    FIELD_FAILURE_REASON, FIELD_IS_SUCCESS, FIELD_LEGACY_CREATED_AT, FIELD_SOURCE_UID, FIELD_TYPE,
    FIELD_UID,
};

/// Structural rule violation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{rule_description}")]
pub struct ValidationError {
    pub rule_description: String,
}

impl ValidationError {
    pub fn new(rule_description: impl Into<String>) -> Self {
        Self {
            rule_description: rule_description.into(),
        }
    }
}

/// Why an inbound wire payload was rejected
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Event is not a JSON object")]
    NotAnObject,

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldType {
    String,
    Bool,
    Number,
}

impl FieldType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Bool => value.is_boolean(),
            Self::Number => value.is_number(),
        }
    }
}

struct Rule {
    description: &'static str,
    check: fn(&Map<String, Value>) -> bool,
}

/// Payload requirement for one exact event kind
struct PayloadRequirement {
    kind: &'static str,
    field: &'static str,
    field_type: FieldType,
}

// ============================================================================
// Rule Tables
// ============================================================================

const BASE_RULES: &[Rule] = &[
    Rule {
        description: "Events need to provide 'type'",
        check: |e| has_field(e, FIELD_TYPE, FieldType::String),
    },
    Rule {
        description: "Events need to provide 'uid' of type 'str'",
        check: |e| has_field(e, FIELD_UID, FieldType::String),
    },
    Rule {
        description: "Events need to provide 'event_created_at' of type 'str'",
        check: |e| has_field(e, FIELD_EVENT_CREATED_AT, FieldType::String),
    },
    Rule {
        description: "Events need to provide 'source_uid' of type 'str'",
        check: |e| has_field(e, FIELD_SOURCE_UID, FieldType::String),
    },
    Rule {
        description: "***Action events need to provide an 'action_uid' of type 'str'",
        check: |e| !kind(e).contains("Action") || has_field(e, FIELD_ACTION_UID, FieldType::String),
    },
    Rule {
        description: "***Finished events require 'action_finished_at' field of type 'str'",
        check: |e| {
            !kind(e).ends_with("Finished")
                || has_field(e, FIELD_ACTION_FINISHED_AT, FieldType::String)
        },
    },
    Rule {
        description: "***Finished events require 'is_success' field of type 'bool'",
        check: |e| !kind(e).ends_with("Finished") || has_field(e, FIELD_IS_SUCCESS, FieldType::Bool),
    },
    Rule {
        description: "Unsuccessful ***Finished events need to provide 'failure_reason'",
        check: |e| {
            !kind(e).ends_with("Finished")
                || e.get(FIELD_IS_SUCCESS).and_then(Value::as_bool).unwrap_or(false)
                || e.contains_key(FIELD_FAILURE_REASON)
        },
    },
];

const PAYLOAD_REQUIREMENTS: &[PayloadRequirement] = &[
    PayloadRequirement {
        kind: "StartUtteranceBotAction",
        field: "script",
        field_type: FieldType::String,
    },
    PayloadRequirement {
        kind: "UtteranceBotActionScriptUpdated",
        field: "interim_script",
        field_type: FieldType::String,
    },
    PayloadRequirement {
        kind: "UtteranceBotActionFinished",
        field: "final_script",
        field_type: FieldType::String,
    },
    PayloadRequirement {
        kind: "UtteranceUserActionTranscriptUpdated",
        field: "interim_transcript",
        field_type: FieldType::String,
    },
    PayloadRequirement {
        kind: "UtteranceUserActionFinished",
        field: "final_transcript",
        field_type: FieldType::String,
    },
    PayloadRequirement {
        kind: "StartGestureBotAction",
        field: "gesture",
        field_type: FieldType::String,
    },
    PayloadRequirement {
        kind: "StartPostureBotAction",
        field: "posture",
        field_type: FieldType::String,
    },
    PayloadRequirement {
        kind: "StartTimerBotAction",
        field: "duration",
        field_type: FieldType::Number,
    },
    PayloadRequirement {
        kind: "ChangeTimerBotAction",
        field: "duration",
        field_type: FieldType::Number,
    },
];

fn has_field(event: &Map<String, Value>, name: &str, field_type: FieldType) -> bool {
    event.get(name).is_some_and(|value| field_type.matches(value))
}

fn kind(event: &Map<String, Value>) -> &str {
    event.get(FIELD_TYPE).and_then(Value::as_str).unwrap_or_default()
}

fn type_name(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::String => "str",
        FieldType::Bool => "bool",
        FieldType::Number => "number",
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Check an event against every rule, in declaration order
pub fn validate(event: &Map<String, Value>) -> Result<(), ValidationError> {
    for rule in BASE_RULES {
        if !(rule.check)(event) {
            return Err(ValidationError::new(rule.description));
        }
    }

    let event_kind = kind(event);
    for requirement in PAYLOAD_REQUIREMENTS {
        if requirement.kind == event_kind
            && !has_field(event, requirement.field, requirement.field_type)
        {
            return Err(ValidationError::new(format!(
                "***{} events need to provide '{}' of type '{}'",
                requirement.kind,
                requirement.field,
                type_name(requirement.field_type)
            )));
        }
    }

    Ok(())
}

/// Non-failing variant of [`validate`]
pub fn is_valid(event: &Map<String, Value>) -> bool {
    validate(event).is_ok()
}

/// Make a legacy event conformant where that is unambiguous
pub fn normalize(event: &mut Map<String, Value>) {
    if let Some(created_at) = event.remove(FIELD_LEGACY_CREATED_AT) {
        event
            .entry(FIELD_EVENT_CREATED_AT.to_string())
            .or_insert(created_at);
    }
}

/// Parse, optionally normalize, and validate one inbound wire payload
pub fn decode_wire_event(raw: &str, strict: bool) -> Result<Event, DecodeError> {
    decode_wire_value(serde_json::from_str(raw)?, strict)
}

/// Same as [`decode_wire_event`] for a payload that is already parsed
pub fn decode_wire_value(value: Value, strict: bool) -> Result<Event, DecodeError> {
    let Value::Object(mut map) = value else {
        return Err(DecodeError::NotAnObject);
    };

    if !strict {
        normalize(&mut map);
    }
    validate(&map)?;

    Ok(Event::from_map(map)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn base(kind: &str) -> Map<String, Value> {
        object(json!({
            "type": kind,
            "uid": "u1",
            "event_created_at": "2024-01-01T00:00:00+00:00",
            "source_uid": "test",
        }))
    }

    #[test]
    fn test_minimal_event_is_valid() {
        assert!(is_valid(&base("UserIntent")));
    }

    #[test]
    fn test_missing_uid_fails_first() {
        let mut event = base("StartGestureBotAction");
        event.remove("uid");
        event.remove("source_uid");

        let err = validate(&event).unwrap_err();
        assert_eq!(
            err.rule_description,
            "Events need to provide 'uid' of type 'str'"
        );
    }

    #[test]
    fn test_uid_must_be_string() {
        let mut event = base("UserIntent");
        event.insert("uid".to_string(), json!(42));
        assert!(!is_valid(&event));
    }

    #[test]
    fn test_action_events_need_action_uid() {
        let mut event = base("StartGestureBotAction");
        event.insert("gesture".to_string(), json!("wave"));
        assert!(validate(&event)
            .unwrap_err()
            .rule_description
            .contains("action_uid"));

        event.insert("action_uid".to_string(), json!("a1"));
        assert!(is_valid(&event));
    }

    #[test]
    fn test_finished_requires_success_fields() {
        let mut event = base("GestureBotActionFinished");
        event.insert("action_uid".to_string(), json!("a1"));
        assert!(validate(&event)
            .unwrap_err()
            .rule_description
            .contains("action_finished_at"));

        event.insert(
            "action_finished_at".to_string(),
            json!("2024-01-01T00:00:01+00:00"),
        );
        assert!(validate(&event)
            .unwrap_err()
            .rule_description
            .contains("is_success"));

        event.insert("is_success".to_string(), json!(false));
        assert!(validate(&event)
            .unwrap_err()
            .rule_description
            .contains("failure_reason"));

        event.insert("failure_reason".to_string(), json!("blocked"));
        assert!(is_valid(&event));
    }

    #[test]
    fn test_payload_requirements() {
        let mut event = base("StartUtteranceBotAction");
        event.insert("action_uid".to_string(), json!("a1"));
        let err = validate(&event).unwrap_err();
        assert_eq!(
            err.rule_description,
            "***StartUtteranceBotAction events need to provide 'script' of type 'str'"
        );

        event.insert("script".to_string(), json!("Hello there"));
        assert!(is_valid(&event));

        let mut timer = base("StartTimerBotAction");
        timer.insert("action_uid".to_string(), json!("t1"));
        timer.insert("duration".to_string(), json!("5"));
        assert!(!is_valid(&timer));
        timer.insert("duration".to_string(), json!(5));
        assert!(is_valid(&timer));
    }

    #[test]
    fn test_normalize_legacy_created_at() {
        let mut event = base("UserIntent");
        let created = event.remove("event_created_at").unwrap();
        event.insert("created_at".to_string(), created.clone());
        assert!(!is_valid(&event));

        normalize(&mut event);
        assert_eq!(event.get("event_created_at"), Some(&created));
        assert!(!event.contains_key("created_at"));
        assert!(is_valid(&event));
    }

    #[test]
    fn test_decode_wire_event() {
        let raw = r#"{"type":"StartGestureBotAction","uid":"u1","event_created_at":"2024-01-01T00:00:00Z","source_uid":"bot","action_uid":"a1","gesture":"wave"}"#;
        let event = decode_wire_event(raw, true).unwrap();
        assert_eq!(event.kind, "StartGestureBotAction");
        assert_eq!(event.str_field("gesture"), Some("wave"));

        assert!(matches!(
            decode_wire_event("[1,2]", true),
            Err(DecodeError::NotAnObject)
        ));
        assert!(matches!(
            decode_wire_event("{not json", true),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            decode_wire_event(r#"{"type":"X"}"#, true),
            Err(DecodeError::Validation(_))
        ));
    }

    #[test]
    fn test_decode_parsed_value() {
        let value = json!({"type": "UserIntent", "uid": "u1", "intent": "greet"});
        assert!(matches!(
            decode_wire_value(value, true),
            Err(DecodeError::Validation(_))
        ));
        assert!(matches!(
            decode_wire_value(json!("UserIntent"), true),
            Err(DecodeError::NotAnObject)
        ));
    }

    #[test]
    fn test_decode_lenient_mode() {
        let raw = r#"{"type":"UserIntent","uid":"u1","created_at":"2024-01-01T00:00:00Z","source_uid":"bot","intent":"greet"}"#;
        assert!(decode_wire_event(raw, true).is_err());
        let event = decode_wire_event(raw, false).unwrap();
        assert_eq!(event.created_at, "2024-01-01T00:00:00Z");
    }
}
