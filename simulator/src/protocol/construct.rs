//! Outbound event construction
//!
//! Stamps the envelope fields, the modality metadata and the lifecycle
//! timestamps, then re-validates the result so the simulator never publishes
//! an event it would itself reject.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use shared_types::{
    Event, Modality, ModalityPolicy, EVENT_ERROR, FIELD_ACTION_FINISHED_AT,
    FIELD_ACTION_STARTED_AT, FIELD_ACTION_UID, FIELD_EVENT_CREATED_AT, FIELD_FAILURE_REASON,
    FIELD_IS_SUCCESS, FIELD_MODALITY, FIELD_MODALITY_POLICY, FIELD_REASON, FIELD_SOURCE_UID,
    FIELD_TYPE, FIELD_UID,
};
use uuid::Uuid;

use super::kind::{ActionVerb, EventKind};
use super::validation::{validate, ValidationError};

/// Modality metadata stamped on outbound action events, keyed by exact action name
const MODALITY_INFO: &[(&str, Modality, ModalityPolicy)] = &[
    ("UtteranceBotAction", Modality::BotSpeech, ModalityPolicy::Replace),
    ("UtteranceUserAction", Modality::UserSpeech, ModalityPolicy::Replace),
    ("VisualChoiceSceneAction", Modality::Information, ModalityPolicy::Override),
    ("VisualInformationSceneAction", Modality::Information, ModalityPolicy::Override),
    ("VisualFormSceneAction", Modality::Information, ModalityPolicy::Override),
    ("GestureBotAction", Modality::BotGesture, ModalityPolicy::Override),
    ("TimerBotAction", Modality::Time, ModalityPolicy::Parallel),
    ("PostureBotAction", Modality::BotPosture, ModalityPolicy::Override),
    ("PositionBotAction", Modality::BotPosition, ModalityPolicy::Override),
    ("ShotCameraAction", Modality::CameraShot, ModalityPolicy::Override),
];

pub fn modality_info(action_name: &str) -> Option<(Modality, ModalityPolicy)> {
    MODALITY_INFO
        .iter()
        .find(|(name, _, _)| *name == action_name)
        .map(|(_, modality, policy)| (*modality, *policy))
}

pub fn new_uid() -> String {
    Uuid::new_v4().to_string()
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// Builds conformant outbound events on behalf of one source
#[derive(Debug, Clone)]
pub struct EventFactory {
    source_uid: String,
}

impl EventFactory {
    pub fn new(source_uid: impl Into<String>) -> Self {
        Self {
            source_uid: source_uid.into(),
        }
    }

    pub fn source_uid(&self) -> &str {
        &self.source_uid
    }

    pub fn new_event(
        &self,
        kind: &str,
        fields: Map<String, Value>,
    ) -> Result<Event, ValidationError> {
        self.new_event_at(kind, fields, Utc::now())
    }

    /// Build and validate an event; caller fields override the generated envelope
    pub fn new_event_at(
        &self,
        kind: &str,
        fields: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<Event, ValidationError> {
        let mut map = Map::new();
        map.insert(FIELD_UID.to_string(), Value::String(new_uid()));
        map.insert(
            FIELD_EVENT_CREATED_AT.to_string(),
            Value::String(format_timestamp(now)),
        );
        map.insert(
            FIELD_SOURCE_UID.to_string(),
            Value::String(self.source_uid.clone()),
        );
        map.extend(fields);
        map.insert(FIELD_TYPE.to_string(), Value::String(kind.to_string()));

        if kind.contains("Action") {
            let parsed = EventKind::parse(kind);
            if let Some((modality, policy)) = parsed.action_name().and_then(modality_info) {
                map.insert(
                    FIELD_MODALITY.to_string(),
                    Value::String(modality.as_str().to_string()),
                );
                map.insert(
                    FIELD_MODALITY_POLICY.to_string(),
                    Value::String(policy.as_str().to_string()),
                );
            }
            if let Some(verb) = parsed.verb() {
                stamp_lifecycle(&mut map, verb, now);
            }
        }

        validate(&map)?;
        Event::from_map(map)
            .map_err(|e| ValidationError::new(format!("Event does not match the wire shape: {e}")))
    }

    pub fn error_event(&self, reason: impl Into<String>) -> Event {
        self.error_event_at(reason, Utc::now())
    }

    /// Protocol Error event; always well-formed
    pub fn error_event_at(&self, reason: impl Into<String>, now: DateTime<Utc>) -> Event {
        let mut payload = Map::new();
        payload.insert(FIELD_REASON.to_string(), Value::String(reason.into()));

        Event {
            kind: EVENT_ERROR.to_string(),
            uid: new_uid(),
            source_uid: self.source_uid.clone(),
            created_at: format_timestamp(now),
            action_uid: None,
            payload,
        }
    }
}

fn stamp_lifecycle(map: &mut Map<String, Value>, verb: &ActionVerb, now: DateTime<Utc>) {
    match verb {
        ActionVerb::Started => {
            map.insert(
                FIELD_ACTION_STARTED_AT.to_string(),
                Value::String(format_timestamp(now)),
            );
        }
        ActionVerb::Start => {
            map.insert(FIELD_ACTION_UID.to_string(), Value::String(new_uid()));
        }
        ActionVerb::Finished => {
            map.insert(
                FIELD_ACTION_FINISHED_AT.to_string(),
                Value::String(format_timestamp(now)),
            );
            if map.get(FIELD_IS_SUCCESS).and_then(Value::as_bool) == Some(true) {
                map.remove(FIELD_FAILURE_REASON);
            }
        }
        ActionVerb::Change | ActionVerb::Stop | ActionVerb::Updated(_) => {}
    }
}
