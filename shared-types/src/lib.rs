//! Shared types between the orchestrator core and its collaborators
//!
//! These types are used by both:
//! - the simulator core (dispatcher, state machines, override stacks)
//! - transports, render sinks and reporting call paths (read-only)
//!
//! Serializable with serde for JSON over the event transport

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Event System
// ============================================================================

/// Wire event - one record on the event stream
///
/// The envelope fields are lifted out of the JSON object; every other field
/// (including derived outbound fields such as `action_started_at`) stays in
/// `payload` and is flattened back on serialization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Event kind tag (e.g., "StartGestureBotAction")
    #[serde(rename = "type")]
    pub kind: String,

    /// Unique event ID (UUID)
    pub uid: String,

    /// Which component produced this event
    pub source_uid: String,

    /// When the event was created (ISO 8601)
    #[serde(rename = "event_created_at")]
    pub created_at: String,

    /// Action instance the event refers to, for action events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_uid: Option<String>,

    /// Type-specific payload
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Event {
    /// Build an event from a wire object
    pub fn from_map(map: Map<String, Value>) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(map))
    }

    /// Flatten the event back into its wire object
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(FIELD_TYPE.to_string(), Value::String(self.kind.clone()));
        map.insert(FIELD_UID.to_string(), Value::String(self.uid.clone()));
        map.insert(
            FIELD_SOURCE_UID.to_string(),
            Value::String(self.source_uid.clone()),
        );
        map.insert(
            FIELD_EVENT_CREATED_AT.to_string(),
            Value::String(self.created_at.clone()),
        );
        if let Some(action_uid) = &self.action_uid {
            map.insert(
                FIELD_ACTION_UID.to_string(),
                Value::String(action_uid.clone()),
            );
        }
        for (key, value) in &self.payload {
            map.entry(key.clone()).or_insert_with(|| value.clone());
        }
        map
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.payload.get(name).and_then(Value::as_str)
    }

    pub fn bool_field(&self, name: &str) -> Option<bool> {
        self.payload.get(name).and_then(Value::as_bool)
    }

    pub fn is_error(&self) -> bool {
        self.kind == EVENT_ERROR
    }
}

// ============================================================================
// Action State
// ============================================================================

/// Lifecycle state of one action instance
///
/// `Init → Running → {Background ⇄ Running}* → Finished`; Finished is absorbing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    Init,
    Running,
    Background,
    Finished,
}

impl ActionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Running => "running",
            Self::Background => "background",
            Self::Finished => "finished",
        }
    }

    pub fn is_live(&self) -> bool {
        !matches!(self, Self::Finished)
    }
}

impl fmt::Display for ActionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Modalities
// ============================================================================

/// Output/input modality of an action
///
/// Doubles as the action family key for override stacks and as the render
/// slot a sink shows the action's representation in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    BotSpeech,
    UserSpeech,
    BotGesture,
    BotFace,
    BotPosture,
    BotPosition,
    CameraShot,
    CameraMotionEffect,
    Information,
    Time,
    UserPresence,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BotSpeech => "bot_speech",
            Self::UserSpeech => "user_speech",
            Self::BotGesture => "bot_gesture",
            Self::BotFace => "bot_face",
            Self::BotPosture => "bot_posture",
            Self::BotPosition => "bot_position",
            Self::CameraShot => "camera_shot",
            Self::CameraMotionEffect => "camera_motion_effect",
            Self::Information => "information",
            Self::Time => "time",
            Self::UserPresence => "user_presence",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How concurrent actions of one modality interact, as stamped on the wire
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ModalityPolicy {
    Override,
    Replace,
    Parallel,
}

impl ModalityPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Override => "override",
            Self::Replace => "replace",
            Self::Parallel => "parallel",
        }
    }
}

impl fmt::Display for ModalityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Read-only Projections
// ============================================================================

/// One live action as seen by reporting call paths
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionSnapshot {
    pub action_uid: String,
    pub action_name: String,
    pub state: ActionState,
    pub was_stopped: bool,
    pub task_done: bool,
}

/// Override stack of one family, bottom first
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackSnapshot {
    pub family: Modality,
    pub members: Vec<String>,
}

/// Complete view of the orchestrator bookkeeping between two passes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct OrchestratorSnapshot {
    /// Live actions in creation order
    pub actions: Vec<ActionSnapshot>,
    pub stacks: Vec<StackSnapshot>,
    /// action_name -> action uids in start order
    pub latest: BTreeMap<String, Vec<String>>,
}

impl OrchestratorSnapshot {
    pub fn action(&self, action_uid: &str) -> Option<&ActionSnapshot> {
        self.actions.iter().find(|a| a.action_uid == action_uid)
    }

    pub fn stack(&self, family: Modality) -> &[String] {
        self.stacks
            .iter()
            .find(|s| s.family == family)
            .map(|s| s.members.as_slice())
            .unwrap_or(&[])
    }
}

// ============================================================================
// Protocol Constants
// ============================================================================

pub const EVENT_ERROR: &str = "Error";
pub const EVENT_PIPELINE_ACQUIRED: &str = "PipelineAcquired";
pub const EVENT_PIPELINE_RELEASED: &str = "PipelineReleased";

/// Sentinel `action_uid` resolved to the most recent live action of a family
pub const LATEST_ACTION_UID: &str = "LATEST";

pub const SYSTEM_EVENTS_STREAM: &str = "ace_agent_system_events";
pub const EVENT_CHANNEL_PREFIX: &str = "umim_events_";

pub const FIELD_TYPE: &str = "type";
pub const FIELD_UID: &str = "uid";
pub const FIELD_SOURCE_UID: &str = "source_uid";
pub const FIELD_EVENT_CREATED_AT: &str = "event_created_at";
pub const FIELD_LEGACY_CREATED_AT: &str = "created_at";
pub const FIELD_ACTION_UID: &str = "action_uid";
pub const FIELD_ACTION_STARTED_AT: &str = "action_started_at";
pub const FIELD_ACTION_FINISHED_AT: &str = "action_finished_at";
pub const FIELD_IS_SUCCESS: &str = "is_success";
pub const FIELD_WAS_STOPPED: &str = "was_stopped";
pub const FIELD_FAILURE_REASON: &str = "failure_reason";
pub const FIELD_REASON: &str = "reason";
pub const FIELD_MODALITY: &str = "action_info_modality";
pub const FIELD_MODALITY_POLICY: &str = "action_info_modality_policy";

// ============================================================================
// Tests
// ============================================================================
