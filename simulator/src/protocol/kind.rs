//! Tagged event kinds
//!
//! Wire kinds are plain strings such as `StartGestureBotAction` or
//! `VisualChoiceSceneActionChoiceUpdated`. They are parsed once into an
//! [`EventKind`] by prefix/suffix around the action name, so overlapping
//! substrings ("Start" inside "Started", "GestureBotAction" inside
//! "FacialGestureBotAction") can never select the wrong verb or action.

use crate::actions::fsm::Trigger;

const ACTION_SUFFIX: &str = "Action";
const UPDATED_SUFFIX: &str = "Updated";

/// Lifecycle verb carried by an action event
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionVerb {
    Start,
    Started,
    Change,
    Stop,
    Finished,
    /// `<ActionName><detail>Updated`, e.g. detail "ScriptUpdated" -> "Script"
    Updated(String),
}

impl ActionVerb {
    /// Trigger delivered to a handler for this verb, if any
    pub fn trigger(&self) -> Option<Trigger> {
        match self {
            Self::Start => Some(Trigger::Start),
            Self::Started => Some(Trigger::Started),
            Self::Change => Some(Trigger::Change),
            Self::Stop => Some(Trigger::Stop),
            Self::Finished => Some(Trigger::Finished),
            Self::Updated(_) => None,
        }
    }

    /// Verbs that may bring a new handler into existence
    pub fn creates_handler(&self) -> bool {
        matches!(self, Self::Start | Self::Started)
    }
}

/// Parsed wire kind
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Action { action_name: String, verb: ActionVerb },
    Other(String),
}

impl EventKind {
    pub fn parse(kind: &str) -> Self {
        const PREFIXES: [(&str, ActionVerb); 3] = [
            ("Start", ActionVerb::Start),
            ("Change", ActionVerb::Change),
            ("Stop", ActionVerb::Stop),
        ];
        const SUFFIXES: [(&str, ActionVerb); 2] = [
            ("Started", ActionVerb::Started),
            ("Finished", ActionVerb::Finished),
        ];

        for (prefix, verb) in PREFIXES {
            if let Some(name) = kind.strip_prefix(prefix) {
                if is_action_name(name) {
                    return Self::action(name, verb);
                }
            }
        }

        for (suffix, verb) in SUFFIXES {
            if let Some(name) = kind.strip_suffix(suffix) {
                if is_action_name(name) {
                    return Self::action(name, verb);
                }
            }
        }

        if let Some(detail) = kind.strip_suffix(UPDATED_SUFFIX) {
            if let Some(index) = detail.find(ACTION_SUFFIX) {
                let split = index + ACTION_SUFFIX.len();
                let name = &detail[..split];
                if is_action_name(name) {
                    return Self::action(name, ActionVerb::Updated(detail[split..].to_string()));
                }
            }
        }

        Self::Other(kind.to_string())
    }

    fn action(name: &str, verb: ActionVerb) -> Self {
        Self::Action {
            action_name: name.to_string(),
            verb,
        }
    }

    pub fn action_name(&self) -> Option<&str> {
        match self {
            Self::Action { action_name, .. } => Some(action_name),
            Self::Other(_) => None,
        }
    }

    pub fn verb(&self) -> Option<&ActionVerb> {
        match self {
            Self::Action { verb, .. } => Some(verb),
            Self::Other(_) => None,
        }
    }

    pub fn trigger(&self) -> Option<Trigger> {
        self.verb().and_then(ActionVerb::trigger)
    }
}

/// `UtteranceBotAction`, `ShotCameraAction`, ... - capitalized and ending in "Action"
fn is_action_name(name: &str) -> bool {
    name.len() > ACTION_SUFFIX.len()
        && name.ends_with(ACTION_SUFFIX)
        && name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
        && name.chars().all(|c| c.is_ascii_alphanumeric())
}
