//! Action type registration table
//!
//! Each [`ActionSpec`] describes one action type: which wire triggers it
//! accepts, how it is arbitrated against actions of the same modality, how
//! it renders, and when it completes on its own.

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use shared_types::{Modality, FIELD_EVENT_CREATED_AT};
use std::fmt;

use super::effects::{self, ActionEffects, ActionSettings, EffectContext};
use super::error::ActionError;
use super::fsm::{ActionHandler, Trigger, TriggerInput};

/// How concurrent actions of one modality interact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arbitration {
    None,
    /// Newest action is in effect, older ones wait in the family's stack
    OverrideStack(Modality),
    Replace,
    Parallel,
}

/// When an action completes without being stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Never,
    /// Fixed playback time
    Motion,
    /// Script length times the per-character speaking time
    Utterance,
    /// Payload `duration` seconds, measured from the start event
    Timer,
}

impl Completion {
    pub fn target(&self, handler: &ActionHandler, settings: &ActionSettings) -> Option<Duration> {
        match self {
            Self::Never => None,
            Self::Motion => Some(settings.motion_duration),
            Self::Utterance => {
                let chars = handler.str_field("script").unwrap_or_default().chars().count();
                Some(settings.utterance_char_interval * i32::try_from(chars).unwrap_or(i32::MAX))
            }
            Self::Timer => handler
                .field("duration")
                .and_then(Value::as_f64)
                .map(|seconds| Duration::milliseconds((seconds.max(0.0) * 1000.0) as i64)),
        }
    }

    /// Timers count from their start event's creation time, everything else from now
    pub fn origin(&self, handler: &ActionHandler, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Timer => handler
                .str_field(FIELD_EVENT_CREATED_AT)
                .and_then(|at| DateTime::parse_from_rfc3339(at).ok())
                .map(|at| at.with_timezone(&Utc))
                .unwrap_or(now),
            _ => now,
        }
    }
}

pub type DisplayFn = fn(&ActionHandler) -> String;
pub type ProgressFn = fn(&ActionHandler, Duration, Duration) -> Option<String>;
pub type FinishedFieldsFn = fn(&ActionHandler) -> Map<String, Value>;

pub struct ActionSpec {
    pub action_name: &'static str,
    /// Render slot, and stack key for stack-arbitrated types
    pub family: Modality,
    pub arbitration: Arbitration,
    /// Wire-derived triggers this type reacts to; internal triggers always apply
    pub accepts: &'static [Trigger],
    pub effects: ActionEffects,
    pub completion: Completion,
    pub display: DisplayFn,
    pub progress: ProgressFn,
    pub finished_fields: FinishedFieldsFn,
    /// Shown when the family's stack empties; `None` clears the slot
    pub idle_display: Option<&'static str>,
}

impl ActionSpec {
    pub fn accepts(&self, trigger: Trigger) -> bool {
        trigger.is_internal() || self.accepts.contains(&trigger)
    }

    pub fn stack_family(&self) -> Option<Modality> {
        match self.arbitration {
            Arbitration::OverrideStack(family) => Some(family),
            _ => None,
        }
    }
}

impl fmt::Debug for ActionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionSpec")
            .field("action_name", &self.action_name)
            .field("family", &self.family)
            .field("arbitration", &self.arbitration)
            .field("completion", &self.completion)
            .finish()
    }
}

// ============================================================================
// Trigger Sets
// ============================================================================

const LIFECYCLE: &[Trigger] = &[
    Trigger::Start,
    Trigger::Started,
    Trigger::Stop,
    Trigger::Finished,
];

const LIFECYCLE_WITH_CHANGE: &[Trigger] = &[
    Trigger::Start,
    Trigger::Started,
    Trigger::Change,
    Trigger::Stop,
    Trigger::Finished,
];

const OBSERVED_ONLY: &[Trigger] = &[Trigger::Started, Trigger::Finished];

// ============================================================================
// Registered Action Types
// ============================================================================

pub static ACTION_SPECS: &[ActionSpec] = &[
    ActionSpec {
        action_name: "GestureBotAction",
        family: Modality::BotGesture,
        arbitration: Arbitration::OverrideStack(Modality::BotGesture),
        accepts: LIFECYCLE,
        effects: ActionEffects::BASE,
        completion: Completion::Motion,
        display: gesture_display,
        progress: no_progress,
        finished_fields: no_fields,
        idle_display: Some("Gesture: idle"),
    },
    ActionSpec {
        action_name: "FacialGestureBotAction",
        family: Modality::BotFace,
        arbitration: Arbitration::None,
        accepts: LIFECYCLE,
        effects: ActionEffects::BASE,
        completion: Completion::Motion,
        display: facial_gesture_display,
        progress: no_progress,
        finished_fields: no_fields,
        idle_display: None,
    },
    ActionSpec {
        action_name: "MotionEffectCameraAction",
        family: Modality::CameraMotionEffect,
        arbitration: Arbitration::None,
        accepts: LIFECYCLE,
        effects: ActionEffects::BASE,
        completion: Completion::Motion,
        display: motion_effect_display,
        progress: no_progress,
        finished_fields: no_fields,
        idle_display: None,
    },
    ActionSpec {
        action_name: "PostureBotAction",
        family: Modality::BotPosture,
        arbitration: Arbitration::OverrideStack(Modality::BotPosture),
        accepts: LIFECYCLE,
        effects: ActionEffects::BASE,
        completion: Completion::Never,
        display: posture_display,
        progress: no_progress,
        finished_fields: no_fields,
        idle_display: Some("Posture: idle"),
    },
    ActionSpec {
        action_name: "PositionBotAction",
        family: Modality::BotPosition,
        arbitration: Arbitration::OverrideStack(Modality::BotPosition),
        accepts: LIFECYCLE,
        effects: ActionEffects::BASE,
        completion: Completion::Never,
        display: position_display,
        progress: no_progress,
        finished_fields: no_fields,
        idle_display: None,
    },
    ActionSpec {
        action_name: "ShotCameraAction",
        family: Modality::CameraShot,
        arbitration: Arbitration::OverrideStack(Modality::CameraShot),
        accepts: LIFECYCLE,
        effects: ActionEffects::BASE,
        completion: Completion::Never,
        display: shot_display,
        progress: no_progress,
        finished_fields: no_fields,
        idle_display: None,
    },
    ActionSpec {
        action_name: "UtteranceBotAction",
        family: Modality::BotSpeech,
        arbitration: Arbitration::Replace,
        accepts: LIFECYCLE,
        effects: ActionEffects {
            on_start: start_utterance,
            ..ActionEffects::BASE
        },
        completion: Completion::Utterance,
        display: utterance_display,
        progress: utterance_progress,
        finished_fields: utterance_finished_fields,
        idle_display: None,
    },
    ActionSpec {
        action_name: "TimerBotAction",
        family: Modality::Time,
        arbitration: Arbitration::Parallel,
        accepts: LIFECYCLE_WITH_CHANGE,
        effects: ActionEffects {
            on_change: change_timer,
            ..ActionEffects::BASE
        },
        completion: Completion::Timer,
        display: timer_display,
        progress: timer_progress,
        finished_fields: no_fields,
        idle_display: None,
    },
    ActionSpec {
        action_name: "PresenceUserAction",
        family: Modality::UserPresence,
        arbitration: Arbitration::None,
        accepts: OBSERVED_ONLY,
        effects: ActionEffects::BASE,
        completion: Completion::Never,
        display: presence_display,
        progress: no_progress,
        finished_fields: no_fields,
        idle_display: None,
    },
    ActionSpec {
        action_name: "VisualInformationSceneAction",
        family: Modality::Information,
        arbitration: Arbitration::OverrideStack(Modality::Information),
        accepts: LIFECYCLE,
        effects: ActionEffects::BASE,
        completion: Completion::Never,
        display: information_scene_display,
        progress: no_progress,
        finished_fields: no_fields,
        idle_display: None,
    },
    ActionSpec {
        action_name: "VisualChoiceSceneAction",
        family: Modality::Information,
        arbitration: Arbitration::OverrideStack(Modality::Information),
        accepts: LIFECYCLE,
        effects: ActionEffects::BASE,
        completion: Completion::Never,
        display: choice_scene_display,
        progress: no_progress,
        finished_fields: no_fields,
        idle_display: None,
    },
    ActionSpec {
        action_name: "VisualFormSceneAction",
        family: Modality::Information,
        arbitration: Arbitration::OverrideStack(Modality::Information),
        accepts: LIFECYCLE,
        effects: ActionEffects::BASE,
        completion: Completion::Never,
        display: form_scene_display,
        progress: no_progress,
        finished_fields: no_fields,
        idle_display: None,
    },
];

pub fn lookup(action_name: &str) -> Option<&'static ActionSpec> {
    ACTION_SPECS
        .iter()
        .find(|spec| spec.action_name == action_name)
}

// ============================================================================
// Type-specific Effects
// ============================================================================

/// While executing, speech starts empty and is revealed by ticks
fn start_utterance(
    handler: &mut ActionHandler,
    ctx: &mut EffectContext<'_>,
    _input: &TriggerInput<'_>,
) -> Result<(), ActionError> {
    effects::announce_started(handler, ctx)?;
    handler.start_clock(ctx.now, ctx.settings);
    let text = if ctx.is_active() {
        String::new()
    } else {
        utterance_display(handler)
    };
    ctx.render.show(handler.family(), &text);
    Ok(())
}

fn change_timer(
    handler: &mut ActionHandler,
    ctx: &mut EffectContext<'_>,
    _input: &TriggerInput<'_>,
) -> Result<(), ActionError> {
    handler.retarget_clock(ctx.now, ctx.settings);
    effects::render_display(handler, ctx);
    Ok(())
}

// ============================================================================
// Display
// ============================================================================

fn text_or_unknown<'a>(handler: &'a ActionHandler, name: &str) -> &'a str {
    handler.str_field(name).unwrap_or("unknown")
}

fn gesture_display(handler: &ActionHandler) -> String {
    format!("Gesture: {}", text_or_unknown(handler, "gesture"))
}

fn facial_gesture_display(handler: &ActionHandler) -> String {
    format!("Face: {}", text_or_unknown(handler, "facial_gesture"))
}

fn motion_effect_display(handler: &ActionHandler) -> String {
    format!("Camera Effect: {}", text_or_unknown(handler, "effect"))
}

fn posture_display(handler: &ActionHandler) -> String {
    format!("Posture: {}", text_or_unknown(handler, "posture"))
}

fn position_display(handler: &ActionHandler) -> String {
    format!("Position: {}", text_or_unknown(handler, "position"))
}

fn shot_display(handler: &ActionHandler) -> String {
    format!(
        "Shot: {} Transition: {}",
        text_or_unknown(handler, "shot"),
        text_or_unknown(handler, "start_transition")
    )
}

fn utterance_display(handler: &ActionHandler) -> String {
    text_or_unknown(handler, "script").to_string()
}

fn timer_display(handler: &ActionHandler) -> String {
    match handler.field("duration").and_then(Value::as_f64) {
        Some(seconds) => format!("Timer: {seconds:.1} sec"),
        None => "Timer: unknown".to_string(),
    }
}

fn presence_display(_handler: &ActionHandler) -> String {
    "User present.".to_string()
}

fn support_prompts(handler: &ActionHandler) -> String {
    let prompts: Vec<&str> = handler
        .field("support_prompts")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    if prompts.is_empty() {
        "None".to_string()
    } else {
        prompts.join(" | ")
    }
}

fn entries<'a>(handler: &'a ActionHandler, name: &str) -> &'a [Value] {
    handler
        .field(name)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn entry_str<'a>(entry: &'a Value, name: &str) -> &'a str {
    entry.get(name).and_then(Value::as_str).unwrap_or_default()
}

fn information_scene_display(handler: &ActionHandler) -> String {
    let mut lines = vec![
        format!("# {}", text_or_unknown(handler, "title")),
        format!("Hints: {}", support_prompts(handler)),
        "Content:".to_string(),
    ];
    for item in entries(handler, "content") {
        let mut line = "-".to_string();
        let text = entry_str(item, "text");
        if !text.is_empty() {
            line.push(' ');
            line.push_str(text);
        }
        let image = entry_str(item, "image");
        if !image.is_empty() {
            line.push_str(&format!(" [{image}]"));
        }
        lines.push(line);
    }
    lines.join("\n")
}

fn choice_scene_display(handler: &ActionHandler) -> String {
    let mut lines = vec![
        format!("# {}", text_or_unknown(handler, "prompt")),
        format!("Hints: {}", support_prompts(handler)),
    ];
    for option in entries(handler, "options") {
        let mut line = format!("- {}", entry_str(option, "text"));
        let image = entry_str(option, "image");
        if !image.is_empty() {
            line.push_str(&format!(" [{image}]"));
        }
        line.push_str(&format!(" ({})", entry_str(option, "id")));
        lines.push(line);
    }
    lines.join("\n")
}

fn form_scene_display(handler: &ActionHandler) -> String {
    let mut lines = vec![
        format!("# {}", text_or_unknown(handler, "prompt")),
        format!("Hints: {}", support_prompts(handler)),
    ];
    for input in entries(handler, "inputs") {
        lines.push(format!(
            "- {}: {} (value: {})",
            entry_str(input, "id"),
            entry_str(input, "description"),
            entry_str(input, "value")
        ));
    }
    lines.join("\n")
}

// ============================================================================
// Progress & Final Payloads
// ============================================================================

fn no_progress(_handler: &ActionHandler, _elapsed: Duration, _target: Duration) -> Option<String> {
    None
}

/// The part of the script spoken so far
fn utterance_progress(handler: &ActionHandler, elapsed: Duration, target: Duration) -> Option<String> {
    let script = handler.str_field("script").unwrap_or_default();
    let total = script.chars().count() as i64;
    let target_ms = target.num_milliseconds().max(1);
    let spoken = (total * elapsed.num_milliseconds() / target_ms).clamp(0, total);
    Some(script.chars().take(spoken as usize).collect())
}

fn timer_progress(_handler: &ActionHandler, elapsed: Duration, target: Duration) -> Option<String> {
    let remaining = (target - elapsed).num_milliseconds() as f64 / 1000.0;
    Some(format!("Timer: {remaining:.2} sec"))
}

fn no_fields(_handler: &ActionHandler) -> Map<String, Value> {
    Map::new()
}

fn utterance_finished_fields(handler: &ActionHandler) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert(
        "final_script".to_string(),
        Value::String(handler.str_field("script").unwrap_or_default().to_string()),
    );
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::EventFactory;
    use crate::render::RecordingRenderSink;
    use serde_json::json;
    use shared_types::Event;

    fn handler_with(action_name: &str, kind: &str, payload: Value) -> ActionHandler {
        let mut map = json!({
            "type": kind,
            "uid": "e1",
            "source_uid": "bot",
            "event_created_at": "2024-01-01T00:00:00Z",
            "action_uid": "a1"
        })
        .as_object()
        .cloned()
        .unwrap();
        map.extend(payload.as_object().cloned().unwrap());
        let event = Event::from_map(map).unwrap();

        let settings = ActionSettings {
            mode: effects::ExecutionMode::Passive,
            ..ActionSettings::default()
        };
        let factory = EventFactory::new("test");
        let mut render = RecordingRenderSink::new();
        let mut outbox = Vec::new();
        let mut ctx = EffectContext::new(Utc::now(), &settings, &factory, &mut render, &mut outbox);

        let mut handler = ActionHandler::new(lookup(action_name).unwrap(), "a1");
        handler
            .fire(Trigger::Start, &TriggerInput::Event(&event), &mut ctx)
            .unwrap();
        handler
    }

    #[test]
    fn test_catalog_is_complete() {
        assert_eq!(ACTION_SPECS.len(), 12);
        for spec in ACTION_SPECS {
            assert_eq!(lookup(spec.action_name).unwrap().action_name, spec.action_name);
        }
        assert!(lookup("UtteranceUserAction").is_none());
    }

    #[test]
    fn test_visual_scenes_share_one_stack() {
        let families: Vec<_> = [
            "VisualInformationSceneAction",
            "VisualChoiceSceneAction",
            "VisualFormSceneAction",
        ]
        .iter()
        .map(|name| lookup(name).unwrap().stack_family())
        .collect();
        assert!(families.iter().all(|f| *f == Some(Modality::Information)));
        assert_eq!(lookup("TimerBotAction").unwrap().stack_family(), None);
    }

    #[test]
    fn test_accepted_triggers() {
        let presence = lookup("PresenceUserAction").unwrap();
        assert!(!presence.accepts(Trigger::Start));
        assert!(presence.accepts(Trigger::Started));
        assert!(presence.accepts(Trigger::Tick));

        assert!(lookup("TimerBotAction").unwrap().accepts(Trigger::Change));
        assert!(!lookup("GestureBotAction").unwrap().accepts(Trigger::Change));
    }

    #[test]
    fn test_completion_targets() {
        let settings = ActionSettings::default();

        let utterance = handler_with(
            "UtteranceBotAction",
            "StartUtteranceBotAction",
            json!({"script": "Hello"}),
        );
        assert_eq!(
            Completion::Utterance.target(&utterance, &settings),
            Some(Duration::milliseconds(125))
        );

        let timer = handler_with(
            "TimerBotAction",
            "StartTimerBotAction",
            json!({"duration": 1.5, "timer_name": "t"}),
        );
        assert_eq!(
            Completion::Timer.target(&timer, &settings),
            Some(Duration::milliseconds(1500))
        );
        assert_eq!(
            Completion::Timer.origin(&timer, Utc::now()).to_rfc3339(),
            "2024-01-01T00:00:00+00:00"
        );

        let posture = handler_with(
            "PostureBotAction",
            "StartPostureBotAction",
            json!({"posture": "listening"}),
        );
        assert_eq!(Completion::Never.target(&posture, &settings), None);
    }

    #[test]
    fn test_utterance_progress_reveals_prefix() {
        let utterance = handler_with(
            "UtteranceBotAction",
            "StartUtteranceBotAction",
            json!({"script": "Hello there"}),
        );
        let target = Duration::milliseconds(1100);
        assert_eq!(
            utterance_progress(&utterance, Duration::milliseconds(500), target).as_deref(),
            Some("Hello")
        );
        assert_eq!(
            utterance_progress(&utterance, Duration::zero(), target).as_deref(),
            Some("")
        );
    }

    #[test]
    fn test_scene_displays() {
        let choice = handler_with(
            "VisualChoiceSceneAction",
            "StartVisualChoiceSceneAction",
            json!({
                "prompt": "Pick a drink",
                "support_prompts": ["say the name"],
                "options": [
                    {"id": "c", "text": "Coffee", "image": "coffee.png"},
                    {"id": "t", "text": "Tea"}
                ]
            }),
        );
        assert_eq!(
            choice_scene_display(&choice),
            "# Pick a drink\nHints: say the name\n- Coffee [coffee.png] (c)\n- Tea (t)"
        );

        let info = handler_with(
            "VisualInformationSceneAction",
            "StartVisualInformationSceneAction",
            json!({"title": "Menu", "content": [{"text": "Burger"}, {"image": "fries.png"}]}),
        );
        assert_eq!(
            information_scene_display(&info),
            "# Menu\nHints: None\nContent:\n- Burger\n- [fries.png]"
        );

        let shot = handler_with(
            "ShotCameraAction",
            "StartShotCameraAction",
            json!({"shot": "medium"}),
        );
        assert_eq!(shot_display(&shot), "Shot: medium Transition: unknown");
    }

    #[test]
    fn test_utterance_finished_payload() {
        let utterance = handler_with(
            "UtteranceBotAction",
            "StartUtteranceBotAction",
            json!({"script": "Bye"}),
        );
        assert_eq!(
            utterance_finished_fields(&utterance).get("final_script"),
            Some(&json!("Bye"))
        );
    }
}
