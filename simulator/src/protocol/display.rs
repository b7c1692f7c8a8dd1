//! One-line event descriptions for logs and the stdout sink

use serde_json::Value;
use shared_types::{Event, FIELD_FAILURE_REASON, FIELD_IS_SUCCESS, FIELD_REASON, FIELD_WAS_STOPPED};

use super::kind::{ActionVerb, EventKind};

/// Payload fields worth quoting, in display order
const QUOTED_FIELDS: &[&str] = &[
    "script",
    "interim_script",
    "final_script",
    "interim_transcript",
    "final_transcript",
    "gesture",
    "facial_gesture",
    "posture",
    "position",
    "shot",
    "effect",
    "title",
    "prompt",
    "intent",
];

const NAMED_FIELDS: &[&str] = &[
    "timer_name",
    "duration",
    "confirmation_status",
    "current_choice",
    "attention_level",
];

fn marker(kind: &EventKind) -> &'static str {
    match kind.verb() {
        Some(ActionVerb::Start) => "▶",
        Some(ActionVerb::Started) => "🚀",
        Some(ActionVerb::Change) => "✎",
        Some(ActionVerb::Stop) => "⏹",
        Some(ActionVerb::Finished) => "🏁",
        Some(ActionVerb::Updated(_)) => "↻",
        None => "•",
    }
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Short human-readable rendering such as `▶ StartGestureBotAction("wave", id=1a2b..)`
pub fn short_description(event: &Event) -> String {
    if event.is_error() {
        return format!(
            "ERROR {}",
            event.str_field(FIELD_REASON).unwrap_or("(no reason)")
        );
    }

    let kind = EventKind::parse(&event.kind);
    let mut params: Vec<String> = Vec::new();

    for name in QUOTED_FIELDS {
        if let Some(value) = event.field(name) {
            params.push(format!("\"{}\"", plain(value)));
        }
    }
    for name in NAMED_FIELDS {
        if let Some(value) = event.field(name) {
            params.push(format!("{name}={}", plain(value)));
        }
    }

    if matches!(kind.verb(), Some(ActionVerb::Finished)) {
        let success = event.bool_field(FIELD_IS_SUCCESS).unwrap_or(false);
        params.push(if success { "\"success\"" } else { "\"failure\"" }.to_string());
        if !success {
            if let Some(reason) = event.field(FIELD_FAILURE_REASON) {
                params.push(format!("reason=\"{}\"", plain(reason)));
            }
        }
        if event.bool_field(FIELD_WAS_STOPPED) == Some(true) {
            params.push("was_stopped=True".to_string());
        }
    }

    if params.is_empty() && matches!(kind, EventKind::Other(_)) {
        params = event
            .payload
            .iter()
            .map(|(key, value)| format!("{key}={}", plain(value)))
            .collect();
    }

    if let Some(action_uid) = &event.action_uid {
        let short: String = action_uid.chars().take(4).collect();
        params.push(format!("id={short}.."));
    }

    format!("{} {}({})", marker(&kind), event.kind, params.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(value: Value) -> Event {
        Event::from_map(value.as_object().cloned().unwrap()).unwrap()
    }

    #[test]
    fn test_start_description() {
        let e = event(json!({
            "type": "StartGestureBotAction",
            "uid": "u1",
            "source_uid": "bot",
            "event_created_at": "2024-01-01T00:00:00Z",
            "action_uid": "abcdef",
            "gesture": "wave"
        }));
        assert_eq!(
            short_description(&e),
            "▶ StartGestureBotAction(\"wave\", id=abcd..)"
        );
    }

    #[test]
    fn test_finished_description() {
        let e = event(json!({
            "type": "PostureBotActionFinished",
            "uid": "u1",
            "source_uid": "bot",
            "event_created_at": "2024-01-01T00:00:00Z",
            "action_uid": "p123456",
            "action_finished_at": "2024-01-01T00:00:01Z",
            "is_success": false,
            "failure_reason": "blocked",
            "was_stopped": true
        }));
        assert_eq!(
            short_description(&e),
            "🏁 PostureBotActionFinished(\"failure\", reason=\"blocked\", was_stopped=True, id=p123..)"
        );
    }

    #[test]
    fn test_other_and_error_descriptions() {
        let e = event(json!({
            "type": "CustomSignal",
            "uid": "u1",
            "source_uid": "bot",
            "event_created_at": "2024-01-01T00:00:00Z",
            "level": 3
        }));
        assert_eq!(short_description(&e), "• CustomSignal(level=3)");

        let err = event(json!({
            "type": "Error",
            "uid": "u2",
            "source_uid": "bot",
            "event_created_at": "2024-01-01T00:00:00Z",
            "reason": "bad things"
        }));
        assert_eq!(short_description(&err), "ERROR bad things");
    }
}
