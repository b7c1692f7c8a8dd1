//! OrchestratorActor against the in-memory transport

use ractor::{Actor, ActorRef};
use serde_json::{json, Map, Value};
use shared_types::{ActionState, Event, Modality, OrchestratorSnapshot};
use simulator::actions::ActionError;
use simulator::actors::{OrchestratorActor, OrchestratorArguments, OrchestratorMsg};
use simulator::config::SimulatorConfig;
use simulator::render::RecordingRenderSink;
use simulator::transport::MemoryTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const CHANNEL: &str = "umim_events_test-stream";

fn test_config() -> SimulatorConfig {
    SimulatorConfig {
        stream_id: "test-stream".to_string(),
        // Ticks are driven explicitly by the tests
        tick_interval_ms: 3_600_000,
        receive_timeout_ms: 20,
        motion_duration_ms: 0,
        ..SimulatorConfig::default()
    }
}

async fn spawn_orchestrator(
    transport: Arc<MemoryTransport>,
    config: SimulatorConfig,
) -> (ActorRef<OrchestratorMsg>, JoinHandle<()>, RecordingRenderSink) {
    let render = RecordingRenderSink::new();
    let (actor, handle) = Actor::spawn(
        None,
        OrchestratorActor,
        OrchestratorArguments {
            transport,
            render: Box::new(render.clone()),
            config,
        },
    )
    .await
    .unwrap();
    (actor, handle, render)
}

fn wire(value: Value) -> String {
    let mut map = json!({
        "uid": uuid::Uuid::new_v4().to_string(),
        "source_uid": "bot",
        "event_created_at": chrono::Utc::now().to_rfc3339(),
    })
    .as_object()
    .cloned()
    .unwrap();
    map.extend(value.as_object().cloned().unwrap());
    Value::Object(map).to_string()
}

async fn snapshot(actor: &ActorRef<OrchestratorMsg>) -> OrchestratorSnapshot {
    ractor::call!(actor, |reply| OrchestratorMsg::GetSnapshot { reply }).unwrap()
}

async fn history(actor: &ActorRef<OrchestratorMsg>) -> Vec<Value> {
    ractor::call!(actor, |reply| OrchestratorMsg::GetHistory { reply }).unwrap()
}

async fn wait_for_sent(transport: &MemoryTransport, kind: &str) -> Vec<Event> {
    for _ in 0..100 {
        let sent: Vec<Event> = transport
            .sent_on(CHANNEL)
            .await
            .into_iter()
            .filter(|e| e.kind == kind)
            .collect();
        if !sent.is_empty() {
            return sent;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("no {kind} event was sent");
}

async fn shutdown(actor: ActorRef<OrchestratorMsg>, handle: JoinHandle<()>) {
    actor.stop(None);
    handle.await.unwrap();
}

#[tokio::test]
async fn test_received_start_is_announced_and_rendered() {
    let transport = Arc::new(MemoryTransport::new());
    let (actor, handle, render) = spawn_orchestrator(transport.clone(), test_config()).await;

    transport
        .push_raw(wire(json!({
            "type": "StartPostureBotAction",
            "action_uid": "p1",
            "posture": "listening"
        })))
        .await;

    let started = wait_for_sent(&transport, "PostureBotActionStarted").await;
    assert_eq!(started[0].action_uid.as_deref(), Some("p1"));
    assert_eq!(started[0].source_uid, "umim_tui_app");
    assert_eq!(started[0].str_field("action_info_modality"), Some("bot_posture"));

    let snap = snapshot(&actor).await;
    assert_eq!(snap.action("p1").map(|a| a.state), Some(ActionState::Running));
    assert_eq!(snap.stack(Modality::BotPosture), ["p1".to_string()]);
    assert_eq!(
        render.current(Modality::BotPosture).as_deref(),
        Some("Posture: listening")
    );

    let recorded = history(&actor).await;
    assert_eq!(recorded.len(), 2);
    assert_eq!(recorded[0]["type"], "StartPostureBotAction");
    assert_eq!(recorded[1]["type"], "PostureBotActionStarted");

    shutdown(actor, handle).await;
}

#[tokio::test]
async fn test_invalid_event_is_rejected_with_error() {
    let transport = Arc::new(MemoryTransport::new());
    let (actor, handle, _render) = spawn_orchestrator(transport.clone(), test_config()).await;

    let raw = json!({
        "type": "StartGestureBotAction",
        "source_uid": "bot",
        "event_created_at": "2024-01-01T00:00:00+00:00",
        "action_uid": "g1",
        "gesture": "wave"
    })
    .to_string();
    actor
        .cast(OrchestratorMsg::Inbound {
            batch: vec![raw, "{not json".to_string()],
        })
        .unwrap();

    let snap = snapshot(&actor).await;
    assert!(snap.actions.is_empty());

    let sent = transport.sent_on(CHANNEL).await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].is_error());
    assert!(sent[0]
        .str_field("reason")
        .is_some_and(|reason| reason.starts_with("ValidationError:")));

    // The rejected payload is kept as received, followed by its rejection
    let recorded = history(&actor).await;
    assert_eq!(recorded.len(), 2);
    assert_eq!(recorded[0]["type"], "StartGestureBotAction");
    assert_eq!(recorded[0]["action_uid"], "g1");
    assert!(recorded[0].get("uid").is_none());
    assert_eq!(recorded[1]["type"], "Error");

    shutdown(actor, handle).await;
}

#[tokio::test]
async fn test_tick_completes_motion_action() {
    let transport = Arc::new(MemoryTransport::new());
    let (actor, handle, render) = spawn_orchestrator(transport.clone(), test_config()).await;

    actor
        .cast(OrchestratorMsg::Inbound {
            batch: vec![wire(json!({
                "type": "StartGestureBotAction",
                "action_uid": "g1",
                "gesture": "wave"
            }))],
        })
        .unwrap();
    actor.cast(OrchestratorMsg::Tick).unwrap();

    let snap = snapshot(&actor).await;
    assert!(snap.actions.is_empty());
    assert!(snap.latest.is_empty());

    let finished: Vec<Event> = transport
        .sent_on(CHANNEL)
        .await
        .into_iter()
        .filter(|e| e.kind == "GestureBotActionFinished")
        .collect();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].bool_field("is_success"), Some(true));
    assert_eq!(finished[0].bool_field("was_stopped"), Some(false));
    assert_eq!(
        render.current(Modality::BotGesture).as_deref(),
        Some("Gesture: idle")
    );

    shutdown(actor, handle).await;
}

#[tokio::test]
async fn test_latest_without_running_action_is_not_sent() {
    let transport = Arc::new(MemoryTransport::new());
    let (actor, handle, _render) = spawn_orchestrator(transport.clone(), test_config()).await;

    let mut fields = Map::new();
    fields.insert("action_uid".to_string(), json!("LATEST"));
    let result = ractor::call!(actor, |reply| OrchestratorMsg::Submit {
        kind: "StopGestureBotAction".to_string(),
        fields,
        reply,
    })
    .unwrap();

    assert!(matches!(result, Err(ActionError::LatestResolution { .. })));
    assert!(transport.sent().await.is_empty());

    let recorded = history(&actor).await;
    assert_eq!(recorded.len(), 1);
    assert_eq!(
        recorded[0]["reason"],
        "LATEST used but no running GestureBotAction"
    );

    shutdown(actor, handle).await;
}

#[tokio::test]
async fn test_latest_stop_round_trips_through_loopback() {
    let transport = Arc::new(MemoryTransport::with_loopback(CHANNEL));
    let (actor, handle, render) = spawn_orchestrator(transport.clone(), test_config()).await;

    for (uid, posture) in [("p1", "listening"), ("p2", "talking")] {
        actor
            .cast(OrchestratorMsg::Inbound {
                batch: vec![wire(json!({
                    "type": "StartPostureBotAction",
                    "action_uid": uid,
                    "posture": posture
                }))],
            })
            .unwrap();
    }

    let resolved = ractor::call!(actor, |reply| OrchestratorMsg::ResolveLatest {
        action_name: "PostureBotAction".to_string(),
        reply,
    })
    .unwrap();
    assert_eq!(resolved.as_deref(), Some("p2"));

    let mut fields = Map::new();
    fields.insert("action_uid".to_string(), json!("LATEST"));
    let stop = ractor::call!(actor, |reply| OrchestratorMsg::Submit {
        kind: "StopPostureBotAction".to_string(),
        fields,
        reply,
    })
    .unwrap()
    .unwrap();
    assert_eq!(stop.action_uid.as_deref(), Some("p2"));

    let finished = wait_for_sent(&transport, "PostureBotActionFinished").await;
    assert_eq!(finished[0].action_uid.as_deref(), Some("p2"));
    assert_eq!(finished[0].bool_field("was_stopped"), Some(true));

    let snap = snapshot(&actor).await;
    assert!(snap.action("p2").is_none());
    assert_eq!(snap.action("p1").map(|a| a.state), Some(ActionState::Running));
    assert_eq!(
        render.current(Modality::BotPosture).as_deref(),
        Some("Posture: listening")
    );

    shutdown(actor, handle).await;
}

#[tokio::test]
async fn test_save_history_writes_json_array() {
    let transport = Arc::new(MemoryTransport::new());
    let (actor, handle, _render) = spawn_orchestrator(transport.clone(), test_config()).await;

    actor
        .cast(OrchestratorMsg::Inbound {
            batch: vec![
                wire(json!({"type": "UserIntent", "intent": "greet"})),
                wire(json!({
                    "type": "StartTimerBotAction",
                    "action_uid": "t1",
                    "duration": 30
                })),
            ],
        })
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.json");
    let saved = ractor::call!(actor, |reply| OrchestratorMsg::SaveHistory {
        path: path.clone(),
        reply,
    })
    .unwrap()
    .unwrap();
    assert_eq!(saved, 3);

    let content = tokio::fs::read_to_string(&path).await.unwrap();
    let events: Vec<Event> = serde_json::from_str(&content).unwrap();
    let kinds: Vec<&str> = events.iter().map(|e| e.kind.as_str()).collect();
    assert_eq!(
        kinds,
        vec!["UserIntent", "StartTimerBotAction", "TimerBotActionStarted"]
    );

    shutdown(actor, handle).await;
}
