//! OrchestratorActor - the single writer over every in-flight action.
//!
//! Owns the dispatcher (registry, override stacks, handlers), the render sink
//! and the interaction history. Two spawned tasks feed it: a fixed-interval
//! ticker casting `Tick` and a receive pump casting `Inbound` batches. Each
//! message runs to completion, including the events it publishes, before the
//! next one is handled.

use async_trait::async_trait;
use chrono::Utc;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use serde_json::{Map, Value};
use shared_types::{Event, OrchestratorSnapshot};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::actions::{ActionError, Dispatcher};
use crate::config::SimulatorConfig;
use crate::history::{HistoryError, InteractionHistory};
use crate::ports::{MessageTransport, RenderSink, TransportError};
use crate::protocol::display::short_description;
use crate::protocol::{decode_wire_value, DecodeError, EventFactory};

pub struct OrchestratorArguments {
    pub transport: Arc<dyn MessageTransport>,
    pub render: Box<dyn RenderSink>,
    pub config: SimulatorConfig,
}

pub struct OrchestratorState {
    dispatcher: Dispatcher,
    render: Box<dyn RenderSink>,
    history: InteractionHistory,
    transport: Arc<dyn MessageTransport>,
    channel: String,
    strict: bool,
    ticker: JoinHandle<()>,
    pump: JoinHandle<()>,
}

#[derive(Debug)]
pub enum OrchestratorMsg {
    /// Raw wire events received together, processed in order
    Inbound { batch: Vec<String> },
    /// Advance every running action once
    Tick,
    /// Publish an event built by this simulator; `action_uid = "LATEST"` is resolved first
    Submit {
        kind: String,
        fields: Map<String, Value>,
        reply: RpcReplyPort<Result<Event, ActionError>>,
    },
    ResolveLatest {
        action_name: String,
        reply: RpcReplyPort<Option<String>>,
    },
    GetSnapshot {
        reply: RpcReplyPort<OrchestratorSnapshot>,
    },
    GetHistory {
        reply: RpcReplyPort<Vec<Value>>,
    },
    SaveHistory {
        path: PathBuf,
        reply: RpcReplyPort<Result<usize, HistoryError>>,
    },
}

#[derive(Debug, Default)]
pub struct OrchestratorActor;

#[async_trait]
impl Actor for OrchestratorActor {
    type Msg = OrchestratorMsg;
    type State = OrchestratorState;
    type Arguments = OrchestratorArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let config = args.config;
        let dispatcher = Dispatcher::new(
            EventFactory::new(config.source_uid.clone()),
            config.action_settings(),
        );

        let interval = config.tick_interval().max(Duration::from_millis(1));
        let tick_ref = myself.clone();
        let ticker = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tick_ref.cast(OrchestratorMsg::Tick).is_err() {
                    break;
                }
            }
        });

        let pump = tokio::spawn(receive_pump(
            myself.clone(),
            args.transport.clone(),
            config.receive_timeout(),
        ));

        tracing::info!(
            channel = %config.channel_id(),
            mode = %config.mode,
            tick_interval_ms = config.tick_interval_ms,
            "Orchestrator starting"
        );

        Ok(OrchestratorState {
            dispatcher,
            render: args.render,
            history: InteractionHistory::new(),
            transport: args.transport,
            channel: config.channel_id(),
            strict: config.strict,
            ticker,
            pump,
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            OrchestratorMsg::Inbound { batch } => {
                self.handle_inbound(batch, state).await;
            }
            OrchestratorMsg::Tick => {
                let mut outbox = Vec::new();
                state
                    .dispatcher
                    .tick(Utc::now(), state.render.as_mut(), &mut outbox);
                publish(state, outbox).await;
            }
            OrchestratorMsg::Submit {
                kind,
                fields,
                reply,
            } => {
                let result = self.handle_submit(&kind, fields, state).await;
                let _ = reply.send(result);
            }
            OrchestratorMsg::ResolveLatest { action_name, reply } => {
                let _ = reply.send(state.dispatcher.resolve_latest(&action_name));
            }
            OrchestratorMsg::GetSnapshot { reply } => {
                let _ = reply.send(state.dispatcher.snapshot());
            }
            OrchestratorMsg::GetHistory { reply } => {
                let _ = reply.send(state.history.entries().to_vec());
            }
            OrchestratorMsg::SaveHistory { path, reply } => {
                let _ = reply.send(state.history.save_json(&path).await);
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.ticker.abort();
        state.pump.abort();
        tracing::info!(
            live_actions = state.dispatcher.live_count(),
            history = state.history.len(),
            "Orchestrator stopped"
        );
        Ok(())
    }
}

impl OrchestratorActor {
    async fn handle_inbound(&self, batch: Vec<String>, state: &mut OrchestratorState) {
        let mut events = Vec::with_capacity(batch.len());
        let mut rejections = Vec::new();

        for raw in &batch {
            let value: Value = match serde_json::from_str(raw) {
                Ok(value) => value,
                Err(err) => {
                    tracing::warn!(error = %err, raw = %raw, "Dropped undecodable payload");
                    continue;
                }
            };
            state.history.push_raw(value.clone());

            match decode_wire_value(value, state.strict) {
                Ok(event) => {
                    tracing::debug!(event = %short_description(&event), "Received");
                    events.push(event);
                }
                Err(DecodeError::Validation(err)) => {
                    tracing::warn!(error = %err, raw = %raw, "Rejected invalid event");
                    rejections.push(
                        state
                            .dispatcher
                            .factory()
                            .error_event(format!("ValidationError: {err}")),
                    );
                }
                Err(err) => {
                    tracing::warn!(error = %err, raw = %raw, "Dropped undecodable payload");
                }
            }
        }

        let mut outbox = rejections;
        state
            .dispatcher
            .dispatch_batch(&events, Utc::now(), state.render.as_mut(), &mut outbox);
        publish(state, outbox).await;
    }

    async fn handle_submit(
        &self,
        kind: &str,
        fields: Map<String, Value>,
        state: &mut OrchestratorState,
    ) -> Result<Event, ActionError> {
        match state.dispatcher.build_outbound(kind, fields, Utc::now()) {
            Ok(event) => {
                publish(state, vec![event.clone()]).await;
                Ok(event)
            }
            Err(err @ ActionError::LatestResolution { .. }) => {
                tracing::warn!(error = %err, kind = %kind, "Outbound event not sent");
                let reason = format!("{err}");
                let rejection = state.dispatcher.factory().error_event(reason);
                state.history.push(&rejection);
                Err(err)
            }
            Err(err) => {
                tracing::warn!(error = %err, kind = %kind, "Outbound event rejected");
                Err(err)
            }
        }
    }
}

/// Record and send locally generated events in order
async fn publish(state: &mut OrchestratorState, outbox: Vec<Event>) {
    for event in outbox {
        tracing::debug!(event = %short_description(&event), "Sending");
        state.history.push(&event);
        if let Err(err) = state.transport.send(&state.channel, &event).await {
            tracing::warn!(
                error = %err,
                channel = %state.channel,
                kind = %event.kind,
                "Failed to send event"
            );
        }
    }
}

async fn receive_pump(
    actor: ActorRef<OrchestratorMsg>,
    transport: Arc<dyn MessageTransport>,
    timeout: Duration,
) {
    loop {
        match transport.receive(timeout).await {
            Ok(batch) if batch.is_empty() => {}
            Ok(batch) => {
                if actor.cast(OrchestratorMsg::Inbound { batch }).is_err() {
                    break;
                }
            }
            Err(TransportError::Closed) => {
                tracing::info!("Inbound stream closed");
                break;
            }
            Err(err) => {
                tracing::warn!(error = %err, "Receive failed");
                tokio::time::sleep(timeout).await;
            }
        }
    }
}
