//! Per-action-type transition effects
//!
//! Effects are plain function pointers collected in an [`ActionEffects`]
//! table. Action types start from [`ActionEffects::BASE`] and replace only
//! the entries they need.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use shared_types::{Event, FIELD_ACTION_UID, FIELD_IS_SUCCESS, FIELD_WAS_STOPPED};

use super::error::ActionError;
use super::fsm::{ActionHandler, EffectSlot, TriggerInput};
use crate::ports::RenderSink;
use crate::protocol::EventFactory;

// ============================================================================
// Settings
// ============================================================================

/// Whether the simulator executes bot actions or only observes them
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ExecutionMode {
    /// Answers Start with Started and drives actions to completion
    #[default]
    Active,
    /// Publishes nothing; actions never self-complete
    Passive,
}

#[derive(Debug, Clone)]
pub struct ActionSettings {
    pub mode: ExecutionMode,
    /// Playback time of gestures, facial gestures and camera effects
    pub motion_duration: Duration,
    /// Simulated speaking time per script character
    pub utterance_char_interval: Duration,
}

impl Default for ActionSettings {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Active,
            motion_duration: Duration::milliseconds(2000),
            utterance_char_interval: Duration::milliseconds(25),
        }
    }
}

// ============================================================================
// Effect Context
// ============================================================================

/// Ports and settings an effect may touch during one transition
pub struct EffectContext<'a> {
    pub now: DateTime<Utc>,
    pub settings: &'a ActionSettings,
    pub factory: &'a EventFactory,
    pub render: &'a mut dyn RenderSink,
    pub outbox: &'a mut Vec<Event>,
}

impl<'a> EffectContext<'a> {
    pub fn new(
        now: DateTime<Utc>,
        settings: &'a ActionSettings,
        factory: &'a EventFactory,
        render: &'a mut dyn RenderSink,
        outbox: &'a mut Vec<Event>,
    ) -> Self {
        Self {
            now,
            settings,
            factory,
            render,
            outbox,
        }
    }

    pub fn is_active(&self) -> bool {
        self.settings.mode == ExecutionMode::Active
    }

    /// Construct an outbound event and queue it for publishing
    pub fn emit(&mut self, kind: &str, fields: Map<String, Value>) -> Result<(), ActionError> {
        let event = self.factory.new_event_at(kind, fields, self.now)?;
        self.outbox.push(event);
        Ok(())
    }

    pub fn emit_error(&mut self, reason: impl Into<String>) {
        let event = self.factory.error_event_at(reason, self.now);
        self.outbox.push(event);
    }
}

// ============================================================================
// Effect Table
// ============================================================================

pub type EffectFn =
    fn(&mut ActionHandler, &mut EffectContext<'_>, &TriggerInput<'_>) -> Result<(), ActionError>;

#[derive(Clone, Copy)]
pub struct ActionEffects {
    pub on_start: EffectFn,
    pub on_started_from_init: EffectFn,
    pub on_started_from_running: EffectFn,
    pub on_change: EffectFn,
    pub on_tick: EffectFn,
    pub on_demote: EffectFn,
    pub on_promote: EffectFn,
    pub on_promote_when_running: EffectFn,
    pub on_stop_from_running: EffectFn,
    pub on_stop_from_background: EffectFn,
    pub on_finished_from_running: EffectFn,
    pub on_done: EffectFn,
}

impl ActionEffects {
    pub const BASE: Self = Self {
        on_start: start,
        on_started_from_init: started_from_init,
        on_started_from_running: noop,
        on_change: show_display,
        on_tick: tick,
        on_demote: hide,
        on_promote: show_display,
        on_promote_when_running: promote_when_running,
        on_stop_from_running: stop_from_running,
        on_stop_from_background: stop_from_background,
        on_finished_from_running: hide,
        on_done: done,
    };

    pub fn slot(&self, slot: EffectSlot) -> Option<EffectFn> {
        let effect = match slot {
            EffectSlot::Start => self.on_start,
            EffectSlot::StartedFromInit => self.on_started_from_init,
            EffectSlot::StartedFromRunning => self.on_started_from_running,
            EffectSlot::Change => self.on_change,
            EffectSlot::Tick => self.on_tick,
            EffectSlot::Demote => self.on_demote,
            EffectSlot::Promote => self.on_promote,
            EffectSlot::PromoteWhenRunning => self.on_promote_when_running,
            EffectSlot::StopFromRunning => self.on_stop_from_running,
            EffectSlot::StopFromBackground => self.on_stop_from_background,
            EffectSlot::FinishedFromRunning => self.on_finished_from_running,
            EffectSlot::Done => self.on_done,
            EffectSlot::MergeOnly => return None,
        };
        Some(effect)
    }
}

// ============================================================================
// Building Blocks
// ============================================================================

/// Publish `<ActionName>Started` when executing actions
pub fn announce_started(
    handler: &ActionHandler,
    ctx: &mut EffectContext<'_>,
) -> Result<(), ActionError> {
    if !ctx.is_active() {
        return Ok(());
    }
    let mut fields = Map::new();
    fields.insert(
        FIELD_ACTION_UID.to_string(),
        Value::String(handler.action_uid().to_string()),
    );
    ctx.emit(&format!("{}Started", handler.action_name()), fields)
}

/// Publish `<ActionName>Finished` when executing actions
pub fn announce_finished(
    handler: &ActionHandler,
    ctx: &mut EffectContext<'_>,
) -> Result<(), ActionError> {
    if !ctx.is_active() {
        return Ok(());
    }
    let mut fields = Map::new();
    fields.insert(
        FIELD_ACTION_UID.to_string(),
        Value::String(handler.action_uid().to_string()),
    );
    fields.insert(FIELD_IS_SUCCESS.to_string(), Value::Bool(true));
    fields.insert(
        FIELD_WAS_STOPPED.to_string(),
        Value::Bool(handler.was_stopped()),
    );
    fields.extend((handler.spec().finished_fields)(handler));
    ctx.emit(&format!("{}Finished", handler.action_name()), fields)
}

pub fn render_display(handler: &ActionHandler, ctx: &mut EffectContext<'_>) {
    let text = (handler.spec().display)(handler);
    ctx.render.show(handler.family(), &text);
}

// ============================================================================
// Base Effects
// ============================================================================

pub fn noop(
    _handler: &mut ActionHandler,
    _ctx: &mut EffectContext<'_>,
    _input: &TriggerInput<'_>,
) -> Result<(), ActionError> {
    Ok(())
}

pub fn start(
    handler: &mut ActionHandler,
    ctx: &mut EffectContext<'_>,
    _input: &TriggerInput<'_>,
) -> Result<(), ActionError> {
    announce_started(handler, ctx)?;
    handler.start_clock(ctx.now, ctx.settings);
    render_display(handler, ctx);
    Ok(())
}

/// Started elsewhere: nothing to announce, but completion still runs here
pub fn started_from_init(
    handler: &mut ActionHandler,
    ctx: &mut EffectContext<'_>,
    _input: &TriggerInput<'_>,
) -> Result<(), ActionError> {
    handler.start_clock(ctx.now, ctx.settings);
    render_display(handler, ctx);
    Ok(())
}

pub fn show_display(
    handler: &mut ActionHandler,
    ctx: &mut EffectContext<'_>,
    _input: &TriggerInput<'_>,
) -> Result<(), ActionError> {
    render_display(handler, ctx);
    Ok(())
}

pub fn hide(
    handler: &mut ActionHandler,
    ctx: &mut EffectContext<'_>,
    _input: &TriggerInput<'_>,
) -> Result<(), ActionError> {
    ctx.render.hide(handler.family());
    Ok(())
}

pub fn tick(
    handler: &mut ActionHandler,
    ctx: &mut EffectContext<'_>,
    _input: &TriggerInput<'_>,
) -> Result<(), ActionError> {
    if !ctx.is_active() {
        return Ok(());
    }
    let Some(clock) = handler.clock() else {
        return Ok(());
    };

    let elapsed = clock.elapsed(ctx.now);
    if elapsed >= clock.target {
        handler.mark_done();
    } else if let Some(text) = (handler.spec().progress)(handler, elapsed, clock.target) {
        ctx.render.show(handler.family(), &text);
    }
    Ok(())
}

pub fn promote_when_running(
    handler: &mut ActionHandler,
    ctx: &mut EffectContext<'_>,
    _input: &TriggerInput<'_>,
) -> Result<(), ActionError> {
    ctx.emit_error(format!(
        "Event promote received for running action {}",
        handler.action_uid()
    ));
    Ok(())
}

pub fn stop_from_running(
    handler: &mut ActionHandler,
    ctx: &mut EffectContext<'_>,
    _input: &TriggerInput<'_>,
) -> Result<(), ActionError> {
    handler.mark_stopped();
    announce_finished(handler, ctx)?;
    ctx.render.hide(handler.family());
    Ok(())
}

/// A background action is not on screen, so nothing is hidden
pub fn stop_from_background(
    handler: &mut ActionHandler,
    ctx: &mut EffectContext<'_>,
    _input: &TriggerInput<'_>,
) -> Result<(), ActionError> {
    handler.mark_stopped();
    announce_finished(handler, ctx)
}

pub fn done(
    handler: &mut ActionHandler,
    ctx: &mut EffectContext<'_>,
    _input: &TriggerInput<'_>,
) -> Result<(), ActionError> {
    announce_finished(handler, ctx)?;
    ctx.render.hide(handler.family());
    Ok(())
}
