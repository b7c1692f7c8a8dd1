//! Action state machine
//!
//! One [`ActionHandler`] per action instance. The transition table is shared
//! by every action type; what differs per type is the effect table carried
//! by its [`ActionSpec`].
//!
//! ```text
//! Init ──start/started──▶ Running ◀──promote── Background
//!                           │  ───demote────────▶  │
//!                           │                      │
//!          stop/finished/done                    stop
//!                           ▼                      ▼
//!                        Finished ◀────────────────┘
//! ```

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use shared_types::{ActionSnapshot, ActionState, Event, Modality};
use std::fmt;

use super::catalog::ActionSpec;
use super::effects::{ActionSettings, EffectContext};
use super::error::ActionError;

// ============================================================================
// Triggers
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Trigger {
    Start,
    Started,
    Change,
    Tick,
    Demote,
    Promote,
    Stop,
    Finished,
    Done,
}

impl Trigger {
    /// Raised by the orchestrator itself rather than by a wire event
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Tick | Self::Demote | Self::Promote | Self::Done)
    }

    /// Triggers that can move a live action to Finished
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stop | Self::Finished | Self::Done)
    }
}

/// What caused a trigger: an inbound event, or an internal reason
#[derive(Debug, Clone, Copy)]
pub enum TriggerInput<'a> {
    Event(&'a Event),
    Internal(&'static str),
}

impl<'a> TriggerInput<'a> {
    pub fn event(&self) -> Option<&'a Event> {
        match self {
            Self::Event(event) => Some(event),
            Self::Internal(_) => None,
        }
    }
}

// ============================================================================
// Transition Table
// ============================================================================

/// Which entry of the effect table a transition invokes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectSlot {
    Start,
    StartedFromInit,
    StartedFromRunning,
    Change,
    Tick,
    Demote,
    Promote,
    PromoteWhenRunning,
    StopFromRunning,
    StopFromBackground,
    FinishedFromRunning,
    Done,
    /// Payload merge only
    MergeOnly,
}

struct Transition {
    trigger: Trigger,
    source: ActionState,
    dest: ActionState,
    effect: EffectSlot,
}

const fn transition(
    trigger: Trigger,
    source: ActionState,
    dest: ActionState,
    effect: EffectSlot,
) -> Transition {
    Transition {
        trigger,
        source,
        dest,
        effect,
    }
}

use ActionState::{Background, Finished, Init, Running};

const TRANSITIONS: &[Transition] = &[
    transition(Trigger::Start, Init, Running, EffectSlot::Start),
    transition(Trigger::Started, Init, Running, EffectSlot::StartedFromInit),
    transition(Trigger::Started, Running, Running, EffectSlot::StartedFromRunning),
    transition(Trigger::Started, Background, Background, EffectSlot::MergeOnly),
    transition(Trigger::Change, Running, Running, EffectSlot::Change),
    transition(Trigger::Tick, Running, Running, EffectSlot::Tick),
    transition(Trigger::Demote, Running, Background, EffectSlot::Demote),
    transition(Trigger::Promote, Background, Running, EffectSlot::Promote),
    transition(Trigger::Promote, Running, Running, EffectSlot::PromoteWhenRunning),
    transition(Trigger::Stop, Running, Finished, EffectSlot::StopFromRunning),
    transition(Trigger::Stop, Background, Finished, EffectSlot::StopFromBackground),
    transition(Trigger::Finished, Running, Finished, EffectSlot::FinishedFromRunning),
    transition(Trigger::Done, Running, Finished, EffectSlot::Done),
    transition(Trigger::Started, Finished, Finished, EffectSlot::MergeOnly),
    transition(Trigger::Finished, Finished, Finished, EffectSlot::MergeOnly),
];

/// Destination state and effect for a trigger, if the move is legal
pub fn lookup_transition(trigger: Trigger, source: ActionState) -> Option<(ActionState, EffectSlot)> {
    TRANSITIONS
        .iter()
        .find(|t| t.trigger == trigger && t.source == source)
        .map(|t| (t.dest, t.effect))
}

// ============================================================================
// Task Clock
// ============================================================================

/// Wall-clock target of a time-bounded action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskClock {
    pub started_at: DateTime<Utc>,
    pub target: Duration,
}

impl TaskClock {
    /// Never negative, even if the origin lies in the future
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        (now - self.started_at).max(Duration::zero())
    }

    pub fn is_complete(&self, now: DateTime<Utc>) -> bool {
        self.elapsed(now) >= self.target
    }
}

// ============================================================================
// Action Handler
// ============================================================================

/// Handler fields touched by merges and effects, kept while a trigger runs
struct Checkpoint {
    action_state: Map<String, Value>,
    was_stopped: bool,
    task_done: bool,
    clock: Option<TaskClock>,
    queued: usize,
}

pub struct ActionHandler {
    spec: &'static ActionSpec,
    action_uid: String,
    state: ActionState,
    action_state: Map<String, Value>,
    was_stopped: bool,
    task_done: bool,
    clock: Option<TaskClock>,
}

impl fmt::Debug for ActionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionHandler")
            .field("action_name", &self.spec.action_name)
            .field("action_uid", &self.action_uid)
            .field("state", &self.state)
            .field("was_stopped", &self.was_stopped)
            .field("task_done", &self.task_done)
            .finish()
    }
}

impl ActionHandler {
    pub fn new(spec: &'static ActionSpec, action_uid: impl Into<String>) -> Self {
        Self {
            spec,
            action_uid: action_uid.into(),
            state: ActionState::Init,
            action_state: Map::new(),
            was_stopped: false,
            task_done: false,
            clock: None,
        }
    }

    pub fn spec(&self) -> &'static ActionSpec {
        self.spec
    }

    pub fn action_name(&self) -> &'static str {
        self.spec.action_name
    }

    pub fn family(&self) -> Modality {
        self.spec.family
    }

    pub fn action_uid(&self) -> &str {
        &self.action_uid
    }

    pub fn state(&self) -> ActionState {
        self.state
    }

    /// Every field seen on this action's events, last write wins
    pub fn action_state(&self) -> &Map<String, Value> {
        &self.action_state
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.action_state.get(name)
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.action_state.get(name).and_then(Value::as_str)
    }

    pub fn was_stopped(&self) -> bool {
        self.was_stopped
    }

    pub fn mark_stopped(&mut self) {
        self.was_stopped = true;
    }

    pub fn task_done(&self) -> bool {
        self.task_done
    }

    pub fn mark_done(&mut self) {
        self.task_done = true;
    }

    pub fn clock(&self) -> Option<TaskClock> {
        self.clock
    }

    /// Arm the completion clock according to the action type's completion rule
    pub fn start_clock(&mut self, now: DateTime<Utc>, settings: &ActionSettings) {
        let completion = self.spec.completion;
        self.clock = completion.target(self, settings).map(|target| TaskClock {
            started_at: completion.origin(self, now),
            target,
        });
    }

    pub fn retarget_clock(&mut self, now: DateTime<Utc>, settings: &ActionSettings) {
        let Some(target) = self.spec.completion.target(self, settings) else {
            self.clock = None;
            return;
        };
        match self.clock.as_mut() {
            Some(clock) => clock.target = target,
            None => self.start_clock(now, settings),
        }
    }

    /// Apply one trigger: merge the event payload, run the effect, enter the new state
    ///
    /// If the effect fails, the handler and the outbox are rolled back to
    /// where they were; render calls already made are not undone.
    pub fn fire(
        &mut self,
        trigger: Trigger,
        input: &TriggerInput<'_>,
        ctx: &mut EffectContext<'_>,
    ) -> Result<ActionState, ActionError> {
        let from = self.state;
        let (dest, slot) = lookup_transition(trigger, from).ok_or(ActionError::InvalidTransition {
            trigger,
            state: from,
        })?;

        let checkpoint = self.checkpoint(ctx.outbox.len());
        if let Some(event) = input.event() {
            self.merge(event)?;
        }

        if let Some(effect) = self.spec.effects.slot(slot) {
            if let Err(error) = effect(self, ctx, input) {
                self.restore(checkpoint, ctx.outbox);
                return Err(error);
            }
        }
        self.state = dest;

        tracing::debug!(
            action_uid = %self.action_uid,
            action_name = self.spec.action_name,
            trigger = %trigger,
            from = %from,
            to = %dest,
            "Action transition"
        );

        Ok(dest)
    }

    fn checkpoint(&self, queued: usize) -> Checkpoint {
        Checkpoint {
            action_state: self.action_state.clone(),
            was_stopped: self.was_stopped,
            task_done: self.task_done,
            clock: self.clock,
            queued,
        }
    }

    fn restore(&mut self, checkpoint: Checkpoint, outbox: &mut Vec<Event>) {
        self.action_state = checkpoint.action_state;
        self.was_stopped = checkpoint.was_stopped;
        self.task_done = checkpoint.task_done;
        self.clock = checkpoint.clock;
        outbox.truncate(checkpoint.queued);
    }

    fn merge(&mut self, event: &Event) -> Result<(), ActionError> {
        if let Some(found) = event.action_uid.as_deref() {
            if found != self.action_uid {
                return Err(ActionError::ActionUidMismatch {
                    expected: self.action_uid.clone(),
                    found: found.to_string(),
                });
            }
        }
        self.action_state.extend(event.to_map());
        Ok(())
    }

    pub fn snapshot(&self) -> ActionSnapshot {
        ActionSnapshot {
            action_uid: self.action_uid.clone(),
            action_name: self.spec.action_name.to_string(),
            state: self.state,
            was_stopped: self.was_stopped,
            task_done: self.task_done,
        }
    }
}
