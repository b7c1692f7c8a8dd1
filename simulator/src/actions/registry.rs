//! Action registry and event dispatcher
//!
//! Routes inbound events to their action handlers, creates handlers for new
//! actions, drives time-based actions on every tick and resolves the LATEST
//! sentinel. Handlers that reach Finished are swept at the end of the pass
//! that finished them.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use shared_types::{
    ActionState, Event, OrchestratorSnapshot, FIELD_ACTION_UID, LATEST_ACTION_UID,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use super::catalog;
use super::effects::{ActionSettings, EffectContext};
use super::error::ActionError;
use super::fsm::{ActionHandler, Trigger, TriggerInput};
use super::override_stack::{HandlerMap, OverrideStacks};
use crate::ports::RenderSink;
use crate::protocol::{EventFactory, EventKind};

/// How many finished action uids are remembered to ignore late `Started` events
const RETIRED_CAPACITY: usize = 512;

#[derive(Debug, Default)]
struct RetiredUids {
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl RetiredUids {
    fn insert(&mut self, action_uid: String) {
        if !self.members.insert(action_uid.clone()) {
            return;
        }
        self.order.push_back(action_uid);
        if self.order.len() > RETIRED_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
    }

    fn contains(&self, action_uid: &str) -> bool {
        self.members.contains(action_uid)
    }
}

#[derive(Debug)]
pub struct Dispatcher {
    factory: EventFactory,
    settings: ActionSettings,
    handlers: HandlerMap,
    /// Live action uids in creation order
    arrival: Vec<String>,
    /// action_name -> uids in start order
    latest: HashMap<&'static str, Vec<String>>,
    stacks: OverrideStacks,
    retired: RetiredUids,
}

impl Dispatcher {
    pub fn new(factory: EventFactory, settings: ActionSettings) -> Self {
        Self {
            factory,
            settings,
            handlers: HandlerMap::new(),
            arrival: Vec::new(),
            latest: HashMap::new(),
            stacks: OverrideStacks::new(),
            retired: RetiredUids::default(),
        }
    }

    pub fn factory(&self) -> &EventFactory {
        &self.factory
    }

    pub fn settings(&self) -> &ActionSettings {
        &self.settings
    }

    pub fn handler(&self, action_uid: &str) -> Option<&ActionHandler> {
        self.handlers.get(action_uid)
    }

    pub fn live_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn stacks(&self) -> &OverrideStacks {
        &self.stacks
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Process one event as its own pass
    pub fn dispatch(
        &mut self,
        event: &Event,
        now: DateTime<Utc>,
        render: &mut dyn RenderSink,
        outbox: &mut Vec<Event>,
    ) {
        self.dispatch_batch(std::slice::from_ref(event), now, render, outbox);
    }

    /// Process a received batch strictly in order, then sweep finished handlers
    pub fn dispatch_batch(
        &mut self,
        events: &[Event],
        now: DateTime<Utc>,
        render: &mut dyn RenderSink,
        outbox: &mut Vec<Event>,
    ) {
        for event in events {
            if let Err(error) = self.route(event, now, render, outbox) {
                let handler_name = event
                    .action_uid
                    .as_deref()
                    .and_then(|uid| self.handlers.get(uid))
                    .map(ActionHandler::action_name)
                    .unwrap_or("unknown");
                self.report(&error, handler_name, now, outbox);

                if let Some(action_uid) = event.action_uid.as_deref() {
                    self.discard_unstarted(action_uid);
                }
            }
        }
        self.sweep();
    }

    fn route(
        &mut self,
        event: &Event,
        now: DateTime<Utc>,
        render: &mut dyn RenderSink,
        outbox: &mut Vec<Event>,
    ) -> Result<(), ActionError> {
        let kind = EventKind::parse(&event.kind);
        let (Some(action_name), Some(trigger), Some(action_uid)) = (
            kind.action_name(),
            kind.trigger(),
            event.action_uid.as_deref(),
        ) else {
            tracing::trace!(kind = %event.kind, "Event carries no action trigger");
            return Ok(());
        };

        if !self.handlers.contains_key(action_uid) {
            let creates = kind.verb().is_some_and(|verb| verb.creates_handler());
            let spec = catalog::lookup(action_name).filter(|spec| spec.accepts(trigger));
            match spec {
                Some(spec) if creates && !self.retired.contains(action_uid) => {
                    self.register(spec, action_uid);
                }
                _ => {
                    tracing::debug!(
                        kind = %event.kind,
                        action_uid = %action_uid,
                        "No handler for event"
                    );
                    return Ok(());
                }
            }
        }

        let Some(handler) = self.handlers.get(action_uid) else {
            return Ok(());
        };
        if handler.action_name() != action_name || !handler.spec().accepts(trigger) {
            tracing::debug!(
                kind = %event.kind,
                action_uid = %action_uid,
                handler = handler.action_name(),
                "Event not accepted by handler"
            );
            return Ok(());
        }

        let mut ctx = EffectContext::new(now, &self.settings, &self.factory, render, outbox);
        deliver(
            &mut self.handlers,
            &mut self.stacks,
            action_uid,
            trigger,
            &TriggerInput::Event(event),
            &mut ctx,
        )
        .map(|_| ())
    }

    fn register(&mut self, spec: &'static catalog::ActionSpec, action_uid: &str) {
        self.handlers.insert(
            action_uid.to_string(),
            ActionHandler::new(spec, action_uid),
        );
        self.arrival.push(action_uid.to_string());
        self.latest
            .entry(spec.action_name)
            .or_default()
            .push(action_uid.to_string());
        tracing::debug!(
            action_uid = %action_uid,
            action_name = spec.action_name,
            "Action registered"
        );
    }

    /// A handler whose first trigger failed never started; forget it
    fn discard_unstarted(&mut self, action_uid: &str) {
        if self
            .handlers
            .get(action_uid)
            .is_some_and(|h| h.state() == ActionState::Init)
        {
            self.unregister(action_uid);
        }
    }

    // ========================================================================
    // Tick
    // ========================================================================

    /// Advance every Running action once; completed ones finish in the same pass
    pub fn tick(&mut self, now: DateTime<Utc>, render: &mut dyn RenderSink, outbox: &mut Vec<Event>) {
        let snapshot = self.arrival.clone();
        for action_uid in &snapshot {
            let is_running = self
                .handlers
                .get(action_uid)
                .is_some_and(|h| h.state() == ActionState::Running);
            if !is_running {
                continue;
            }

            if let Err(error) = self.advance(action_uid, now, render, outbox) {
                let handler_name = self
                    .handlers
                    .get(action_uid)
                    .map(ActionHandler::action_name)
                    .unwrap_or("unknown");
                self.report(&error, handler_name, now, outbox);
            }
        }
        self.sweep();
    }

    fn advance(
        &mut self,
        action_uid: &str,
        now: DateTime<Utc>,
        render: &mut dyn RenderSink,
        outbox: &mut Vec<Event>,
    ) -> Result<(), ActionError> {
        let mut ctx = EffectContext::new(now, &self.settings, &self.factory, render, outbox);
        deliver(
            &mut self.handlers,
            &mut self.stacks,
            action_uid,
            Trigger::Tick,
            &TriggerInput::Internal("tick"),
            &mut ctx,
        )?;

        let done = self
            .handlers
            .get(action_uid)
            .is_some_and(|h| h.state() == ActionState::Running && h.task_done());
        if done {
            deliver(
                &mut self.handlers,
                &mut self.stacks,
                action_uid,
                Trigger::Done,
                &TriggerInput::Internal("done"),
                &mut ctx,
            )?;
        }
        Ok(())
    }

    // ========================================================================
    // Bookkeeping
    // ========================================================================

    fn sweep(&mut self) {
        let finished: Vec<String> = self
            .arrival
            .iter()
            .filter(|uid| {
                self.handlers
                    .get(uid.as_str())
                    .is_some_and(|h| h.state() == ActionState::Finished)
            })
            .cloned()
            .collect();

        for action_uid in finished {
            self.unregister(&action_uid);
            self.retired.insert(action_uid);
        }
    }

    fn unregister(&mut self, action_uid: &str) {
        let Some(handler) = self.handlers.remove(action_uid) else {
            return;
        };
        self.arrival.retain(|uid| uid != action_uid);
        if let Some(uids) = self.latest.get_mut(handler.action_name()) {
            uids.retain(|uid| uid != action_uid);
            if uids.is_empty() {
                self.latest.remove(handler.action_name());
            }
        }
        tracing::debug!(
            action_uid = %action_uid,
            action_name = handler.action_name(),
            state = %handler.state(),
            "Action removed"
        );
    }

    fn report(
        &self,
        error: &ActionError,
        handler_name: &str,
        now: DateTime<Utc>,
        outbox: &mut Vec<Event>,
    ) {
        let reason = format!(
            "{}: {} when running handler {}",
            error.kind_name(),
            error,
            handler_name
        );
        tracing::warn!(error = %error, handler = handler_name, "Action handler fault");
        outbox.push(self.factory.error_event_at(reason, now));
    }

    // ========================================================================
    // LATEST & Outbound
    // ========================================================================

    /// Most recently started live action of a type
    pub fn resolve_latest(&self, action_name: &str) -> Option<String> {
        self.latest
            .get(action_name)?
            .iter()
            .rev()
            .find(|uid| {
                self.handlers
                    .get(uid.as_str())
                    .is_some_and(|h| h.state().is_live())
            })
            .cloned()
    }

    /// Build an outbound event, resolving `action_uid = "LATEST"` first
    pub fn build_outbound(
        &self,
        kind: &str,
        mut fields: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<Event, ActionError> {
        let wants_latest =
            fields.get(FIELD_ACTION_UID).and_then(Value::as_str) == Some(LATEST_ACTION_UID);
        if wants_latest {
            let parsed = EventKind::parse(kind);
            let action_name = parsed.action_name().unwrap_or(kind);
            let action_uid =
                self.resolve_latest(action_name)
                    .ok_or_else(|| ActionError::LatestResolution {
                        action_name: action_name.to_string(),
                    })?;
            fields.insert(FIELD_ACTION_UID.to_string(), Value::String(action_uid));
        }

        Ok(self.factory.new_event_at(kind, fields, now)?)
    }

    // ========================================================================
    // Observation
    // ========================================================================

    pub fn snapshot(&self) -> OrchestratorSnapshot {
        OrchestratorSnapshot {
            actions: self
                .arrival
                .iter()
                .filter_map(|uid| self.handlers.get(uid))
                .map(ActionHandler::snapshot)
                .collect(),
            stacks: self.stacks.snapshot(),
            latest: self
                .latest
                .iter()
                .map(|(name, uids)| (name.to_string(), uids.clone()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    /// Bookkeeping invariants that must hold between passes; empty when healthy
    pub fn invariant_violations(&self) -> Vec<String> {
        let mut violations = Vec::new();

        for (family, members) in self.stacks.iter() {
            let mut running = 0;
            for uid in members {
                match self.handlers.get(uid).map(ActionHandler::state) {
                    None => violations.push(format!("{family} stack holds unregistered {uid}")),
                    Some(ActionState::Finished) => {
                        violations.push(format!("{family} stack holds finished {uid}"))
                    }
                    Some(ActionState::Running) => running += 1,
                    Some(_) => {}
                }
            }
            if running != 1 {
                violations.push(format!("{family} stack has {running} running members"));
            }
        }

        for (name, uids) in &self.latest {
            for uid in uids {
                if !self.handlers.contains_key(uid) {
                    violations.push(format!("latest list of {name} holds unregistered {uid}"));
                }
            }
        }

        for uid in self.handlers.keys() {
            if !self.arrival.contains(uid) {
                violations.push(format!("{uid} missing from arrival order"));
            }
        }

        violations
    }
}

/// Deliver one trigger, routing stack-arbitrated lifecycle moves through the stacks
fn deliver(
    handlers: &mut HandlerMap,
    stacks: &mut OverrideStacks,
    action_uid: &str,
    trigger: Trigger,
    input: &TriggerInput<'_>,
    ctx: &mut EffectContext<'_>,
) -> Result<ActionState, ActionError> {
    let gone = ActionError::InvalidTransition {
        trigger,
        state: ActionState::Finished,
    };
    let Some((family, state)) = handlers
        .get(action_uid)
        .map(|h| (h.spec().stack_family(), h.state()))
    else {
        return Err(gone);
    };

    match family {
        Some(family)
            if state == ActionState::Init
                && matches!(trigger, Trigger::Start | Trigger::Started) =>
        {
            stacks.enter(family, handlers, action_uid, trigger, input, ctx)
        }
        Some(family) if trigger.is_terminal() && state.is_live() => {
            stacks.leave(family, handlers, action_uid, trigger, input, ctx)
        }
        _ => match handlers.get_mut(action_uid) {
            Some(handler) => handler.fire(trigger, input, ctx),
            None => Err(gone),
        },
    }
}
