//! Modality override stacks
//!
//! Within a stack-arbitrated family the most recently started action is in
//! effect (Running) and every older live action waits in Background. Stacks
//! hold action uids only; handlers stay owned by the registry.

use shared_types::{ActionState, Modality, StackSnapshot};
use std::collections::{BTreeMap, HashMap};

use super::effects::EffectContext;
use super::error::ActionError;
use super::fsm::{ActionHandler, Trigger, TriggerInput};

pub type HandlerMap = HashMap<String, ActionHandler>;

#[derive(Debug, Default)]
pub struct OverrideStacks {
    stacks: BTreeMap<Modality, Vec<String>>,
}

impl OverrideStacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Members of one family's stack, bottom first
    pub fn members(&self, family: Modality) -> &[String] {
        self.stacks.get(&family).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, family: Modality, action_uid: &str) -> bool {
        self.members(family).iter().any(|uid| uid == action_uid)
    }

    /// Put a new action in effect: demote the current foreground, then start
    /// the newcomer and push it on top
    ///
    /// If the newcomer fails to start, the demoted action is promoted back.
    pub fn enter(
        &mut self,
        family: Modality,
        handlers: &mut HandlerMap,
        action_uid: &str,
        trigger: Trigger,
        input: &TriggerInput<'_>,
        ctx: &mut EffectContext<'_>,
    ) -> Result<ActionState, ActionError> {
        let demoted = self.demote_foreground(family, handlers, ctx)?;

        let result = match handlers.get_mut(action_uid) {
            Some(handler) => handler.fire(trigger, input, ctx),
            None => Err(ActionError::InvalidTransition {
                trigger,
                state: ActionState::Finished,
            }),
        };

        match result {
            Ok(state) => {
                self.stacks
                    .entry(family)
                    .or_default()
                    .push(action_uid.to_string());
                tracing::debug!(
                    family = %family,
                    action_uid = %action_uid,
                    depth = self.members(family).len(),
                    "Action pushed on override stack"
                );
                Ok(state)
            }
            Err(error) => {
                let previous = match demoted {
                    Some(uid) => handlers.get_mut(&uid),
                    None => None,
                };
                if let Some(previous) = previous {
                    if let Err(restore_error) = previous.fire(
                        Trigger::Promote,
                        &TriggerInput::Internal("override failed"),
                        ctx,
                    ) {
                        tracing::warn!(
                            family = %family,
                            action_uid = %previous.action_uid(),
                            error = %restore_error,
                            "Failed to restore demoted action"
                        );
                    }
                }
                Err(error)
            }
        }
    }

    /// Stop, finish or complete a stack member
    ///
    /// The member is removed by uid wherever it sits. Only when the foreground
    /// member leaves is the new top promoted, or the family reset to idle.
    pub fn leave(
        &mut self,
        family: Modality,
        handlers: &mut HandlerMap,
        action_uid: &str,
        trigger: Trigger,
        input: &TriggerInput<'_>,
        ctx: &mut EffectContext<'_>,
    ) -> Result<ActionState, ActionError> {
        let Some(handler) = handlers.get_mut(action_uid) else {
            return Err(ActionError::InvalidTransition {
                trigger,
                state: ActionState::Finished,
            });
        };
        let was_foreground = handler.state() == ActionState::Running;
        let idle_display = handler.spec().idle_display;

        let state = handler.fire(trigger, input, ctx)?;
        if state != ActionState::Finished || !self.remove(family, action_uid) {
            return Ok(state);
        }

        if was_foreground {
            self.promote_top_or_idle(family, handlers, idle_display, ctx)?;
        }
        Ok(state)
    }

    /// Remove by identity, scanning from the top
    fn remove(&mut self, family: Modality, action_uid: &str) -> bool {
        let Some(stack) = self.stacks.get_mut(&family) else {
            return false;
        };
        let Some(index) = stack.iter().rposition(|uid| uid == action_uid) else {
            return false;
        };
        stack.remove(index);
        tracing::debug!(
            family = %family,
            action_uid = %action_uid,
            depth = stack.len(),
            "Action removed from override stack"
        );
        if stack.is_empty() {
            self.stacks.remove(&family);
        }
        true
    }

    fn demote_foreground(
        &mut self,
        family: Modality,
        handlers: &mut HandlerMap,
        ctx: &mut EffectContext<'_>,
    ) -> Result<Option<String>, ActionError> {
        let foreground = self.members(family).iter().rev().find(|uid| {
            handlers
                .get(uid.as_str())
                .is_some_and(|h| h.state() == ActionState::Running)
        });
        let Some(action_uid) = foreground.cloned() else {
            return Ok(None);
        };

        if let Some(handler) = handlers.get_mut(&action_uid) {
            handler.fire(Trigger::Demote, &TriggerInput::Internal("overridden"), ctx)?;
        }
        Ok(Some(action_uid))
    }

    fn promote_top_or_idle(
        &mut self,
        family: Modality,
        handlers: &mut HandlerMap,
        idle_display: Option<&'static str>,
        ctx: &mut EffectContext<'_>,
    ) -> Result<(), ActionError> {
        let top = match self.members(family).last() {
            Some(uid) => handlers.get_mut(uid),
            None => None,
        };
        match top {
            Some(handler) => {
                handler.fire(
                    Trigger::Promote,
                    &TriggerInput::Internal("overriding action finished"),
                    ctx,
                )?;
            }
            None => match idle_display {
                Some(idle) => ctx.render.show(family, idle),
                None => ctx.render.hide(family),
            },
        }
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<StackSnapshot> {
        self.stacks
            .iter()
            .map(|(family, members)| StackSnapshot {
                family: *family,
                members: members.clone(),
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Modality, &[String])> {
        self.stacks
            .iter()
            .map(|(family, members)| (*family, members.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::catalog;
    use crate::actions::effects::{ActionSettings, ExecutionMode};
    use crate::protocol::EventFactory;
    use crate::render::RecordingRenderSink;
    use chrono::Utc;
    use shared_types::Event;

    struct Fixture {
        stacks: OverrideStacks,
        handlers: HandlerMap,
        settings: ActionSettings,
        factory: EventFactory,
        render: RecordingRenderSink,
        outbox: Vec<Event>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                stacks: OverrideStacks::new(),
                handlers: HandlerMap::new(),
                settings: ActionSettings {
                    mode: ExecutionMode::Passive,
                    ..ActionSettings::default()
                },
                factory: EventFactory::new("test"),
                render: RecordingRenderSink::new(),
                outbox: Vec::new(),
            }
        }

        fn start(&mut self, action_uid: &str) -> Result<ActionState, ActionError> {
            let spec = catalog::lookup("PostureBotAction").unwrap();
            self.handlers
                .insert(action_uid.to_string(), ActionHandler::new(spec, action_uid));
            let mut ctx = EffectContext::new(
                Utc::now(),
                &self.settings,
                &self.factory,
                &mut self.render,
                &mut self.outbox,
            );
            self.stacks.enter(
                Modality::BotPosture,
                &mut self.handlers,
                action_uid,
                Trigger::Start,
                &TriggerInput::Internal("start"),
                &mut ctx,
            )
        }

        fn stop(&mut self, action_uid: &str) -> Result<ActionState, ActionError> {
            let mut ctx = EffectContext::new(
                Utc::now(),
                &self.settings,
                &self.factory,
                &mut self.render,
                &mut self.outbox,
            );
            self.stacks.leave(
                Modality::BotPosture,
                &mut self.handlers,
                action_uid,
                Trigger::Stop,
                &TriggerInput::Internal("stop"),
                &mut ctx,
            )
        }

        fn state(&self, action_uid: &str) -> ActionState {
            self.handlers[action_uid].state()
        }
    }

    #[test]
    fn test_newest_member_is_in_effect() {
        let mut f = Fixture::new();
        f.start("a").unwrap();
        f.start("b").unwrap();
        f.start("c").unwrap();

        assert_eq!(f.stacks.members(Modality::BotPosture), ["a", "b", "c"]);
        assert_eq!(f.state("a"), ActionState::Background);
        assert_eq!(f.state("b"), ActionState::Background);
        assert_eq!(f.state("c"), ActionState::Running);
    }

    #[test]
    fn test_background_member_leaves_without_promotion() {
        let mut f = Fixture::new();
        f.start("a").unwrap();
        f.start("b").unwrap();
        f.start("c").unwrap();

        f.stop("b").unwrap();

        assert_eq!(f.stacks.members(Modality::BotPosture), ["a", "c"]);
        assert_eq!(f.state("a"), ActionState::Background);
        assert_eq!(f.state("c"), ActionState::Running);
        assert_eq!(f.state("b"), ActionState::Finished);
    }

    #[test]
    fn test_foreground_leave_promotes_new_top() {
        let mut f = Fixture::new();
        f.start("a").unwrap();
        f.start("b").unwrap();

        f.stop("b").unwrap();

        assert_eq!(f.stacks.members(Modality::BotPosture), ["a"]);
        assert_eq!(f.state("a"), ActionState::Running);
        assert_eq!(
            f.render.current(Modality::BotPosture).as_deref(),
            Some("Posture: unknown")
        );
    }

    #[test]
    fn test_last_member_resets_idle() {
        let mut f = Fixture::new();
        f.start("a").unwrap();

        f.stop("a").unwrap();

        assert!(f.stacks.members(Modality::BotPosture).is_empty());
        assert!(f.stacks.snapshot().is_empty());
        assert_eq!(
            f.render.current(Modality::BotPosture).as_deref(),
            Some("Posture: idle")
        );
    }

    #[test]
    fn test_failed_start_restores_previous_foreground() {
        let mut f = Fixture::new();
        f.start("a").unwrap();

        // A second Start on a running handler is not a legal transition
        let mut ctx = EffectContext::new(
            Utc::now(),
            &f.settings,
            &f.factory,
            &mut f.render,
            &mut f.outbox,
        );
        let result = f.stacks.enter(
            Modality::BotPosture,
            &mut f.handlers,
            "a",
            Trigger::Start,
            &TriggerInput::Internal("start"),
            &mut ctx,
        );

        assert!(result.is_err());
        assert_eq!(f.state("a"), ActionState::Running);
        assert_eq!(f.stacks.members(Modality::BotPosture), ["a"]);
    }
}
