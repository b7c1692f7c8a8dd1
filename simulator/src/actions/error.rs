use shared_types::ActionState;

use super::fsm::Trigger;
use crate::protocol::ValidationError;

/// Failure while driving an action; recovered by the dispatcher as an Error event
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Can't trigger event {trigger} from state {state}!")]
    InvalidTransition { trigger: Trigger, state: ActionState },

    #[error("Event action_uid {found} does not match handler action_uid {expected}")]
    ActionUidMismatch { expected: String, found: String },

    #[error("LATEST used but no running {action_name}")]
    LatestResolution { action_name: String },
}

impl ActionError {
    /// Stable class name used in Error-event reasons
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::InvalidTransition { .. } => "InvalidTransition",
            Self::ActionUidMismatch { .. } => "ActionUidMismatch",
            Self::LatestResolution { .. } => "LatestResolutionFailure",
        }
    }
}
