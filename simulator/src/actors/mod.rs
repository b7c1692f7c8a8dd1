pub mod orchestrator;

pub use orchestrator::{OrchestratorActor, OrchestratorArguments, OrchestratorMsg};
