mod state;

pub use state::{OrchestrationStateMachine, TaskState, Trigger};
