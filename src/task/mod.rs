//! Task domain: the administrative work item and its lifecycle state machine.

pub mod model;
pub mod state_machine;

pub use model::{
    Actor, AgentKind, DocumentKind, DocumentRef, Task, TaskPriority, TaskSpec, TaskState,
    TaskStateTransition,
};
pub use state_machine::StateMachine;
