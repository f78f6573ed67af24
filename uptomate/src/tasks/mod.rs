pub mod queue;
pub mod task;

pub use queue::{CompletionHook, TaskQueue, TaskQueueOptions};
pub use task::{Task, TaskFilter, TaskHandle, TaskId, TaskStatus};
