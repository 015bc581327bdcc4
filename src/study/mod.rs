//! Study engine: planning, scheduling and per-node sessions.
//!
//! Core components:
//! - `task`: the (user, course) unit of work
//! - `planner`: builds tasks from configured accounts
//! - `session`: per-node state machine (watcher + heartbeat submitter)
//! - `scheduler`: bounded worker pool draining the task queue

pub mod planner;
pub mod scheduler;
pub mod session;
pub mod task;

pub use scheduler::{RunSummary, SchedulerDeps, TaskScheduler};
pub use session::{NodeOutcome, SessionDeps, StudySession};
pub use task::{ResolvedProgress, Task};
