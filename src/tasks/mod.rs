//! Client-visible tasks
//!
//! [`TaskRegistry`] owns every task entry; [`TaskRunner`] is the only writer
//! after creation and drives the work in the background. Clients poll
//! [`TaskSnapshot`]s.

mod cancel;
mod models;
mod registry;
mod runner;

pub use cancel::{CancelHandle, CancelSignal, cancel_pair};
pub use models::{CandidateSummary, OutputFile, Task, TaskKind, TaskResult, TaskSnapshot, TaskStatus};
pub use registry::{RegistryError, TaskRegistry};
pub use runner::{MediaSource, RunnerError, TaskRunner};
