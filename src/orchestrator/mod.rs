//! Session job orchestration: queues, the job pipeline, liveness
//! reporting, and detached job supervision.

pub mod directive;
pub mod liveness;
pub mod pipeline;
pub mod prompt;
pub mod queue;
pub mod supervisor;

pub use pipeline::{JobPipeline, PipelineDeps};
pub use queue::{JobEvent, JobRunner, SessionJobQueue};
pub use supervisor::{DetachedJobSupervisor, SupervisorSettings};
