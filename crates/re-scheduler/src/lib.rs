//! Worker registry, heartbeat, load-balanced dispatch, and action-result
//! validation for the remote execution service.

pub mod execute;
pub mod metrics;
pub mod queue;
pub mod validate;
pub mod worker;

pub use execute::{execute, execution_id, ExecuteRequest, Stage};
pub use metrics::scheduler_metrics;
pub use queue::{run_worker_loop, Task, TaskQueue};
pub use validate::validate as validate_action_result;
pub use worker::{WorkerClient, WorkerEntry, WorkerId, WorkerRegistry};
