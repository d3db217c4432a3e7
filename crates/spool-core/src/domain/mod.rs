//! Domain model (IDs, status, task record, outcomes, decisions).

pub mod decision;
pub mod ids;
pub mod outcome;
pub mod submit;
pub mod state;
pub mod task;

pub use decision::{Decider, Decision, DefaultDecider};
pub use ids::TaskId;
pub use outcome::{AttemptFailure, AttemptOutcome, FailureKind};
pub use submit::{Parameters, SubmitOptions};
pub use state::TaskStatus;
pub use task::{DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT, Task};
