pub mod executor;
pub mod input;
pub mod joblog;
pub mod model;
pub mod repo;
pub mod retry;
pub mod runner;

pub use executor::{CommandExecutor, ExecOutcome};
pub use input::{JobInput, SubmitDefaults};
pub use joblog::JobLog;
pub use model::{Job, JobState, NewJob};
pub use repo::{FailOutcome, JobsRepo};
pub use runner::{JobRunner, Resolution};
