pub mod status;

pub use status::{StatusRepo, StatusSummary};
