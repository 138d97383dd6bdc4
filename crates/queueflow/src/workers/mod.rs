pub mod model;
pub mod repo;

pub use model::{Worker, WorkerStatus};
pub use repo::WorkersRepo;
