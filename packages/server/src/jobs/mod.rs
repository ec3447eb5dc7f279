//! The durable job queue: row models, the SQL store, and the background
//! maintenance loops.

pub mod maintenance;
pub mod model;
pub mod store;

pub use model::{AttemptRow, JobRow};
pub use store::{CancelOutcome, JobStore, TransitionOutcome};
