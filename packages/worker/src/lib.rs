//! Executr worker: claims jobs from the coordinator, fetches and
//! verifies their binaries, runs them in isolated directories, and
//! reports results.

pub mod cache;
pub mod config;
pub mod output;
pub mod runner;
pub mod worker;

pub use cache::{BinaryCache, PrepError};
pub use config::Config;
pub use runner::{ExecutionRequest, ExecutionResult};
pub use worker::Worker;
