//! Executr coordinator: the durable job queue, its HTTP API, and the
//! background maintenance loops.

pub mod config;
pub mod error;
pub mod jobs;
pub mod server;

pub use config::Config;
pub use error::ApiError;
