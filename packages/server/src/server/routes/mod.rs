pub mod admin;
pub mod health;
pub mod jobs;
pub mod metrics;

pub use admin::{admin_executors_handler, admin_stats_handler};
pub use health::health_handler;
pub use jobs::{
    bulk_cancel_handler, bulk_submit_handler, cancel_handler, claim_handler, complete_handler,
    fail_handler, get_handler, heartbeat_handler, list_handler, submit_handler,
};
pub use metrics::metrics_handler;
