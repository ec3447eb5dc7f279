//! Plain-text metrics exposition derived from the queue aggregates.

use axum::extract::Extension;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use executr_api::StatsResponse;

use crate::error::ApiError;
use crate::server::app::AppState;

/// `GET /api/v1/metrics`
pub async fn metrics_handler(Extension(state): Extension<AppState>) -> Result<Response, ApiError> {
    let stats = state.store.stats().await?;
    let body = render_metrics(&stats);

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}

/// Render the aggregates in the Prometheus text exposition format.
fn render_metrics(stats: &StatsResponse) -> String {
    let mut out = String::new();

    out.push_str("# HELP executr_jobs Number of jobs by status.\n");
    out.push_str("# TYPE executr_jobs gauge\n");
    let mut by_status: Vec<_> = stats.jobs_by_status.iter().collect();
    by_status.sort();
    for (status, count) in by_status {
        out.push_str(&format!("executr_jobs{{status=\"{}\"}} {}\n", status, count));
    }

    out.push_str("# HELP executr_pending_jobs Pending jobs by priority.\n");
    out.push_str("# TYPE executr_pending_jobs gauge\n");
    let mut by_priority: Vec<_> = stats.pending_by_priority.iter().collect();
    by_priority.sort();
    for (priority, count) in by_priority {
        out.push_str(&format!(
            "executr_pending_jobs{{priority=\"{}\"}} {}\n",
            priority, count
        ));
    }

    out.push_str("# HELP executr_active_executors Executors with running jobs.\n");
    out.push_str("# TYPE executr_active_executors gauge\n");
    out.push_str(&format!(
        "executr_active_executors {}\n",
        stats.active_executors
    ));

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    #[test]
    fn renders_all_sections() {
        let stats = StatsResponse {
            jobs_by_status: HashMap::from([
                ("pending".to_string(), 3),
                ("running".to_string(), 1),
            ]),
            pending_by_priority: HashMap::from([("foreground".to_string(), 2)]),
            active_executors: 1,
            timestamp: Utc::now(),
        };

        let body = render_metrics(&stats);
        assert!(body.contains("executr_jobs{status=\"pending\"} 3"));
        assert!(body.contains("executr_jobs{status=\"running\"} 1"));
        assert!(body.contains("executr_pending_jobs{priority=\"foreground\"} 2"));
        assert!(body.contains("executr_active_executors 1"));
    }

    #[test]
    fn output_is_sorted_and_stable() {
        let stats = StatsResponse {
            jobs_by_status: HashMap::from([
                ("running".to_string(), 1),
                ("completed".to_string(), 2),
                ("pending".to_string(), 3),
            ]),
            pending_by_priority: HashMap::new(),
            active_executors: 0,
            timestamp: Utc::now(),
        };

        let body = render_metrics(&stats);
        let completed = body.find("status=\"completed\"").unwrap();
        let pending = body.find("status=\"pending\"").unwrap();
        let running = body.find("status=\"running\"").unwrap();
        assert!(completed < pending && pending < running);
    }
}
