//! Worker state and startup reporting types.

use serde::{Deserialize, Serialize};

/// Observed state of the model server.
///
/// Always derived on demand from a readiness probe plus a process-alive
/// check - the worker can die or come up outside this process's control
/// (e.g. started by another host instance), so nothing here is cached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerState {
    /// Nothing spawned and nothing answering on the address.
    #[default]
    NotStarted,
    /// A process is alive but not answering the socket yet.
    Starting,
    /// Answering the readiness probe.
    Ready,
    /// Spawned by us, stopped by us.
    Stopped,
    /// Startup gave up before the worker became ready.
    Failed,
}

/// Status of one autostart attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartStatus {
    Skipped,
    Starting,
    Succeeded,
    Failed,
}

/// Record of the most recent autostart attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartReport {
    /// When the attempt started (ISO 8601 format).
    pub started_at: String,
    /// When the attempt finished (ISO 8601 format), if it has.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    pub status: StartStatus,
    /// Human-readable outcome detail (skip reason, failure message).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StartReport {
    /// Create a report with the current time as started_at.
    pub fn starting() -> Self {
        Self {
            started_at: chrono::Utc::now().to_rfc3339(),
            completed_at: None,
            status: StartStatus::Starting,
            detail: None,
        }
    }

    /// Record that autostart was skipped (disabled, or worker already live).
    pub fn skipped(reason: impl Into<String>) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            started_at: now.clone(),
            completed_at: Some(now),
            status: StartStatus::Skipped,
            detail: Some(reason.into()),
        }
    }

    /// Mark the attempt as succeeded.
    pub fn succeeded(mut self) -> Self {
        self.completed_at = Some(chrono::Utc::now().to_rfc3339());
        self.status = StartStatus::Succeeded;
        self
    }

    /// Mark the attempt as failed with a reason.
    pub fn failed(mut self, reason: impl Into<String>) -> Self {
        self.completed_at = Some(chrono::Utc::now().to_rfc3339());
        self.status = StartStatus::Failed;
        self.detail = Some(reason.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_state_default_is_not_started() {
        assert_eq!(WorkerState::default(), WorkerState::NotStarted);
    }

    #[test]
    fn worker_state_serializes_screaming_snake_case() {
        assert_eq!(
            serde_json::to_value([
                WorkerState::NotStarted,
                WorkerState::Starting,
                WorkerState::Ready,
                WorkerState::Stopped,
                WorkerState::Failed,
            ])
            .unwrap(),
            serde_json::json!(["NOT_STARTED", "STARTING", "READY", "STOPPED", "FAILED"])
        );
    }

    #[test]
    fn worker_state_deserializes_screaming_snake_case() {
        assert_eq!(
            serde_json::from_str::<WorkerState>("\"READY\"").unwrap(),
            WorkerState::Ready
        );
        assert_eq!(
            serde_json::from_str::<WorkerState>("\"NOT_STARTED\"").unwrap(),
            WorkerState::NotStarted
        );
    }

    #[test]
    fn start_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(StartStatus::Succeeded).unwrap(),
            serde_json::json!("succeeded")
        );
    }

    #[test]
    fn report_lifecycle() {
        let report = StartReport::starting();
        assert_eq!(report.status, StartStatus::Starting);
        assert!(report.completed_at.is_none());

        let report = report.succeeded();
        assert_eq!(report.status, StartStatus::Succeeded);
        assert!(report.completed_at.is_some());
    }

    #[test]
    fn failed_report_carries_reason() {
        let report = StartReport::starting().failed("startup timed out");
        assert_eq!(report.status, StartStatus::Failed);
        assert_eq!(report.detail.as_deref(), Some("startup timed out"));
    }

    #[test]
    fn skipped_report_serializes_detail() {
        let value = serde_json::to_value(StartReport::skipped("autostart disabled")).unwrap();
        assert_eq!(value["status"], "skipped");
        assert_eq!(value["detail"], "autostart disabled");
    }
}
