use crate::job::{JobId, JobResult, JobStatus, JobSummary};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How the orchestrator reacts to a failed stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStrategy {
    /// Abort the pipeline and fail the job.
    #[default]
    StopOnError,
    /// Mark the stage failed and move on.
    ContinueOnError,
    /// Re-run the stage, bounded by the job's `max_iterations`.
    RetryOnError,
}

impl fmt::Display for ErrorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorStrategy::StopOnError => "stop_on_error",
            ErrorStrategy::ContinueOnError => "continue_on_error",
            ErrorStrategy::RetryOnError => "retry_on_error",
        };
        f.write_str(s)
    }
}

fn default_max_iterations() -> u32 {
    5
}

fn default_async() -> bool {
    true
}

/// Body of `POST /api/orchestration/execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub task: String,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// `false` waits for the pipeline and returns the result inline.
    #[serde(rename = "async", default = "default_async")]
    pub run_async: bool,
    /// Per-job override of the configured strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_handling_strategy: Option<ErrorStrategy>,
}

impl SubmitRequest {
    pub fn new(task: impl Into<String>, max_iterations: u32) -> Self {
        Self {
            task: task.into(),
            max_iterations,
            run_async: true,
            error_handling_strategy: None,
        }
    }
}

/// Response of `POST /api/orchestration/execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub execution_id: JobId,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Error document returned on 4xx/5xx.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Aggregate counters over the jobs currently held in the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub total: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    /// Percentage of finished jobs that completed, 0.0 when none finished.
    pub success_rate: f64,
}

impl ExecutionStats {
    pub fn from_summaries(summaries: &[JobSummary]) -> Self {
        let mut stats = ExecutionStats {
            total: summaries.len(),
            ..Default::default()
        };
        for summary in summaries {
            match summary.status {
                JobStatus::Pending | JobStatus::InProgress => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Error => stats.failed += 1,
            }
        }
        let finished = stats.completed + stats.failed;
        if finished > 0 {
            stats.success_rate = stats.completed as f64 / finished as f64 * 100.0;
        }
        stats
    }
}

/// Response of `GET /api/executions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionList {
    pub executions: Vec<JobSummary>,
    pub stats: ExecutionStats,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::job::Job;

    #[test]
    fn test_submit_request_defaults() {
        let req: SubmitRequest = serde_json::from_str(r#"{"task":"Research X"}"#).unwrap();
        assert_eq!(req.max_iterations, 5);
        assert!(req.run_async);
        assert!(req.error_handling_strategy.is_none());
    }

    #[test]
    fn test_submit_request_sync_flag() {
        let req: SubmitRequest = serde_json::from_str(
            r#"{"task":"t","max_iterations":3,"async":false,"error_handling_strategy":"retry_on_error"}"#,
        )
        .unwrap();
        assert!(!req.run_async);
        assert_eq!(req.error_handling_strategy, Some(ErrorStrategy::RetryOnError));
    }

    #[test]
    fn test_stats_from_summaries() {
        let mut done = Job::new("a", 3);
        done.status = JobStatus::Completed;
        let mut failed = Job::new("b", 3);
        failed.status = JobStatus::Error;
        let live = Job::new("c", 3);
        let stats =
            ExecutionStats::from_summaries(&[done.summary(), failed.summary(), live.summary()]);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.running, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert!((stats.success_rate - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_stats_empty() {
        let stats = ExecutionStats::from_summaries(&[]);
        assert_eq!(stats.total, 0);
        assert_eq!(stats.success_rate, 0.0);
    }
}
