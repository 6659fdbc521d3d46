use crate::engine::{Orchestrator, RunOptions};
use agentflow_core::{AgentflowError, AgentflowResult, ErrorStrategy, JobId, JobStatus};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Handle to a job whose pipeline is running in the background.
pub struct JobHandle {
    pub id: JobId,
    join: JoinHandle<JobStatus>,
}

impl JobHandle {
    /// Wait for the pipeline to reach a terminal state.
    pub async fn wait(self) -> AgentflowResult<JobStatus> {
        self.join
            .await
            .map_err(|e| AgentflowError::PipelineFailure(format!("job task ended abnormally: {e}")))
    }
}

/// Validates submissions, stores the new job and starts its pipeline.
pub struct JobSubmitter {
    orchestrator: Arc<Orchestrator>,
}

impl JobSubmitter {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Check a submission without creating anything.
    pub fn validate(&self, task: &str, max_iterations: u32) -> AgentflowResult<()> {
        if task.trim().is_empty() {
            return Err(AgentflowError::InvalidArgument(
                "task must not be empty".to_string(),
            ));
        }
        let range = self.orchestrator.config().iteration_range();
        if !range.contains(&max_iterations) {
            return Err(AgentflowError::InvalidArgument(format!(
                "max_iterations must be between {} and {}, got {max_iterations}",
                range.start(),
                range.end()
            )));
        }
        Ok(())
    }

    /// Submit with the configured error strategy and return the job ID.
    pub async fn submit(&self, task: &str, max_iterations: u32) -> AgentflowResult<JobId> {
        self.submit_with(task, max_iterations, None)
            .await
            .map(|handle| handle.id)
    }

    /// Submit, optionally overriding the error strategy for this job.
    ///
    /// Returns as soon as the job is stored; the pipeline runs on its own task.
    pub async fn submit_with(
        &self,
        task: &str,
        max_iterations: u32,
        strategy: Option<ErrorStrategy>,
    ) -> AgentflowResult<JobHandle> {
        self.validate(task, max_iterations)?;

        let task = task.trim();
        let (job, plan) = self.orchestrator.prepare(task, max_iterations);
        let options = RunOptions {
            strategy: strategy.unwrap_or(self.orchestrator.config().error_handling_strategy),
        };
        let id = self.orchestrator.store().insert(job).await;
        info!(job_id = %id, max_iterations, strategy = %options.strategy, "Job submitted");

        let orchestrator = self.orchestrator.clone();
        let join = tokio::spawn(async move {
            let worker = {
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move { orchestrator.run(id, plan, options).await })
            };
            match worker.await {
                Ok(Ok(status)) => {
                    debug!(job_id = %id, status = %status, "Job task finished");
                    status
                }
                Ok(Err(e)) => {
                    error!(job_id = %id, error = %e, "Job could not be driven");
                    JobStatus::Error
                }
                Err(e) => {
                    error!(job_id = %id, error = %e, "Job task panicked");
                    if let Err(e) = orchestrator
                        .fail_job(id, "internal error while running the pipeline")
                        .await
                    {
                        error!(job_id = %id, error = %e, "Failed to mark job as errored");
                    }
                    JobStatus::Error
                }
            }
        });

        Ok(JobHandle { id, join })
    }
}
