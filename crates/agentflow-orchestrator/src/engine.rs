use crate::classifier::{StagePlan, TaskClassifier};
use crate::config::ExecutionConfig;
use crate::stage::{
    simulated_factory, ExecutorFactory, Review, StageContext, StageOutput, StageReporter,
};
use crate::store::{record_log, ProgressStore};
use agentflow_core::{
    AgentRole, AgentStatus, AgentflowError, AgentflowResult, ErrorStrategy, Job, JobId, JobResult,
    JobStatus, LogEntry, LogLevel,
};
use futures_util::future::join_all;
use indexmap::IndexMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Knobs fixed per job at submission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub strategy: ErrorStrategy,
}

/// Read-only facts about a job that every stage of one run needs.
struct RunScope {
    job_id: JobId,
    task: String,
    max_iterations: u32,
    plan: Arc<StagePlan>,
    strategy: ErrorStrategy,
}

/// Drives jobs through their stage plan.
///
/// Implements the plan → execute → review → synthesize loop. The
/// orchestrator is the only writer of the jobs it runs; readers go through
/// the [`ProgressStore`].
pub struct Orchestrator {
    store: Arc<ProgressStore>,
    factory: ExecutorFactory,
    classifier: TaskClassifier,
    config: ExecutionConfig,
}

impl Orchestrator {
    /// Create an orchestrator backed by the simulated stage executor.
    pub fn new(store: Arc<ProgressStore>, config: ExecutionConfig) -> Self {
        let factory = simulated_factory(config.step_delay());
        Self::with_factory(store, config, factory)
    }

    /// Create with custom stage executors.
    pub fn with_factory(
        store: Arc<ProgressStore>,
        config: ExecutionConfig,
        factory: ExecutorFactory,
    ) -> Self {
        Self {
            store,
            factory,
            classifier: TaskClassifier::new(),
            config,
        }
    }

    /// Get a reference to the progress store.
    pub fn store(&self) -> &Arc<ProgressStore> {
        &self.store
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Classify `task` into a stage plan.
    pub fn plan(&self, task: &str) -> StagePlan {
        self.classifier
            .classify(task, self.config.parallel_execution_enabled)
    }

    /// Build a pending job with every planned agent registered in plan order.
    pub fn prepare(&self, task: &str, max_iterations: u32) -> (Job, StagePlan) {
        let plan = self.plan(task);
        let mut job = Job::new(task, max_iterations);
        for role in plan.roles() {
            job.register_agent(role);
        }
        let stages = plan
            .groups
            .iter()
            .map(|group| {
                group
                    .iter()
                    .map(AgentRole::as_str)
                    .collect::<Vec<_>>()
                    .join(" + ")
            })
            .collect::<Vec<_>>()
            .join(" -> ");
        record_log(
            &mut job,
            LogEntry::system(LogLevel::Info, format!("Job queued; stage plan: {stages}")),
        );
        (job, plan)
    }

    /// Run the whole pipeline for an already stored job.
    ///
    /// Always leaves the job in a terminal state and returns that state.
    /// Errors are returned only when the store itself cannot be reached.
    pub async fn run(
        &self,
        job_id: JobId,
        plan: StagePlan,
        options: RunOptions,
    ) -> AgentflowResult<JobStatus> {
        let start = Instant::now();
        let strategy = options.strategy;

        let (task, max_iterations) = self
            .store
            .update(job_id, |job| {
                job.transition(JobStatus::InProgress)?;
                job.current_step = "Starting".to_string();
                let message = format!(
                    "Execution started (max {} iteration(s), {strategy})",
                    job.max_iterations
                );
                record_log(job, LogEntry::system(LogLevel::Info, message));
                Ok((job.task.clone(), job.max_iterations))
            })
            .await?;

        info!(job_id = %job_id, task = %task, "Orchestrator: starting pipeline");

        let scope = RunScope {
            job_id,
            task,
            max_iterations,
            plan: Arc::new(plan),
            strategy,
        };

        let limit = self.config.max_execution_time();
        let outcome = match tokio::time::timeout(limit, self.execute(&scope)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(AgentflowError::PipelineFailure(format!(
                "exceeded maximum execution time of {} minute(s)",
                self.config.max_execution_time_minutes
            ))),
        };

        let status = match outcome {
            Ok((outputs, iteration)) => {
                self.finalize(&scope, outputs, iteration).await?;
                JobStatus::Completed
            }
            Err(e) => {
                let reason = match e {
                    AgentflowError::PipelineFailure(reason) => reason,
                    other => other.to_string(),
                };
                self.fail_job(job_id, &reason).await?;
                JobStatus::Error
            }
        };

        info!(
            job_id = %job_id,
            status = %status,
            duration_ms = start.elapsed().as_millis() as u64,
            "Orchestrator: pipeline finished"
        );
        Ok(status)
    }

    /// Walk the plan group by group, looping back when oversight asks for a revision.
    async fn execute(
        &self,
        scope: &RunScope,
    ) -> AgentflowResult<(IndexMap<AgentRole, StageOutput>, u32)> {
        let plan = scope.plan.clone();
        let mut outputs: IndexMap<AgentRole, StageOutput> = IndexMap::new();
        let mut feedback: Option<String> = None;
        let mut iteration = 1;
        let mut idx = 0;

        while idx < plan.groups.len() {
            let group = &plan.groups[idx];
            let finished = self
                .run_group(scope, group, &outputs, iteration, feedback.as_deref())
                .await?;
            outputs.extend(finished);

            let review = group
                .contains(&AgentRole::OversightManager)
                .then(|| outputs.get(&AgentRole::OversightManager))
                .flatten()
                .and_then(|out| out.review.clone());

            if let Some(Review::Revise { targets, feedback: notes }) = review {
                let restart = targets
                    .iter()
                    .filter_map(|role| plan.group_of(*role))
                    .filter(|g| *g < idx)
                    .min();

                match restart {
                    Some(restart) if iteration < scope.max_iterations => {
                        iteration += 1;
                        let roles: Vec<AgentRole> =
                            plan.groups[restart..].iter().flatten().copied().collect();
                        self.begin_revision(scope, &roles, &targets, &notes, iteration)
                            .await?;
                        for role in &roles {
                            outputs.shift_remove(role);
                        }
                        feedback = Some(notes);
                        idx = restart;
                        continue;
                    }
                    Some(_) => {
                        self.system_log(
                            scope.job_id,
                            LogLevel::Warning,
                            format!(
                                "Revision requested but iteration budget ({}) is exhausted; finalizing",
                                scope.max_iterations
                            ),
                        )
                        .await?;
                    }
                    None => {
                        self.system_log(
                            scope.job_id,
                            LogLevel::Warning,
                            "Revision targets are not earlier stages of this plan; finalizing",
                        )
                        .await?;
                    }
                }
            }

            idx += 1;
        }

        Ok((outputs, iteration))
    }

    /// Run every stage of one group concurrently and collect the outputs.
    async fn run_group(
        &self,
        scope: &RunScope,
        group: &[AgentRole],
        outputs: &IndexMap<AgentRole, StageOutput>,
        iteration: u32,
        feedback: Option<&str>,
    ) -> AgentflowResult<Vec<(AgentRole, StageOutput)>> {
        if group.len() > 1 {
            let names: Vec<&str> = group.iter().map(AgentRole::as_str).collect();
            self.system_log(
                scope.job_id,
                LogLevel::Info,
                format!("Running {} in parallel", names.join(" and ")),
            )
            .await?;
        }

        let runs = group
            .iter()
            .map(|role| self.run_stage(scope, *role, outputs, iteration, feedback));
        let results = join_all(runs).await;

        let mut finished = Vec::new();
        let mut failure = None;
        for (role, result) in group.iter().zip(results) {
            match result {
                Ok(Some(output)) => finished.push((*role, output)),
                Ok(None) => {}
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(finished),
        }
    }

    /// Run one stage, applying the error strategy on failure.
    ///
    /// Returns `Ok(None)` when the stage failed and was skipped.
    async fn run_stage(
        &self,
        scope: &RunScope,
        role: AgentRole,
        outputs: &IndexMap<AgentRole, StageOutput>,
        iteration: u32,
        feedback: Option<&str>,
    ) -> AgentflowResult<Option<StageOutput>> {
        let executor = (self.factory)(role);
        let plan = scope.plan.clone();
        let mut attempt = 1;

        loop {
            self.store
                .update(scope.job_id, |job| {
                    job.agent_mut(role)?
                        .start(format!("{} (iteration {iteration})", role.label()))?;
                    job.current_step = describe_step(job);
                    record_log(
                        job,
                        LogEntry::system(
                            LogLevel::Info,
                            format!(
                                "{} started (iteration {iteration}, attempt {attempt})",
                                role.label()
                            ),
                        ),
                    );
                    Ok(())
                })
                .await?;

            let ctx = StageContext {
                job_id: scope.job_id,
                task: scope.task.clone(),
                role,
                iteration,
                attempt,
                deliverables: plan.deliverables.clone(),
                prior_outputs: outputs.clone(),
                feedback: feedback.map(str::to_string),
            };
            let reporter = StageReporter::new(self.store.clone(), plan.clone(), scope.job_id, role);

            match executor.execute(&ctx, &reporter).await {
                Ok(output) => {
                    let summary = output.summary.clone();
                    let plan = plan.clone();
                    self.store
                        .update(scope.job_id, move |job| {
                            job.agent_mut(role)?.complete()?;
                            record_log(
                                job,
                                LogEntry::new(
                                    role,
                                    LogLevel::Success,
                                    format!("{} completed: {summary}", role.label()),
                                ),
                            );
                            let overall = plan.overall_progress(job);
                            job.advance_progress(overall);
                            job.current_step = describe_step(job);
                            Ok(())
                        })
                        .await?;
                    return Ok(Some(output));
                }
                Err(e) => {
                    let reason = e.to_string();
                    warn!(
                        job_id = %scope.job_id,
                        role = %role,
                        attempt,
                        error = %reason,
                        "Stage failed"
                    );

                    let retry = scope.strategy == ErrorStrategy::RetryOnError
                        && attempt < scope.max_iterations;
                    let strategy = scope.strategy;
                    let max = scope.max_iterations;
                    let plan = plan.clone();
                    let failure_reason = reason.clone();
                    self.store
                        .update(scope.job_id, move |job| {
                            job.agent_mut(role)?.fail(failure_reason.clone())?;
                            record_log(
                                job,
                                LogEntry::new(
                                    role,
                                    LogLevel::Error,
                                    format!("{} failed: {failure_reason}", role.label()),
                                ),
                            );
                            if retry {
                                job.agent_mut(role)?.reset("Retrying")?;
                                record_log(
                                    job,
                                    LogEntry::system(
                                        LogLevel::Warning,
                                        format!(
                                            "Retrying {} (attempt {} of {max})",
                                            role.label(),
                                            attempt + 1
                                        ),
                                    ),
                                );
                            } else if strategy == ErrorStrategy::ContinueOnError {
                                record_log(
                                    job,
                                    LogEntry::system(
                                        LogLevel::Warning,
                                        format!("Continuing without {}", role.label()),
                                    ),
                                );
                                let overall = plan.overall_progress(job);
                                job.advance_progress(overall);
                            }
                            Ok(())
                        })
                        .await?;

                    if retry {
                        attempt += 1;
                        continue;
                    }
                    return match scope.strategy {
                        ErrorStrategy::ContinueOnError => Ok(None),
                        ErrorStrategy::RetryOnError => {
                            Err(AgentflowError::PipelineFailure(format!(
                                "{} failed after {attempt} attempt(s): {reason}",
                                role.label()
                            )))
                        }
                        ErrorStrategy::StopOnError => Err(AgentflowError::PipelineFailure(
                            format!("{} failed: {reason}", role.label()),
                        )),
                    };
                }
            }
        }
    }

    /// Reset `roles` to pending and bump the job's iteration counter.
    async fn begin_revision(
        &self,
        scope: &RunScope,
        roles: &[AgentRole],
        targets: &[AgentRole],
        notes: &str,
        iteration: u32,
    ) -> AgentflowResult<()> {
        let max = scope.max_iterations;
        let target_names: Vec<&str> = targets.iter().map(AgentRole::as_str).collect();
        info!(
            job_id = %scope.job_id,
            iteration,
            targets = ?target_names,
            "Oversight requested a revision"
        );
        self.store
            .update(scope.job_id, |job| {
                job.iteration = iteration;
                for role in roles {
                    job.agent_mut(*role)?
                        .reset(format!("Revision requested: {notes}"))?;
                }
                job.current_step = format!("Revision {iteration} of {max}");
                record_log(
                    job,
                    LogEntry::new(
                        AgentRole::OversightManager,
                        LogLevel::Warning,
                        format!(
                            "Revision requested for {}: {notes}",
                            target_names.join(", ")
                        ),
                    ),
                );
                record_log(
                    job,
                    LogEntry::system(
                        LogLevel::Info,
                        format!("Starting iteration {iteration} of {max}"),
                    ),
                );
                Ok(())
            })
            .await
    }

    /// Synthesize the result and complete the job.
    async fn finalize(
        &self,
        scope: &RunScope,
        outputs: IndexMap<AgentRole, StageOutput>,
        iteration: u32,
    ) -> AgentflowResult<()> {
        let task = scope.task.clone();
        self.store
            .update(scope.job_id, move |job| {
                let skipped = job
                    .agents
                    .values()
                    .filter(|state| state.status == AgentStatus::Failed)
                    .count();
                let deliverables: Vec<_> = outputs
                    .values()
                    .flat_map(|out| out.deliverables.iter().cloned())
                    .collect();
                let mut summary = format!(
                    "Completed '{task}' in {iteration} iteration(s): {} agent(s) finished, {} deliverable(s) produced",
                    outputs.len(),
                    deliverables.len()
                );
                if skipped > 0 {
                    summary.push_str(&format!(", {skipped} stage(s) skipped after errors"));
                }
                if let Some(Review::Approved { notes }) = outputs
                    .get(&AgentRole::OversightManager)
                    .and_then(|out| out.review.as_ref())
                {
                    summary.push_str(&format!(". Oversight: {notes}"));
                }
                let agent_results = outputs
                    .iter()
                    .map(|(role, out)| (*role, out.summary.clone()))
                    .collect();

                let deliverable_count = deliverables.len();
                job.complete(JobResult {
                    summary,
                    deliverables,
                    agent_results,
                    iterations: iteration,
                })?;
                record_log(
                    job,
                    LogEntry::system(
                        LogLevel::Success,
                        format!("Task completed with {deliverable_count} deliverable(s)"),
                    ),
                );
                Ok(())
            })
            .await
    }

    /// Move a live job to `error`, failing any stage still executing.
    pub(crate) async fn fail_job(&self, job_id: JobId, reason: &str) -> AgentflowResult<()> {
        error!(job_id = %job_id, reason = %reason, "Orchestrator: pipeline failed");
        self.store
            .update(job_id, |job| {
                if job.is_terminal() {
                    return Ok(());
                }
                for state in job.agents.values_mut() {
                    if state.status == AgentStatus::Executing {
                        state.fail("Aborted")?;
                    }
                }
                job.fail(reason)?;
                record_log(
                    job,
                    LogEntry::system(LogLevel::Error, format!("Pipeline failed: {reason}")),
                );
                Ok(())
            })
            .await
    }

    async fn system_log(
        &self,
        job_id: JobId,
        level: LogLevel,
        message: impl Into<String>,
    ) -> AgentflowResult<()> {
        let entry = LogEntry::system(level, message);
        self.store
            .update(job_id, move |job| {
                record_log(job, entry);
                Ok(())
            })
            .await
    }
}

/// Human-readable label of the stages currently executing.
fn describe_step(job: &Job) -> String {
    let active: Vec<&str> = job
        .agents
        .iter()
        .filter(|(_, state)| state.status == AgentStatus::Executing)
        .map(|(role, _)| role.label())
        .collect();
    if active.is_empty() {
        job.current_step.clone()
    } else {
        active.join(" + ")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(
            Arc::new(ProgressStore::new()),
            ExecutionConfig {
                stage_step_delay_ms: 1,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_prepare_registers_planned_agents() {
        let orch = orchestrator();
        let (job, plan) = orch.prepare("Research X", 3);
        let roles: Vec<_> = job.agents.keys().copied().collect();
        assert_eq!(roles, plan.roles().collect::<Vec<_>>());
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.logs.len(), 1);
        assert!(job.logs[0].message.contains("research_analyst"));
    }

    #[tokio::test]
    async fn test_run_simulated_pipeline() {
        let orch = orchestrator();
        let (job, plan) = orch.prepare("Research X", 3);
        let id = orch.store().insert(job).await;

        let status = orch
            .run(
                id,
                plan,
                RunOptions {
                    strategy: ErrorStrategy::StopOnError,
                },
            )
            .await
            .unwrap();
        assert_eq!(status, JobStatus::Completed);

        let job = orch.store().get(id).await.unwrap();
        assert_eq!(job.progress, 100);
        let result = job.result.unwrap();
        assert!(result.summary.contains("Research X"));
        assert_eq!(result.agent_results.len(), 4);
        assert_eq!(result.deliverables.len(), 1);
        assert!(job
            .agents
            .values()
            .all(|state| state.status == AgentStatus::Completed));
    }

    #[tokio::test]
    async fn test_run_on_finished_job_is_rejected() {
        let orch = orchestrator();
        let (job, plan) = orch.prepare("Research X", 3);
        let id = orch.store().insert(job).await;
        orch.fail_job(id, "cancelled").await.unwrap();

        let err = orch
            .run(
                id,
                plan,
                RunOptions {
                    strategy: ErrorStrategy::StopOnError,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AgentflowError::InvalidTransition(_)));
    }

    #[test]
    fn test_describe_step_joins_parallel_labels() {
        let mut job = Job::new("t", 3);
        job.register_agent(AgentRole::ContentCreator);
        job.register_agent(AgentRole::DataAnalyst);
        job.agent_mut(AgentRole::ContentCreator)
            .unwrap()
            .start("a")
            .unwrap();
        job.agent_mut(AgentRole::DataAnalyst)
            .unwrap()
            .start("b")
            .unwrap();
        assert_eq!(describe_step(&job), "Content Creator + Data Analyst");
    }
}
