use crate::classifier::{DeliverableKind, StagePlan};
use crate::store::{record_log, ProgressStore};
use agentflow_core::{
    AgentRole, AgentflowResult, Deliverable, JobId, LogEntry, LogLevel, ReportSection,
};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Verdict of the oversight stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Review {
    Approved { notes: String },
    /// Send `targets` (and everything after them) back for another pass.
    Revise {
        targets: Vec<AgentRole>,
        feedback: String,
    },
}

/// What a stage hands to the next ones.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StageOutput {
    pub summary: String,
    pub deliverables: Vec<Deliverable>,
    /// Only set by the oversight stage.
    pub review: Option<Review>,
}

impl StageOutput {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            ..Default::default()
        }
    }

    pub fn with_deliverables(mut self, deliverables: Vec<Deliverable>) -> Self {
        self.deliverables = deliverables;
        self
    }

    pub fn with_review(mut self, review: Review) -> Self {
        self.review = Some(review);
        self
    }
}

/// Everything a stage executor needs to do one unit of work.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub job_id: JobId,
    pub task: String,
    pub role: AgentRole,
    pub iteration: u32,
    /// 1-based attempt within this iteration (retries bump it).
    pub attempt: u32,
    pub deliverables: Vec<DeliverableKind>,
    /// Outputs of stages that already completed, in invocation order.
    pub prior_outputs: IndexMap<AgentRole, StageOutput>,
    /// Oversight feedback from the previous iteration, if any.
    pub feedback: Option<String>,
}

/// Lets a running stage publish sub-progress into the progress store.
#[derive(Clone)]
pub struct StageReporter {
    store: Arc<ProgressStore>,
    plan: Arc<StagePlan>,
    job_id: JobId,
    role: AgentRole,
}

impl StageReporter {
    pub(crate) fn new(
        store: Arc<ProgressStore>,
        plan: Arc<StagePlan>,
        job_id: JobId,
        role: AgentRole,
    ) -> Self {
        Self {
            store,
            plan,
            job_id,
            role,
        }
    }

    /// Update the agent's local progress and current task, and the job's
    /// weighted overall progress, in one atomic store update.
    pub async fn progress(
        &self,
        percent: u8,
        current_task: impl Into<String>,
    ) -> AgentflowResult<()> {
        let role = self.role;
        let plan = self.plan.clone();
        let current_task = current_task.into();
        self.store
            .update(self.job_id, move |job| {
                job.agent_mut(role)?.report(percent, current_task);
                let overall = plan.overall_progress(job);
                job.advance_progress(overall);
                Ok(())
            })
            .await
    }

    /// Append a log entry attributed to this stage's agent.
    pub async fn log(&self, level: LogLevel, message: impl Into<String>) -> AgentflowResult<()> {
        let entry = LogEntry::new(self.role, level, message);
        self.store
            .update(self.job_id, move |job| {
                record_log(job, entry);
                Ok(())
            })
            .await
    }
}

/// One agent role's implementation.
///
/// Implementations are opaque calls with eventual success or failure; the
/// orchestrator owns every status transition around them.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    async fn execute(
        &self,
        ctx: &StageContext,
        reporter: &StageReporter,
    ) -> AgentflowResult<StageOutput>;
}

/// Produces the executor for each role.
pub type ExecutorFactory = Arc<dyn Fn(AgentRole) -> Arc<dyn StageExecutor> + Send + Sync>;

/// Factory returning a [`SimulatedExecutor`] for every role.
pub fn simulated_factory(step_delay: Duration) -> ExecutorFactory {
    let executor: Arc<dyn StageExecutor> = Arc::new(SimulatedExecutor::new(step_delay));
    Arc::new(move |_role| executor.clone())
}

/// Built-in executor that walks through canned sub-steps for each role.
///
/// Stands in for the external agent and tool calls; it reports progress the
/// same way a real executor would and builds deliverables from the plan.
pub struct SimulatedExecutor {
    step_delay: Duration,
}

impl SimulatedExecutor {
    pub fn new(step_delay: Duration) -> Self {
        Self { step_delay }
    }

    fn steps(role: AgentRole) -> &'static [&'static str] {
        match role {
            AgentRole::ResearchAnalyst => &[
                "Collecting sources",
                "Cross-checking facts",
                "Identifying trends",
                "Summarizing findings",
            ],
            AgentRole::ContentCreator => &[
                "Outlining structure",
                "Drafting copy",
                "Editing for tone",
            ],
            AgentRole::DataAnalyst => &[
                "Loading datasets",
                "Computing statistics",
                "Building charts",
            ],
            AgentRole::ExecutionAgent => &[
                "Assembling documents",
                "Rendering deliverables",
            ],
            AgentRole::OversightManager => &["Assessing quality", "Writing feedback"],
        }
    }

    fn build_deliverables(ctx: &StageContext) -> Vec<Deliverable> {
        let title = ctx.task.chars().take(80).collect::<String>();
        ctx.deliverables
            .iter()
            .map(|kind| match kind {
                DeliverableKind::Presentation => Deliverable::Presentation {
                    title: title.clone(),
                    slides: ctx
                        .prior_outputs
                        .iter()
                        .map(|(role, out)| format!("{}: {}", role.label(), out.summary))
                        .collect(),
                },
                DeliverableKind::Report => Deliverable::Report {
                    title: title.clone(),
                    sections: ctx
                        .prior_outputs
                        .iter()
                        .map(|(role, out)| ReportSection {
                            heading: role.label().to_string(),
                            body: out.summary.clone(),
                        })
                        .collect(),
                },
                DeliverableKind::Dataset => Deliverable::Dataset {
                    name: "analysis".to_string(),
                    columns: vec!["metric".to_string(), "value".to_string()],
                    rows: vec![
                        vec!["sources_reviewed".into(), 12.into()],
                        vec!["iteration".into(), ctx.iteration.into()],
                    ],
                },
                DeliverableKind::Content => Deliverable::Content {
                    title: title.clone(),
                    format: "markdown".to_string(),
                    body: ctx
                        .prior_outputs
                        .get(&AgentRole::ContentCreator)
                        .map(|out| out.summary.clone())
                        .unwrap_or_default(),
                },
            })
            .collect()
    }
}

#[async_trait]
impl StageExecutor for SimulatedExecutor {
    async fn execute(
        &self,
        ctx: &StageContext,
        reporter: &StageReporter,
    ) -> AgentflowResult<StageOutput> {
        let steps = Self::steps(ctx.role);
        for (i, step) in steps.iter().enumerate() {
            tokio::time::sleep(self.step_delay).await;
            let percent = ((i + 1) * 100 / steps.len()).min(99) as u8;
            reporter.progress(percent, *step).await?;
            reporter.log(LogLevel::Info, format!("{step}...")).await?;
        }

        let output = match ctx.role {
            AgentRole::ResearchAnalyst => {
                StageOutput::new(format!("Research brief for '{}'", ctx.task))
            }
            AgentRole::ContentCreator => StageOutput::new(match &ctx.feedback {
                Some(feedback) => format!("Revised draft addressing: {feedback}"),
                None => "Draft content ready".to_string(),
            }),
            AgentRole::DataAnalyst => StageOutput::new("Key metrics and trend analysis"),
            AgentRole::ExecutionAgent => StageOutput::new(format!(
                "Generated {} deliverable(s)",
                ctx.deliverables.len()
            ))
            .with_deliverables(Self::build_deliverables(ctx)),
            AgentRole::OversightManager => {
                StageOutput::new("Quality check passed").with_review(Review::Approved {
                    notes: format!("Approved at iteration {}", ctx.iteration),
                })
            }
        };
        Ok(output)
    }
}
