use crate::error::{AgentflowError, AgentflowResult};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque job identifier, assigned at submission.
pub type JobId = Uuid;

/// Highest progress a job may report before it completes.
pub const MAX_LIVE_PROGRESS: u8 = 99;

/// Role of each agent in the delegation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Gathers background material for the task.
    ResearchAnalyst,
    /// Writes prose deliverables (posts, copy, report text).
    ContentCreator,
    /// Produces figures, tables and insights from data.
    DataAnalyst,
    /// Assembles the final artifacts.
    ExecutionAgent,
    /// Reviews the cumulative deliverable and may request revisions.
    OversightManager,
}

impl AgentRole {
    /// Every role, in canonical pipeline order.
    pub const ALL: [AgentRole; 5] = [
        AgentRole::ResearchAnalyst,
        AgentRole::ContentCreator,
        AgentRole::DataAnalyst,
        AgentRole::ExecutionAgent,
        AgentRole::OversightManager,
    ];

    /// Wire name of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::ResearchAnalyst => "research_analyst",
            AgentRole::ContentCreator => "content_creator",
            AgentRole::DataAnalyst => "data_analyst",
            AgentRole::ExecutionAgent => "execution_agent",
            AgentRole::OversightManager => "oversight_manager",
        }
    }

    /// Human-readable label, used for `current_step`.
    pub fn label(&self) -> &'static str {
        match self {
            AgentRole::ResearchAnalyst => "Research Analyst",
            AgentRole::ContentCreator => "Content Creator",
            AgentRole::DataAnalyst => "Data Analyst",
            AgentRole::ExecutionAgent => "Execution Agent",
            AgentRole::OversightManager => "Oversight Manager",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentRole {
    type Err = AgentflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentRole::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| AgentflowError::InvalidArgument(format!("unknown agent role '{s}'")))
    }
}

/// Overall job status. Moves only `pending → in_progress → {completed | error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Error,
}

impl JobStatus {
    /// `completed` and `error` admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }

    /// Whether `self → next` respects the monotone lifecycle.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::InProgress)
                | (JobStatus::Pending, JobStatus::Error)
                | (JobStatus::InProgress, JobStatus::Completed)
                | (JobStatus::InProgress, JobStatus::Error)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Status of a single agent stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

/// Per-role status, progress and current unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentState {
    pub status: AgentStatus,
    /// Local progress, 0–100.
    pub progress: u8,
    pub current_task: String,
    /// How many times this stage has been started (retries and revisions included).
    #[serde(default)]
    pub attempts: u32,
}

impl Default for AgentState {
    fn default() -> Self {
        Self {
            status: AgentStatus::Pending,
            progress: 0,
            current_task: "Waiting".to_string(),
            attempts: 0,
        }
    }
}

impl AgentState {
    /// `pending → executing`.
    pub fn start(&mut self, task: impl Into<String>) -> AgentflowResult<()> {
        if self.status != AgentStatus::Pending {
            return Err(AgentflowError::InvalidTransition(format!(
                "agent cannot start from {:?}",
                self.status
            )));
        }
        self.status = AgentStatus::Executing;
        self.progress = 0;
        self.current_task = task.into();
        self.attempts += 1;
        Ok(())
    }

    /// Record sub-progress while executing. Progress never goes backwards.
    pub fn report(&mut self, progress: u8, task: impl Into<String>) {
        if self.status != AgentStatus::Executing {
            return;
        }
        self.progress = self.progress.max(progress.min(100));
        self.current_task = task.into();
    }

    /// `executing → completed`.
    pub fn complete(&mut self) -> AgentflowResult<()> {
        self.finish(AgentStatus::Completed)?;
        self.progress = 100;
        self.current_task = "Done".to_string();
        Ok(())
    }

    /// `executing → failed`.
    pub fn fail(&mut self, reason: impl Into<String>) -> AgentflowResult<()> {
        self.finish(AgentStatus::Failed)?;
        self.current_task = reason.into();
        Ok(())
    }

    /// Put a finished stage back to `pending` for another attempt.
    pub fn reset(&mut self, reason: impl Into<String>) -> AgentflowResult<()> {
        if self.status == AgentStatus::Executing {
            return Err(AgentflowError::InvalidTransition(
                "cannot reset an executing agent".to_string(),
            ));
        }
        self.status = AgentStatus::Pending;
        self.progress = 0;
        self.current_task = reason.into();
        Ok(())
    }

    fn finish(&mut self, next: AgentStatus) -> AgentflowResult<()> {
        if self.status != AgentStatus::Executing {
            return Err(AgentflowError::InvalidTransition(format!(
                "agent cannot move from {:?} to {next:?}",
                self.status
            )));
        }
        self.status = next;
        Ok(())
    }
}

/// Severity of a job log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Author of a log entry: an agent role or the orchestrator itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum LogSource {
    System,
    Agent(AgentRole),
}

impl From<LogSource> for String {
    fn from(source: LogSource) -> Self {
        match source {
            LogSource::System => "system".to_string(),
            LogSource::Agent(role) => role.as_str().to_string(),
        }
    }
}

impl TryFrom<String> for LogSource {
    type Error = AgentflowError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value == "system" {
            Ok(LogSource::System)
        } else {
            value.parse().map(LogSource::Agent)
        }
    }
}

impl From<AgentRole> for LogSource {
    fn from(role: AgentRole) -> Self {
        LogSource::Agent(role)
    }
}

/// One line of a job's append-only history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub agent: LogSource,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new(agent: impl Into<LogSource>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            agent: agent.into(),
            level,
            message: message.into(),
        }
    }

    pub fn system(level: LogLevel, message: impl Into<String>) -> Self {
        Self::new(LogSource::System, level, message)
    }
}

/// A titled section of a [`Deliverable::Report`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSection {
    pub heading: String,
    pub body: String,
}

/// A generated artifact. Each kind has its own fixed schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Deliverable {
    Presentation {
        title: String,
        slides: Vec<String>,
    },
    Report {
        title: String,
        sections: Vec<ReportSection>,
    },
    Dataset {
        name: String,
        columns: Vec<String>,
        rows: Vec<Vec<serde_json::Value>>,
    },
    Content {
        title: String,
        format: String,
        body: String,
    },
}

impl Deliverable {
    /// Short kind name (`presentation`, `report`, ...).
    pub fn kind(&self) -> &'static str {
        match self {
            Deliverable::Presentation { .. } => "presentation",
            Deliverable::Report { .. } => "report",
            Deliverable::Dataset { .. } => "dataset",
            Deliverable::Content { .. } => "content",
        }
    }
}

/// Final payload attached to a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub summary: String,
    pub deliverables: Vec<Deliverable>,
    /// Output summary per agent, in invocation order.
    pub agent_results: IndexMap<AgentRole, String>,
    /// Iteration the oversight stage approved (or the last one run).
    pub iterations: u32,
}

/// One submitted task and its end-to-end execution record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub task: String,
    pub max_iterations: u32,
    pub status: JobStatus,
    pub progress: u8,
    pub current_step: String,
    /// Current revision iteration, starting at 1.
    pub iteration: u32,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Agent states keyed by role, in invocation order.
    pub agents: IndexMap<AgentRole, AgentState>,
    pub logs: Vec<LogEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Job {
    pub fn new(task: impl Into<String>, max_iterations: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            task: task.into(),
            max_iterations,
            status: JobStatus::Pending,
            progress: 0,
            current_step: "Queued".to_string(),
            iteration: 1,
            start_time: Utc::now(),
            finished_at: None,
            agents: IndexMap::new(),
            logs: Vec::new(),
            result: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Register a role in `pending` state. Existing entries are left untouched.
    pub fn register_agent(&mut self, role: AgentRole) {
        self.agents.entry(role).or_default();
    }

    pub fn agent(&self, role: AgentRole) -> Option<&AgentState> {
        self.agents.get(&role)
    }

    pub fn agent_mut(&mut self, role: AgentRole) -> AgentflowResult<&mut AgentState> {
        self.agents
            .get_mut(&role)
            .ok_or_else(|| {
                AgentflowError::NotFound(format!("agent '{role}' is not part of job {}", self.id))
            })
    }

    /// Apply a status change, rejecting anything that is not monotone.
    pub fn transition(&mut self, next: JobStatus) -> AgentflowResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(AgentflowError::InvalidTransition(format!(
                "job {} cannot move from {} to {next}",
                self.id, self.status
            )));
        }
        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Raise overall progress. Ignored once terminal; capped below 100 while live.
    pub fn advance_progress(&mut self, progress: u8) {
        if self.is_terminal() {
            return;
        }
        self.progress = self.progress.max(progress.min(MAX_LIVE_PROGRESS));
    }

    /// `in_progress → completed` with the final payload.
    pub fn complete(&mut self, result: JobResult) -> AgentflowResult<()> {
        self.transition(JobStatus::Completed)?;
        self.progress = 100;
        self.current_step = "Completed".to_string();
        self.result = Some(result);
        Ok(())
    }

    /// Move to `error`, recording the reason.
    pub fn fail(&mut self, reason: impl Into<String>) -> AgentflowResult<()> {
        self.transition(JobStatus::Error)?;
        self.current_step = "Failed".to_string();
        self.error = Some(reason.into());
        Ok(())
    }

    /// Append `entry`, stamping it at append time.
    ///
    /// The stamp never precedes the previous entry's, so the history stays
    /// time-ordered even when entries were built before a writer got the job.
    pub fn log(&mut self, mut entry: LogEntry) {
        let now = Utc::now();
        entry.timestamp = match self.logs.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };
        self.logs.push(entry);
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            task: self.task.clone(),
            status: self.status,
            progress: self.progress,
            current_step: self.current_step.clone(),
            start_time: self.start_time,
            finished_at: self.finished_at,
        }
    }
}

/// Compact job view used by listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: JobId,
    pub task: String,
    pub status: JobStatus,
    pub progress: u8,
    pub current_step: String,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}
