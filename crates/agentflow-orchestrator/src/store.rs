use agentflow_core::{
    AgentflowError, AgentflowResult, Job, JobId, JobSummary, LogEntry, LogLevel,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Holds every live or recently finished job, keyed by job ID.
///
/// The outer map lock is held only to look up, insert or remove an entry.
/// Each job sits behind its own lock, so writers to one job never block
/// readers or writers of another.
pub struct ProgressStore {
    jobs: RwLock<HashMap<JobId, Arc<RwLock<Job>>>>,
}

impl ProgressStore {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a freshly created job.
    pub async fn insert(&self, job: Job) -> JobId {
        let id = job.id;
        self.jobs.write().await.insert(id, Arc::new(RwLock::new(job)));
        id
    }

    async fn entry(&self, id: JobId) -> AgentflowResult<Arc<RwLock<Job>>> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| AgentflowError::NotFound(format!("job {id}")))
    }

    /// Consistent snapshot of one job.
    pub async fn get(&self, id: JobId) -> AgentflowResult<Job> {
        let entry = self.entry(id).await?;
        let job = entry.read().await;
        Ok(job.clone())
    }

    /// Apply `mutator` to one job atomically.
    ///
    /// The mutator works on a draft copy; the draft replaces the stored job
    /// only if the mutator succeeds, so readers never observe a half-applied
    /// change.
    pub async fn update<F, R>(&self, id: JobId, mutator: F) -> AgentflowResult<R>
    where
        F: FnOnce(&mut Job) -> AgentflowResult<R>,
    {
        let entry = self.entry(id).await?;
        let mut job = entry.write().await;
        let mut draft = job.clone();
        let out = mutator(&mut draft)?;
        *job = draft;
        Ok(out)
    }

    /// Summaries of all jobs, newest first.
    pub async fn list(&self) -> Vec<JobSummary> {
        let entries: Vec<Arc<RwLock<Job>>> = self.jobs.read().await.values().cloned().collect();
        let mut summaries = Vec::with_capacity(entries.len());
        for entry in entries {
            summaries.push(entry.read().await.summary());
        }
        summaries.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        summaries
    }

    pub async fn remove(&self, id: JobId) -> bool {
        self.jobs.write().await.remove(&id).is_some()
    }

    /// Drop terminal jobs that finished before `cutoff`. Live jobs are kept.
    pub async fn evict_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let entries: Vec<(JobId, Arc<RwLock<Job>>)> = self
            .jobs
            .read()
            .await
            .iter()
            .map(|(id, entry)| (*id, entry.clone()))
            .collect();

        let mut expired = Vec::new();
        for (id, entry) in entries {
            let job = entry.read().await;
            if job.is_terminal() && job.finished_at.is_some_and(|t| t < cutoff) {
                expired.push(id);
            }
        }

        if expired.is_empty() {
            return 0;
        }
        let mut jobs = self.jobs.write().await;
        expired
            .iter()
            .filter(|id| jobs.remove(*id).is_some())
            .count()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Append `entry` to the job history and mirror it as a tracing event.
pub fn record_log(job: &mut Job, entry: LogEntry) {
    let agent = String::from(entry.agent);
    match entry.level {
        LogLevel::Error => {
            tracing::error!(job_id = %job.id, agent = %agent, "{}", entry.message);
        }
        LogLevel::Warning => {
            tracing::warn!(job_id = %job.id, agent = %agent, "{}", entry.message);
        }
        LogLevel::Info | LogLevel::Success => {
            tracing::info!(job_id = %job.id, agent = %agent, "{}", entry.message);
        }
    }
    job.log(entry);
}

impl Default for ProgressStore {
    fn default() -> Self {
        Self::new()
    }
}
