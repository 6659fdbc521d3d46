use agentflow_core::{Job, JobResult, LogEntry, LogLevel, LogSource};

/// Entries appended since the caller last printed `seen` of them.
///
/// Logs only ever grow, so the unseen part is a suffix.
pub fn new_entries(job: &Job, seen: usize) -> &[LogEntry] {
    job.logs.get(seen..).unwrap_or(&[])
}

pub fn format_entry(entry: &LogEntry) -> String {
    let level = match entry.level {
        LogLevel::Info => "INFO",
        LogLevel::Success => "OK",
        LogLevel::Warning => "WARN",
        LogLevel::Error => "ERROR",
    };
    let source = match entry.agent {
        LogSource::System => "system",
        LogSource::Agent(role) => role.as_str(),
    };
    format!(
        "{} [{level:>5}] {source:<17} {}",
        entry.timestamp.format("%H:%M:%S"),
        entry.message
    )
}

/// One-line progress summary.
pub fn format_status(job: &Job) -> String {
    format!(
        "[{:>3}%] {} - {} (iteration {}/{})",
        job.progress, job.status, job.current_step, job.iteration, job.max_iterations
    )
}

pub fn format_result(result: &JobResult) -> String {
    let mut out = format!("Summary: {}\n", result.summary);
    for deliverable in &result.deliverables {
        out.push_str(&format!("  deliverable: {}\n", deliverable.kind()));
    }
    for (role, text) in &result.agent_results {
        out.push_str(&format!("  {}: {text}\n", role.label()));
    }
    out
}
