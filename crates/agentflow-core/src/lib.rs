//! Core types and error definitions for the Agentflow backend.
//!
//! This crate provides the foundational types shared across all Agentflow
//! crates: the error taxonomy, the job data model that polling clients see,
//! and the request/response documents of the HTTP contract.
//!
//! # Main types
//!
//! - [`AgentflowError`]: Unified error enum for all Agentflow subsystems.
//! - [`AgentflowResult`]: Convenience alias for `Result<T, AgentflowError>`.
//! - [`Job`]: One submitted task and its execution record.
//! - [`AgentState`]: Per-role status tracked independently of the job.
//! - [`LogEntry`]: One line of a job's append-only history.
//! - [`Deliverable`]: Tagged union of generated artifacts.

/// Error taxonomy.
pub mod error;
/// Job, agent and log data model.
pub mod job;
/// HTTP request/response documents.
pub mod wire;

pub use error::{AgentflowError, AgentflowResult};
pub use job::{
    AgentRole, AgentState, AgentStatus, Deliverable, Job, JobId, JobResult, JobStatus, JobSummary,
    LogEntry, LogLevel, LogSource, ReportSection, MAX_LIVE_PROGRESS,
};
pub use wire::{
    ErrorBody, ErrorStrategy, ExecutionList, ExecutionStats, SubmitRequest, SubmitResponse,
};
