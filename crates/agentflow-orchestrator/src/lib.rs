//! Asynchronous job execution and progress tracking for Agentflow.
//!
//! A submitted task becomes a [`Job`](agentflow_core::Job) that an
//! [`Orchestrator`] drives through a declared [`StagePlan`]:
//! research → content and/or data → execution → oversight, with oversight
//! allowed to send earlier stages back for revision. Every change lands in
//! the [`ProgressStore`], which polling clients read.
//!
//! # Main types
//!
//! - [`Orchestrator`]: Drives one job through its stage plan.
//! - [`JobSubmitter`]: Validates submissions and starts pipelines without blocking.
//! - [`ProgressStore`]: Per-job serialized writes, consistent snapshots for readers.
//! - [`TaskClassifier`]: Turns a task description into a [`StagePlan`].
//! - [`StageExecutor`]: One agent role's implementation.

/// Task classification and stage plans.
pub mod classifier;
/// Execution settings.
pub mod config;
/// Orchestration engine and pipeline execution.
pub mod engine;
/// Eviction of finished jobs.
pub mod retention;
/// Stage executor abstraction and the simulated executor.
pub mod stage;
/// Progress store.
pub mod store;
/// Job submission.
pub mod submitter;

pub use classifier::{DeliverableKind, StagePlan, TaskClassifier};
pub use config::ExecutionConfig;
pub use engine::{Orchestrator, RunOptions};
pub use retention::{spawn_sweeper, RetentionConfig};
pub use stage::{
    simulated_factory, ExecutorFactory, Review, SimulatedExecutor, StageContext, StageExecutor,
    StageOutput, StageReporter,
};
pub use store::ProgressStore;
pub use submitter::{JobHandle, JobSubmitter};
