use agentflow_core::{AgentflowError, AgentflowResult, ErrorStrategy};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::time::Duration;

/// Execution settings shared by every job the orchestrator runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub error_handling_strategy: ErrorStrategy,
    #[serde(default = "default_parallel")]
    pub parallel_execution_enabled: bool,
    #[serde(default = "default_max_minutes")]
    pub max_execution_time_minutes: u64,
    /// Lower bound accepted for `max_iterations` on submission.
    #[serde(default = "default_min_iterations")]
    pub min_iterations: u32,
    /// Upper bound accepted for `max_iterations` on submission.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Pause between sub-steps of the simulated stage executor.
    #[serde(default = "default_step_delay_ms")]
    pub stage_step_delay_ms: u64,
}

fn default_parallel() -> bool {
    true
}
fn default_max_minutes() -> u64 {
    30
}
fn default_min_iterations() -> u32 {
    1
}
fn default_max_iterations() -> u32 {
    10
}
fn default_step_delay_ms() -> u64 {
    400
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            error_handling_strategy: ErrorStrategy::default(),
            parallel_execution_enabled: default_parallel(),
            max_execution_time_minutes: default_max_minutes(),
            min_iterations: default_min_iterations(),
            max_iterations: default_max_iterations(),
            stage_step_delay_ms: default_step_delay_ms(),
        }
    }
}

impl ExecutionConfig {
    pub fn iteration_range(&self) -> RangeInclusive<u32> {
        self.min_iterations..=self.max_iterations
    }

    pub fn max_execution_time(&self) -> Duration {
        Duration::from_secs(self.max_execution_time_minutes.saturating_mul(60))
    }

    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.stage_step_delay_ms)
    }

    /// Reject settings the orchestrator cannot honour.
    pub fn validate(&self) -> AgentflowResult<()> {
        if self.min_iterations == 0 {
            return Err(AgentflowError::Config(
                "execution.min_iterations must be at least 1".to_string(),
            ));
        }
        if self.min_iterations > self.max_iterations {
            return Err(AgentflowError::Config(format!(
                "execution.min_iterations ({}) exceeds max_iterations ({})",
                self.min_iterations, self.max_iterations
            )));
        }
        if self.max_execution_time_minutes == 0 {
            return Err(AgentflowError::Config(
                "execution.max_execution_time_minutes must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
