use agentflow_core::{AgentRole, AgentStatus, Job};
use serde::{Deserialize, Serialize};

/// Artifact kinds the execution stage is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliverableKind {
    Presentation,
    Report,
    Dataset,
    Content,
}

/// Ordered list of stage groups decided before orchestration starts.
///
/// Each group runs after the previous one finishes. A group with more than
/// one role runs its stages concurrently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagePlan {
    pub groups: Vec<Vec<AgentRole>>,
    pub deliverables: Vec<DeliverableKind>,
}

impl StagePlan {
    /// Every planned role in invocation order.
    pub fn roles(&self) -> impl Iterator<Item = AgentRole> + '_ {
        self.groups.iter().flatten().copied()
    }

    pub fn contains(&self, role: AgentRole) -> bool {
        self.roles().any(|r| r == role)
    }

    /// Index of the group holding `role`.
    pub fn group_of(&self, role: AgentRole) -> Option<usize> {
        self.groups.iter().position(|g| g.contains(&role))
    }

    /// Weighted overall progress for `job`.
    ///
    /// Groups share 100 equally; a group contributes the mean of its agents'
    /// local progress, with finished (completed or failed) agents counting as 100.
    pub fn overall_progress(&self, job: &Job) -> u8 {
        if self.groups.is_empty() {
            return 0;
        }
        let per_group: u32 = self
            .groups
            .iter()
            .map(|group| {
                let sum: u32 = group
                    .iter()
                    .map(|role| match job.agent(*role) {
                        Some(state)
                            if matches!(
                                state.status,
                                AgentStatus::Completed | AgentStatus::Failed
                            ) =>
                        {
                            100
                        }
                        Some(state) => u32::from(state.progress),
                        None => 0,
                    })
                    .sum();
                sum / group.len().max(1) as u32
            })
            .sum();
        (per_group / self.groups.len() as u32).min(100) as u8
    }
}

/// Keyword-based classifier turning a task description into a [`StagePlan`].
#[derive(Debug, Clone)]
pub struct TaskClassifier {
    content_keywords: Vec<&'static str>,
    data_keywords: Vec<&'static str>,
    presentation_keywords: Vec<&'static str>,
}

impl Default for TaskClassifier {
    fn default() -> Self {
        Self {
            content_keywords: vec![
                "content",
                "blog",
                "post",
                "article",
                "copy",
                "marketing",
                "social",
                "write",
                "report",
                "presentation",
            ],
            data_keywords: vec![
                "data",
                "analy",
                "metric",
                "statistic",
                "dashboard",
                "performance",
                "trend",
                "chart",
            ],
            presentation_keywords: vec!["presentation", "slides", "powerpoint", "deck"],
        }
    }
}

impl TaskClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the stage plan for `task`.
    ///
    /// With `parallel` set, content and data stages share one group when
    /// both are required; otherwise they run one after the other.
    pub fn classify(&self, task: &str, parallel: bool) -> StagePlan {
        let lower = task.to_lowercase();
        let mentions = |words: &[&str]| words.iter().any(|w| lower.contains(w));

        let wants_data = mentions(&self.data_keywords);
        let wants_content = mentions(&self.content_keywords) || !wants_data;

        let mut groups = vec![vec![AgentRole::ResearchAnalyst]];
        match (wants_content, wants_data) {
            (true, true) if parallel => {
                groups.push(vec![AgentRole::ContentCreator, AgentRole::DataAnalyst]);
            }
            (true, true) => {
                groups.push(vec![AgentRole::ContentCreator]);
                groups.push(vec![AgentRole::DataAnalyst]);
            }
            (false, true) => groups.push(vec![AgentRole::DataAnalyst]),
            _ => groups.push(vec![AgentRole::ContentCreator]),
        }
        groups.push(vec![AgentRole::ExecutionAgent]);
        groups.push(vec![AgentRole::OversightManager]);

        let mut deliverables = Vec::new();
        if mentions(&self.presentation_keywords) {
            deliverables.push(DeliverableKind::Presentation);
        } else {
            deliverables.push(DeliverableKind::Report);
        }
        if wants_data {
            deliverables.push(DeliverableKind::Dataset);
        }
        if lower.contains("blog") || lower.contains("social") || lower.contains("post") {
            deliverables.push(DeliverableKind::Content);
        }

        StagePlan {
            groups,
            deliverables,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use agentflow_core::JobStatus;

    #[test]
    fn test_plain_research_gets_content_only() {
        let plan = TaskClassifier::new().classify("Research X", true);
        assert_eq!(
            plan.groups,
            vec![
                vec![AgentRole::ResearchAnalyst],
                vec![AgentRole::ContentCreator],
                vec![AgentRole::ExecutionAgent],
                vec![AgentRole::OversightManager],
            ]
        );
        assert_eq!(plan.deliverables, vec![DeliverableKind::Report]);
    }

    #[test]
    fn test_content_and_data_run_in_parallel() {
        let plan = TaskClassifier::new().classify(
            "Research the AI automation market and create a comprehensive report with data analysis and PowerPoint presentation",
            true,
        );
        assert_eq!(
            plan.groups[1],
            vec![AgentRole::ContentCreator, AgentRole::DataAnalyst]
        );
        assert_eq!(
            plan.deliverables,
            vec![DeliverableKind::Presentation, DeliverableKind::Dataset]
        );
    }

    #[test]
    fn test_parallel_disabled_splits_groups() {
        let plan = TaskClassifier::new().classify("Write a report on sales data", false);
        assert_eq!(plan.groups.len(), 5);
        assert_eq!(plan.groups[1], vec![AgentRole::ContentCreator]);
        assert_eq!(plan.groups[2], vec![AgentRole::DataAnalyst]);
    }

    #[test]
    fn test_data_only_task() {
        let plan = TaskClassifier::new().classify("Analyze Q4 performance metrics", true);
        assert!(plan.contains(AgentRole::DataAnalyst));
        assert!(!plan.contains(AgentRole::ContentCreator));
        assert_eq!(plan.group_of(AgentRole::ExecutionAgent), Some(2));
    }

    #[test]
    fn test_overall_progress_weighting() {
        let plan = TaskClassifier::new().classify("Write a blog post with data charts", true);
        let mut job = agentflow_core::Job::new("t", 3);
        for role in plan.roles() {
            job.register_agent(role);
        }
        job.transition(JobStatus::InProgress).unwrap();
        assert_eq!(plan.overall_progress(&job), 0);

        let research = job.agent_mut(AgentRole::ResearchAnalyst).unwrap();
        research.start("r").unwrap();
        research.complete().unwrap();
        // 1 of 4 groups done
        assert_eq!(plan.overall_progress(&job), 25);

        let content = job.agent_mut(AgentRole::ContentCreator).unwrap();
        content.start("c").unwrap();
        content.report(50, "half");
        // parallel group at (50 + 0) / 2
        assert_eq!(plan.overall_progress(&job), 31);
    }
}
