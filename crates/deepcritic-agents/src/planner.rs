//! Planner role: breaks the question into sub-questions and search queries.

use std::sync::Arc;

use async_trait::async_trait;
use deepcritic_core::{AgentRuntime, AgentTurn, CollaboratorError};

use crate::agent::ToolLoopAgent;
use crate::llm::ChatModel;

pub const PLANNER_INSTRUCTIONS: &str = "\
You are a research planner. Identify the questions that must be answered to \
give a comprehensive response to the user's query. Each sub-question must be \
specific, focused and relevant to the query. Then propose web search queries \
that would gather the information needed to answer them.

Reply with a single JSON object and nothing else:
{\"sub_questions\": [\"...\"], \"search_queries\": [\"...\"]}";

/// Planner without tools.
pub struct PlannerAgent {
    inner: ToolLoopAgent,
}

impl PlannerAgent {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            inner: ToolLoopAgent::new("planner", PLANNER_INSTRUCTIONS, model),
        }
    }
}

#[async_trait]
impl AgentRuntime for PlannerAgent {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn run_turn(&self, turn: AgentTurn) -> Result<String, CollaboratorError> {
        self.inner.run_turn(turn).await
    }
}
