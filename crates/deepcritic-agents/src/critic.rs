//! Critic role: reviews an answer and replies `ENOUGH` or `REVISE:` with fixes.

use std::sync::Arc;

use async_trait::async_trait;
use deepcritic_core::{AgentRuntime, AgentTurn, CollaboratorError};

use crate::agent::ToolLoopAgent;
use crate::llm::ChatModel;

pub const CRITIC_INSTRUCTIONS: &str = "\
You are a strict research reviewer. Check the answer against the question: \
coverage of every part of the question, factual accuracy, whether each claim \
is supported by a listed source, and whether the sections Title:, Overview:, \
Main Discussion:, Key Takeaways:, Sources: appear in that order.

Reply in one of two forms and nothing else:
ENOUGH
or
REVISE:
- <specific fix>
- <specific fix>

Only ask for fixes that would materially improve the answer.";

/// Reviewer without tools.
pub struct CriticAgent {
    inner: ToolLoopAgent,
}

impl CriticAgent {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            inner: ToolLoopAgent::new("critic", CRITIC_INSTRUCTIONS, model),
        }
    }
}

#[async_trait]
impl AgentRuntime for CriticAgent {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn run_turn(&self, turn: AgentTurn) -> Result<String, CollaboratorError> {
        self.inner.run_turn(turn).await
    }
}

#[cfg(test)]
mod tests {
    use deepcritic_core::{CriticDecision, prompts};

    use super::*;
    use crate::agent::testing::ScriptedModel;
    use crate::llm::ModelMessage;

    #[tokio::test]
    async fn critic_reply_parses_as_decision() {
        let model = ScriptedModel::new(vec![ScriptedModel::text(
            "REVISE:\n- Cite the 2024 IEA report\n- Tighten the overview",
        )]);
        let critic = CriticAgent::new(model.clone());

        let reply = critic
            .run_turn(prompts::critic_turn("Q?", "Title:\nA", 2))
            .await
            .expect("reply");
        let decision = CriticDecision::parse(&reply).expect("parses");
        assert_eq!(decision.fixes().len(), 2);

        let requests = model.requests.lock().unwrap();
        assert!(model.tool_sets.lock().unwrap()[0].is_empty());
        match &requests[0][0] {
            ModelMessage::Chat(message) => assert!(message.content.contains("ENOUGH")),
            other => panic!("expected system message, got {other:?}"),
        }
    }
}
