//! Researcher role: searches the web and writes the five-section answer.

use std::sync::Arc;

use async_trait::async_trait;
use deepcritic_core::{AgentRuntime, AgentTurn, CollaboratorError};

use crate::agent::ToolLoopAgent;
use crate::llm::ChatModel;
use crate::tools::SearchTool;

pub const RESEARCH_INSTRUCTIONS: &str = "\
You are an expert researcher. Use the internet_search tool to gather current, \
verifiable information before answering. Search as often as needed, then write \
the answer using exactly these sections, in this order, each header on its own line:

Title:
Overview:
Main Discussion:
Key Takeaways:
Sources:

Key Takeaways is a bullet list. Sources lists one URL per bullet, and every \
claim in the discussion must be backed by one of them. When reviewer feedback \
is included with the question, address every item and return the complete \
revised answer, not a diff.";

pub struct ResearcherAgent {
    inner: ToolLoopAgent,
}

impl ResearcherAgent {
    pub fn new(model: Arc<dyn ChatModel>, search: Arc<SearchTool>) -> Self {
        Self {
            inner: ToolLoopAgent::new("researcher", RESEARCH_INSTRUCTIONS, model).with_tool(search),
        }
    }
}

#[async_trait]
impl AgentRuntime for ResearcherAgent {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn run_turn(&self, turn: AgentTurn) -> Result<String, CollaboratorError> {
        self.inner.run_turn(turn).await
    }
}

#[cfg(test)]
mod tests {
    use deepcritic_core::{ArtifactStore, REQUIRED_SECTIONS, prompts};
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::agent::testing::ScriptedModel;
    use crate::tools::{SEARCH_TOOL_NAME, SearchDefaults};

    struct NoHits;

    #[async_trait]
    impl deepcritic_core::SearchProvider for NoHits {
        fn name(&self) -> &str {
            "none"
        }

        async fn search(
            &self,
            _request: &deepcritic_core::SearchRequest,
        ) -> Result<Vec<deepcritic_core::SearchResult>, CollaboratorError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn instructions_name_every_section() {
        for section in REQUIRED_SECTIONS {
            assert!(RESEARCH_INSTRUCTIONS.contains(section), "{section} missing");
        }
    }

    #[tokio::test]
    async fn researcher_offers_search_and_returns_answer() {
        let temp = TempDir::new().expect("temp dir");
        let store = ArtifactStore::in_dir(temp.path()).expect("store");
        let search = Arc::new(SearchTool::new(
            Arc::new(NoHits),
            store,
            SearchDefaults::default(),
        ));
        let model = ScriptedModel::new(vec![
            ScriptedModel::tool_call("call_1", SEARCH_TOOL_NAME, json!({ "query": "X" })),
            ScriptedModel::text("Title:\nX"),
        ]);
        let agent = ResearcherAgent::new(model.clone(), search);

        let answer = agent
            .run_turn(prompts::research_turn("What is X?", None, 4))
            .await
            .expect("answer");
        assert_eq!(answer, "Title:\nX");
        assert_eq!(agent.name(), "researcher");
        assert_eq!(
            model.tool_sets.lock().unwrap()[0],
            vec![SEARCH_TOOL_NAME.to_string()]
        );
    }
}
